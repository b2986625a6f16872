//! Render-graph resource reflection and binding validation.

use std::fmt;

use crate::util::{Error, Result};

/// Name of the final display image.
pub const COLOR: &str = "color";
/// Name of the optional debug overlay image.
pub const DEBUG: &str = "debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Rgba32Float,
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ImageFormat::Rgba32Float => 16,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Rgba32Float => f.write_str("rgba32f"),
        }
    }
}

/// One image the pipeline declares to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDesc {
    pub name: &'static str,
    pub format: ImageFormat,
    pub extent: (u32, u32),
    pub optional: bool,
}

/// Image the host bound to one of the declared resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBinding {
    pub name: String,
    pub extent: (u32, u32),
}

impl ImageBinding {
    pub fn new(name: impl Into<String>, extent: (u32, u32)) -> Self {
        Self {
            name: name.into(),
            extent,
        }
    }
}

/// Outputs at `extent`.
pub fn reflect(extent: (u32, u32)) -> Vec<ResourceDesc> {
    vec![
        ResourceDesc {
            name: COLOR,
            format: ImageFormat::Rgba32Float,
            extent,
            optional: false,
        },
        ResourceDesc {
            name: DEBUG,
            format: ImageFormat::Rgba32Float,
            extent,
            optional: true,
        },
    ]
}

/// Every binding must name a declared resource and match `extent`.
pub fn validate_bindings(extent: (u32, u32), bindings: &[ImageBinding]) -> Result<()> {
    let declared = reflect(extent);
    for b in bindings {
        if !declared.iter().any(|d| d.name == b.name) {
            return Err(Error::UnknownResource(b.name.clone()));
        }
        if b.extent != extent {
            return Err(Error::ExtentMismatch {
                resource: b.name.clone(),
                expected: extent,
                actual: b.extent,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ErrorKind;

    #[test]
    fn test_reflect() {
        let r = reflect((64, 32));
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].name, COLOR);
        assert!(!r[0].optional);
        assert!(r[1].optional);
        assert!(r.iter().all(|d| d.extent == (64, 32) && d.format == ImageFormat::Rgba32Float));
    }

    #[test]
    fn test_validate_bindings() {
        let extent = (16, 16);
        assert!(validate_bindings(extent, &[]).is_ok());
        assert!(validate_bindings(extent, &[ImageBinding::new(COLOR, extent), ImageBinding::new(DEBUG, extent)]).is_ok());

        let err = validate_bindings(extent, &[ImageBinding::new(COLOR, extent), ImageBinding::new(DEBUG, (8, 8))]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, Error::ExtentMismatch { ref resource, actual: (8, 8), .. } if resource == DEBUG));

        let err = validate_bindings(extent, &[ImageBinding::new("albedo", extent)]).unwrap_err();
        assert!(matches!(err, Error::UnknownResource(ref n) if n == "albedo"));
    }
}
