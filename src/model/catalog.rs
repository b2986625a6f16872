//! Model catalog: the closed, data-driven list of neural materials.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::quantize::SCALE_COUNT;
use crate::util::{Error, Result};

/// Catalog file format version.
pub const CATALOG_VERSION: u32 = 1;

/// Immutable metadata of one catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    /// Weights asset stem, resolved against the catalog's asset root
    pub asset: String,
    /// Height-field image file name
    pub height_field: String,
    /// Outputs are high dynamic range (compositing undoes the tone mapping)
    pub hdr: bool,
    pub scales: [f32; SCALE_COUNT],
}

/// On-disk entry. `scales` is unsized here so a wrong count is reportable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    name: String,
    asset: String,
    height_field: String,
    #[serde(default)]
    hdr: bool,
    scales: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    /// Relative to the catalog file's directory
    #[serde(default)]
    asset_root: Option<PathBuf>,
    models: Vec<CatalogEntry>,
}

impl TryFrom<CatalogEntry> for ModelInfo {
    type Error = Error;

    fn try_from(e: CatalogEntry) -> Result<Self> {
        let scales: [f32; SCALE_COUNT] = e.scales.as_slice().try_into().map_err(|_| Error::ScaleCount {
            model: e.name.clone(),
            actual: e.scales.len(),
        })?;
        if let Some(bad) = scales.iter().find(|s| !s.is_finite()) {
            return Err(Error::InvalidCatalog(format!("'{}' has non-finite scale {bad}", e.name)));
        }
        Ok(Self {
            name: e.name,
            asset: e.asset,
            height_field: e.height_field,
            hdr: e.hdr,
            scales,
        })
    }
}

impl From<&ModelInfo> for CatalogEntry {
    fn from(m: &ModelInfo) -> Self {
        Self {
            name: m.name.clone(),
            asset: m.asset.clone(),
            height_field: m.height_field.clone(),
            hdr: m.hdr,
            scales: m.scales.to_vec(),
        }
    }
}

/// Ordered model list plus the directory its assets live in.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    root: PathBuf,
    models: Vec<ModelInfo>,
}

impl Catalog {
    /// Validate and build. Names must be unique; the list must not be empty.
    pub fn new(root: impl Into<PathBuf>, models: Vec<ModelInfo>) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::InvalidCatalog("catalog has no models".into()));
        }
        let mut seen = HashSet::new();
        for m in &models {
            if !seen.insert(m.name.as_str()) {
                return Err(Error::InvalidCatalog(format!("duplicate model name '{}'", m.name)));
            }
        }
        Ok(Self { root: root.into(), models })
    }

    /// Read a JSON catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AssetNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let file: CatalogFile = serde_json::from_str(&text)?;
        if file.version != CATALOG_VERSION {
            return Err(Error::InvalidCatalog(format!("unsupported catalog version {}", file.version)));
        }

        let base = path.parent().unwrap_or(Path::new("."));
        let root = match file.asset_root {
            Some(r) if r.is_absolute() => r,
            Some(r) => base.join(r),
            None => base.to_path_buf(),
        };
        let models = file
            .models
            .into_iter()
            .map(ModelInfo::try_from)
            .collect::<Result<Vec<_>>>()?;
        let catalog = Self::new(root, models)?;
        tracing::info!(path = %path.display(), models = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Write as JSON. Assets are expected next to the catalog file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = CatalogFile {
            version: CATALOG_VERSION,
            asset_root: None,
            models: self.models.iter().map(CatalogEntry::from).collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// The four shipped materials.
    pub fn builtin(root: impl Into<PathBuf>) -> Self {
        let entry = |name: &str, asset: &str, hf: &str, hdr: bool, scales: [f32; 8]| ModelInfo {
            name: name.into(),
            asset: asset.into(),
            height_field: hf.into(),
            hdr,
            scales,
        };
        Self {
            root: root.into(),
            models: vec![
                entry(
                    "UBO Leather11",
                    "leather11_int8",
                    "leather11.png",
                    false,
                    [
                        0.003400295041501522,
                        1.1354546586517245e-05,
                        0.0024283595848828554,
                        1.047514069796307e-05,
                        0.0021721271332353354,
                        1.9848570445901714e-05,
                        0.0016346105840057135,
                        1.605643228685949e-05,
                    ],
                ),
                entry(
                    "Weave",
                    "weave_int8",
                    "weave.jpg",
                    false,
                    [
                        0.002025123918429017,
                        7.385711796814576e-06,
                        0.0017646728083491325,
                        1.3128001228324138e-05,
                        0.0012104109628126025,
                        1.130689270212315e-05,
                        0.001690503559075296,
                        2.1813480998389423e-05,
                    ],
                ),
                entry(
                    "Tile",
                    "tile2_int8",
                    "tile2.png",
                    true,
                    [
                        0.0021086351480334997,
                        6.1559362620755564e-06,
                        0.0015336197102442384,
                        5.158955445949687e-06,
                        0.0009424724266864359,
                        4.815707598027075e-06,
                        0.0011210687225684524,
                        6.463145837187767e-06,
                    ],
                ),
                entry(
                    "Ceramic Tile",
                    "tile_int8",
                    "tile.jpg",
                    true,
                    [
                        0.0025666167493909597,
                        7.262530743901152e-06,
                        0.0012831123312935233,
                        4.6556156121368986e-06,
                        0.0010884717339649796,
                        5.779493676527636e-06,
                        0.000891408184543252,
                        4.09871927331551e-06,
                    ],
                ),
            ],
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModelInfo> {
        self.models.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.models.iter().position(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin() {
        let c = Catalog::builtin("/assets");
        assert_eq!(c.len(), 4);
        assert_eq!(c.index_of("Weave"), Some(1));
        let tile = c.get(2).unwrap();
        assert!(tile.hdr);
        assert_eq!(tile.asset, "tile2_int8");
        assert_eq!(tile.scales[0], 0.0021086351480334997);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let c = Catalog::builtin(dir.path());
        c.save(&path).unwrap();
        let back = Catalog::load(&path).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_wrong_scale_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"version":1,"models":[{"name":"M1","asset":"m1","height_field":"m1.png","scales":[0.1,0.0,0.1]}]}"#,
        )
        .unwrap();
        match Catalog::load(&path) {
            Err(Error::ScaleCount { model, actual }) => {
                assert_eq!(model, "M1");
                assert_eq!(actual, 3);
            }
            other => panic!("expected ScaleCount, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        std::fs::write(&path, r#"{"version":2,"models":[]}"#).unwrap();
        assert!(matches!(Catalog::load(&path), Err(Error::InvalidCatalog(_))));

        std::fs::write(&path, r#"{"version":1,"models":[]}"#).unwrap();
        assert!(matches!(Catalog::load(&path), Err(Error::InvalidCatalog(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Catalog::load(&path), Err(Error::Json(_))));

        assert!(matches!(
            Catalog::load(&dir.path().join("missing.json")),
            Err(Error::AssetNotFound(_))
        ));
    }

    #[test]
    fn test_asset_root_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"version":1,"asset_root":"weights","models":[{"name":"A","asset":"a","height_field":"a.png","scales":[1,0,1,0,1,0,1,0]}]}"#,
        )
        .unwrap();
        let c = Catalog::load(&path).unwrap();
        assert_eq!(c.root(), dir.path().join("weights"));
        assert!(!c.get(0).unwrap().hdr);
    }
}
