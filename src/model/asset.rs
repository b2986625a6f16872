//! Weights asset (`.nbtf`) reader and writer.
//!
//! ## Layout (little-endian)
//! ```text
//! "NBTF" | version u32 | latent_res u32 | latent_channels u32 | latent_scale f32
//! latent i8[res * res * channels]
//! layer_count u32
//! per layer: in u32 | out u32 | weight_scale f32 | input_scale f32 | weights i8[in * out] | bias f32[out]
//! ```
//! Files starting with the gzip magic are inflated first; plain files are
//! memory-mapped.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use btf_mlp::{LatentGrid, Mlp, QuantizedLayer, LATENT_CHANNELS, LAYER_COUNT, LAYER_SHAPES};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memmap2::Mmap;

use crate::util::{pcg_hash, unit_float, Error, Result};

pub const MAGIC: &[u8; 4] = b"NBTF";
pub const VERSION: u32 = 1;
pub const EXTENSION: &str = "nbtf";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Sanity bound on the latent grid resolution.
const MAX_LATENT_RES: u32 = 4096;

/// Header fields, as printed by `nbtf inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetHeader {
    pub version: u32,
    pub latent_resolution: u32,
    pub latent_channels: u32,
    pub latent_scale: f32,
    pub layers: Vec<(u32, u32)>,
    pub compressed: bool,
    pub file_size: u64,
}

/// Decoded network weights and latent grid of one material.
#[derive(Debug, Clone)]
pub struct WeightsAsset {
    pub latent: LatentGrid,
    pub mlp: Mlp,
}

/// `<root>/<asset>.nbtf`, falling back to `<root>/<asset>.nbtf.gz`.
pub fn resolve(root: &Path, asset: &str) -> Result<PathBuf> {
    let plain = root.join(format!("{asset}.{EXTENSION}"));
    if plain.is_file() {
        return Ok(plain);
    }
    let gz = root.join(format!("{asset}.{EXTENSION}.gz"));
    if gz.is_file() {
        return Ok(gz);
    }
    Err(Error::AssetNotFound(plain))
}

/// Raw file bytes: inflated if gzip, mapped otherwise.
enum Bytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl std::ops::Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Mapped(m) => m,
            Bytes::Owned(v) => v,
        }
    }
}

fn open_bytes(path: &Path) -> Result<(Bytes, bool, u64)> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::AssetNotFound(path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })?;
    let size = file.metadata()?.len();
    if size < 4 {
        return Err(Error::malformed(path, format!("file too small ({size} bytes)")));
    }

    // Safety: read-only mapping, the file is not modified while the asset loads
    let mmap = unsafe { Mmap::map(&file) }?;
    if mmap[..2] == GZIP_MAGIC {
        let mut out = Vec::new();
        GzDecoder::new(&mmap[..])
            .read_to_end(&mut out)
            .map_err(|e| Error::malformed(path, format!("gzip: {e}")))?;
        Ok((Bytes::Owned(out), true, size))
    } else {
        Ok((Bytes::Mapped(mmap), false, size))
    }
}

fn eof(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::malformed(path, format!("truncated: {e}"))
}

/// Fail before allocating when fewer than `needed` bytes remain.
fn ensure_remaining(cur: &Cursor<&[u8]>, path: &Path, needed: u64, what: &str) -> Result<()> {
    let remaining = (cur.get_ref().len() as u64).saturating_sub(cur.position());
    if remaining < needed {
        return Err(Error::malformed(
            path,
            format!("truncated: {what} needs {needed} bytes, {remaining} left"),
        ));
    }
    Ok(())
}

fn read_header(cur: &mut Cursor<&[u8]>, path: &Path) -> Result<(u32, u32, u32, f32)> {
    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic).map_err(eof(path))?;
    if &magic != MAGIC {
        return Err(Error::malformed(path, "bad magic"));
    }
    let version = cur.read_u32::<LittleEndian>().map_err(eof(path))?;
    if version != VERSION {
        return Err(Error::malformed(path, format!("unsupported version {version}")));
    }
    let res = cur.read_u32::<LittleEndian>().map_err(eof(path))?;
    let channels = cur.read_u32::<LittleEndian>().map_err(eof(path))?;
    let scale = cur.read_f32::<LittleEndian>().map_err(eof(path))?;
    if res == 0 || res > MAX_LATENT_RES {
        return Err(Error::malformed(path, format!("latent resolution {res} out of range")));
    }
    if channels as usize != LATENT_CHANNELS {
        return Err(Error::malformed(path, format!("expected {LATENT_CHANNELS} latent channels, got {channels}")));
    }
    Ok((version, res, channels, scale))
}

fn read_layer_shape(cur: &mut Cursor<&[u8]>, path: &Path, index: usize) -> Result<(usize, usize)> {
    let in_dim = cur.read_u32::<LittleEndian>().map_err(eof(path))? as usize;
    let out_dim = cur.read_u32::<LittleEndian>().map_err(eof(path))? as usize;
    if (in_dim, out_dim) != LAYER_SHAPES[index] {
        return Err(Error::malformed(
            path,
            format!("layer {index}: expected shape {:?}, got {:?}", LAYER_SHAPES[index], (in_dim, out_dim)),
        ));
    }
    Ok((in_dim, out_dim))
}

impl WeightsAsset {
    /// Read and validate an asset file.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self> {
        let (bytes, compressed, size) = open_bytes(path)?;
        let asset = Self::parse(&bytes, path)?;
        tracing::debug!(compressed, size, latent_res = asset.latent.resolution(), "weights asset decoded");
        Ok(asset)
    }

    /// Decode from memory. `path` is used for error context only.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let (_, res, channels, latent_scale) = read_header(&mut cur, path)?;

        let latent_len = res as u64 * res as u64 * channels as u64;
        ensure_remaining(&cur, path, latent_len, "latent grid")?;
        let mut latent = vec![0i8; latent_len as usize];
        cur.read_i8_into(&mut latent).map_err(eof(path))?;
        let latent = LatentGrid::new(res as usize, latent_scale, latent)
            .map_err(|e| Error::malformed(path, format!("latent: {e}")))?;

        let layer_count = cur.read_u32::<LittleEndian>().map_err(eof(path))? as usize;
        if layer_count != LAYER_COUNT {
            return Err(Error::malformed(path, format!("expected {LAYER_COUNT} layers, got {layer_count}")));
        }

        let mut layers = Vec::with_capacity(LAYER_COUNT);
        for i in 0..LAYER_COUNT {
            let (in_dim, out_dim) = read_layer_shape(&mut cur, path, i)?;
            let weight_scale = cur.read_f32::<LittleEndian>().map_err(eof(path))?;
            let input_scale = cur.read_f32::<LittleEndian>().map_err(eof(path))?;
            ensure_remaining(&cur, path, (in_dim * out_dim + 4 * out_dim) as u64, "layer weights")?;
            let mut weights = vec![0i8; in_dim * out_dim];
            cur.read_i8_into(&mut weights).map_err(eof(path))?;
            let mut bias = vec![0f32; out_dim];
            cur.read_f32_into::<LittleEndian>(&mut bias).map_err(eof(path))?;
            let layer = QuantizedLayer::new(in_dim, out_dim, weight_scale, input_scale, weights, bias)
                .map_err(|e| Error::malformed(path, format!("layer {i}: {e}")))?;
            layers.push(layer);
        }

        let trailing = bytes.len() as u64 - cur.position();
        if trailing != 0 {
            return Err(Error::malformed(path, format!("{trailing} trailing bytes")));
        }

        let mlp = Mlp::new(layers).map_err(|e| Error::malformed(path, e.to_string()))?;
        Ok(Self { latent, mlp })
    }

    /// Header-only read.
    pub fn inspect(path: &Path) -> Result<AssetHeader> {
        let (bytes, compressed, file_size) = open_bytes(path)?;
        let mut cur = Cursor::new(&bytes[..]);
        let (version, res, channels, latent_scale) = read_header(&mut cur, path)?;
        cur.set_position(cur.position() + (res * res * channels) as u64);

        let count = cur.read_u32::<LittleEndian>().map_err(eof(path))?;
        let mut layers = Vec::new();
        for _ in 0..count.min(LAYER_COUNT as u32) {
            let in_dim = cur.read_u32::<LittleEndian>().map_err(eof(path))?;
            let out_dim = cur.read_u32::<LittleEndian>().map_err(eof(path))?;
            layers.push((in_dim, out_dim));
            let skip = 8 + (in_dim as u64 * out_dim as u64) + 4 * out_dim as u64;
            cur.set_position(cur.position() + skip);
        }

        Ok(AssetHeader {
            version,
            latent_resolution: res,
            latent_channels: channels,
            latent_scale,
            layers,
            compressed,
            file_size,
        })
    }

    /// Serialize to bytes (uncompressed).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        // Writes into a Vec cannot fail
        let _ = self.write_body(&mut out);
        out
    }

    fn write_body(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(self.latent.resolution() as u32)?;
        out.write_u32::<LittleEndian>(LATENT_CHANNELS as u32)?;
        out.write_f32::<LittleEndian>(self.latent.scale())?;
        out.extend(self.latent.data().iter().map(|&v| v as u8));
        out.write_u32::<LittleEndian>(self.mlp.layers().len() as u32)?;
        for layer in self.mlp.layers() {
            out.write_u32::<LittleEndian>(layer.in_dim() as u32)?;
            out.write_u32::<LittleEndian>(layer.out_dim() as u32)?;
            out.write_f32::<LittleEndian>(layer.weight_scale())?;
            out.write_f32::<LittleEndian>(layer.input_scale())?;
            out.extend(layer.weights().iter().map(|&v| v as u8));
            for &b in layer.bias() {
                out.write_f32::<LittleEndian>(b)?;
            }
        }
        Ok(())
    }

    /// Write to `path`; gzip-compressed when the extension is `gz`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes();
        let mut file = File::create(path)?;
        if path.extension().is_some_and(|e| e == "gz") {
            let mut enc = GzEncoder::new(file, Compression::default());
            enc.write_all(&bytes)?;
            enc.finish()?;
        } else {
            file.write_all(&bytes)?;
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "weights asset written");
        Ok(())
    }

    /// Deterministic random network, for demos and tests.
    ///
    /// Weights are scaled by `1/sqrt(fan_in)` so activations stay in a sane
    /// range; the output sits roughly mid-grey with seed-dependent variation.
    pub fn synthetic(seed: u64, latent_res: usize) -> Result<Self> {
        let origin = Path::new("<synthetic>");
        let mut state = pcg_hash(seed as u32 ^ pcg_hash((seed >> 32) as u32 ^ 0x9e37_79b9));
        let mut next = move || {
            state = pcg_hash(state);
            unit_float(state) * 2.0 - 1.0
        };

        let res = latent_res.max(1);
        let latent_data: Vec<i8> = (0..res * res * LATENT_CHANNELS)
            .map(|_| (next() * 127.0).round() as i8)
            .collect();
        let latent = LatentGrid::new(res, 1.0 / 127.0, latent_data)
            .map_err(|e| Error::malformed(origin, e.to_string()))?;

        let layers = LAYER_SHAPES
            .iter()
            .enumerate()
            .map(|(i, &(in_dim, out_dim))| {
                let gain = 1.0 / (in_dim as f32).sqrt();
                let weights: Vec<f32> = (0..in_dim * out_dim).map(|_| next() * gain * 1.5).collect();
                let bias: Vec<f32> = (0..out_dim).map(|_| next() * 0.1).collect();
                let input_scale = if i == 0 { 1.0 / 127.0 } else { 4.0 / 127.0 };
                QuantizedLayer::from_f32(in_dim, out_dim, &weights, bias, input_scale)
            })
            .collect::<std::result::Result<Vec<_>, _>>();

        let mlp = layers.and_then(Mlp::new).map_err(|e| Error::malformed(origin, e.to_string()))?;
        Ok(Self { latent, mlp })
    }
}
