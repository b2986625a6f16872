//! nbtf - Neural BTF toolkit: catalogs, weights assets and offline renders.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use neural_btf::environment::{EquirectEnvironment, UniformEnvironment};
use neural_btf::heightfield::HeightField;
use neural_btf::model::{Catalog, ModelInfo, ModelRegistry, WeightsAsset};
use neural_btf::scene::TriangleScene;
use neural_btf::settings::PipelineSettings;
use neural_btf::util::{Vec2, Vec3};
use neural_btf::NeuralMatPipeline;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const CATALOG_FILE: &str = "catalog.json";

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            _ => filtered_args.push(arg),
        }
    }
    let _guard = init_tracing(level);

    let Some(&command) = filtered_args.first() else {
        print_help();
        return Ok(());
    };
    let rest = &filtered_args[1..];

    match command {
        "catalog" | "c" => cmd_catalog(rest.first().map(Path::new)),
        "inspect" | "i" => {
            let Some(path) = rest.first() else {
                bail!("missing asset argument\nUsage: nbtf inspect <file.nbtf>");
            };
            cmd_inspect(Path::new(path))
        }
        "demo" | "d" => {
            let Some(dir) = rest.first() else {
                bail!("missing directory argument\nUsage: nbtf demo <dir>");
            };
            cmd_demo(Path::new(dir))
        }
        "render" | "r" => cmd_render(&RenderArgs::parse(rest)?),
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            bail!("unknown command: {other}")
        }
    }
}

fn print_version() {
    println!(
        "nbtf {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("NBTF_BUILD_DATE"),
        env!("NBTF_BUILD_TIME")
    );
}

fn print_help() {
    println!("nbtf - Neural BTF toolkit");
    println!();
    println!("USAGE:");
    println!("    nbtf [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    c, catalog [file]             List catalog entries (built-in list if no file)");
    println!("    i, inspect <file.nbtf>        Print the header of a weights asset");
    println!("    d, demo    <dir>              Write a synthetic catalog, weights and height fields");
    println!("    r, render  <catalog> [opts]   Render a lit quad and save the display image");
    println!("    h, help                       Show this help");
    println!();
    println!("RENDER OPTIONS:");
    println!("    --model NAME      Catalog entry (default: settings, then first entry)");
    println!("    --size WxH        Image size (default 256x256)");
    println!("    --frames N        Frames to run (default 1)");
    println!("    --out FILE        Output image (default render.png)");
    println!("    --env FILE        Equirectangular HDR/EXR environment");
    println!("    --settings FILE   Settings JSON (default: user config dir)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose     Show debug output");
    println!("    -vv, --trace      Show trace output (very verbose)");
    println!("    -q, --quiet       Errors only");
    println!("    -V, --version     Print version and build date");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG          Overrides the log filter");
    println!("    NBTF_TRACE=1      Write trace.json (chrome-trace feature)");
}

#[cfg(feature = "chrome-trace")]
type TraceGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "chrome-trace"))]
type TraceGuard = ();

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(feature = "chrome-trace")]
fn init_tracing(level: &str) -> TraceGuard {
    let fmt = tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr);
    if env::var("NBTF_TRACE").ok().as_deref() == Some("1") {
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .file("trace.json")
            .build();
        let _ = tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt)
            .with(chrome_layer)
            .try_init();
        return Some(guard);
    }
    let _ = tracing_subscriber::registry().with(env_filter(level)).with(fmt).try_init();
    None
}

#[cfg(not(feature = "chrome-trace"))]
fn init_tracing(level: &str) -> TraceGuard {
    let fmt = tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry().with(env_filter(level)).with(fmt).try_init();
}

// ============================================================================
// catalog / inspect
// ============================================================================

fn cmd_catalog(path: Option<&Path>) -> anyhow::Result<()> {
    let catalog = match path {
        Some(p) => Catalog::load(p).with_context(|| format!("loading catalog {}", p.display()))?,
        None => Catalog::builtin("."),
    };
    println!("Asset root: {}", catalog.root().display());
    println!("Models:     {}", catalog.len());
    for (i, m) in catalog.models().iter().enumerate() {
        println!();
        println!("[{i}] {}", m.name);
        println!("    asset:        {}", m.asset);
        println!("    height field: {}", m.height_field);
        println!("    range:        {}", if m.hdr { "hdr" } else { "sdr" });
        let scales: Vec<String> = m.scales.iter().map(|s| format!("{s:.4e}")).collect();
        println!("    scales:       {}", scales.join(" "));
    }
    Ok(())
}

fn cmd_inspect(path: &Path) -> anyhow::Result<()> {
    let header = WeightsAsset::inspect(path).with_context(|| format!("reading {}", path.display()))?;
    println!("File:        {}", path.display());
    println!("Size:        {} bytes{}", header.file_size, if header.compressed { " (gzip)" } else { "" });
    println!("Version:     {}", header.version);
    println!(
        "Latent:      {0}x{0}x{1}, scale {2:.4e}",
        header.latent_resolution, header.latent_channels, header.latent_scale
    );
    println!("Layers:      {}", header.layers.len());
    for (i, (input, output)) in header.layers.iter().enumerate() {
        println!("  [{i}] {input:>3} -> {output:<3}");
    }
    Ok(())
}

// ============================================================================
// demo
// ============================================================================

fn demo_model(name: &str, asset: &str, hdr: bool) -> ModelInfo {
    let s = 1.0 / 127.0;
    ModelInfo {
        name: name.into(),
        asset: asset.into(),
        height_field: format!("{asset}.png"),
        hdr,
        scales: [s, 0.0, s, 0.0, s, 0.0, s, 0.0],
    }
}

fn cmd_demo(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let models = vec![
        demo_model("Demo Weave", "demo_weave", false),
        demo_model("Demo Tile", "demo_tile", true),
    ];
    let fields: [fn(Vec2) -> f32; 2] = [
        |uv| 0.5 + 0.25 * ((uv.x * 8.0 * std::f32::consts::TAU).sin() * (uv.y * 8.0 * std::f32::consts::TAU).cos()),
        |uv| {
            let g = (uv * 4.0).fract();
            if g.x < 0.06 || g.y < 0.06 { 0.2 } else { 0.9 }
        },
    ];

    for (i, (m, field)) in models.iter().zip(fields).enumerate() {
        let weights = WeightsAsset::synthetic(i as u64 + 1, 32)?;
        let asset_path = dir.join(format!("{}.nbtf", m.asset));
        weights.write(&asset_path)?;
        HeightField::from_fn(128, 128, field).save(&dir.join(&m.height_field))?;
        println!("wrote {} ({})", asset_path.display(), m.name);
    }

    let catalog_path = dir.join(CATALOG_FILE);
    Catalog::new(dir, models)?.save(&catalog_path)?;
    println!("wrote {}", catalog_path.display());
    Ok(())
}

// ============================================================================
// render
// ============================================================================

struct RenderArgs {
    catalog: PathBuf,
    model: Option<String>,
    size: (u32, u32),
    frames: u32,
    out: PathBuf,
    env: Option<PathBuf>,
    settings: Option<PathBuf>,
}

impl RenderArgs {
    fn parse(args: &[&str]) -> anyhow::Result<Self> {
        let mut it = args.iter();
        let Some(catalog) = it.next() else {
            bail!("missing catalog argument\nUsage: nbtf render <catalog.json> [--model NAME] [--size WxH] [--frames N] [--out FILE]");
        };
        let mut parsed = Self {
            catalog: PathBuf::from(catalog),
            model: None,
            size: (256, 256),
            frames: 1,
            out: PathBuf::from("render.png"),
            env: None,
            settings: None,
        };
        while let Some(&flag) = it.next() {
            let mut value = || it.next().copied().with_context(|| format!("{flag} needs a value"));
            match flag {
                "--model" | "-m" => parsed.model = Some(value()?.to_string()),
                "--size" | "-s" => parsed.size = parse_size(value()?)?,
                "--frames" | "-n" => parsed.frames = value()?.parse().context("--frames")?,
                "--out" | "-o" => parsed.out = PathBuf::from(value()?),
                "--env" => parsed.env = Some(PathBuf::from(value()?)),
                "--settings" => parsed.settings = Some(PathBuf::from(value()?)),
                other => bail!("unknown render option: {other}"),
            }
        }
        Ok(parsed)
    }
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s.split_once('x').with_context(|| format!("size '{s}' is not WxH"))?;
    Ok((w.trim().parse().context("width")?, h.trim().parse().context("height")?))
}

fn cmd_render(args: &RenderArgs) -> anyhow::Result<()> {
    let catalog = Catalog::load(&args.catalog).with_context(|| format!("loading catalog {}", args.catalog.display()))?;

    let mut settings = match &args.settings {
        Some(p) => PipelineSettings::load(p).with_context(|| format!("loading settings {}", p.display()))?,
        None => PipelineSettings::default_path()
            .map(|p| PipelineSettings::load_or_default(&p))
            .unwrap_or_default(),
    };
    if let Some(m) = &args.model {
        settings.model = m.clone();
    }

    let registry = ModelRegistry::new(catalog, settings.scale_layout);
    let (w, h) = args.size;
    let mut pipeline = NeuralMatPipeline::new(registry, settings, w, h).context("creating pipeline")?;

    let quad = TriangleScene::quad(Vec3::ZERO, Vec3::X, Vec3::Y, 2.0, 2.0, 0);
    pipeline.set_scene(Arc::new(TriangleScene::new(quad.to_vec())))?;
    match &args.env {
        Some(p) => {
            let env = EquirectEnvironment::load(p).with_context(|| format!("loading environment {}", p.display()))?;
            pipeline.set_environment(Arc::new(env));
        }
        None => pipeline.set_environment(Arc::new(UniformEnvironment::default())),
    }

    for _ in 0..args.frames.max(1) {
        let report = pipeline.execute()?;
        tracing::info!(
            frame = report.frame,
            model = %report.model,
            valid = report.valid_pixels,
            inference_ms = report.inference_ms,
            "frame done"
        );
    }

    let timing = pipeline.timing();
    println!(
        "{} frame(s), inference last {:.2} ms, average {:.2} ms",
        timing.accumulated_frames, timing.last_ms, timing.average_ms
    );

    let display = pipeline.display_image()?;
    save_display(&args.out, &display, w, h)?;
    println!("wrote {}", args.out.display());
    Ok(())
}

/// Linear display pixels → 8-bit sRGB-ish (gamma 2.2) image.
fn save_display(path: &Path, display: &[[f32; 4]], w: u32, h: u32) -> anyhow::Result<()> {
    let encode = |v: f32| (v.clamp(0.0, 1.0).powf(1.0 / 2.2) * 255.0 + 0.5) as u8;
    let img = image::RgbaImage::from_fn(w, h, |x, y| {
        let p = display[(y * w + x) as usize];
        image::Rgba([encode(p[0]), encode(p[1]), encode(p[2]), (p[3].clamp(0.0, 1.0) * 255.0) as u8])
    });
    img.save(path).with_context(|| format!("saving {}", path.display()))?;
    Ok(())
}
