//! splat-render: render orbit frames of a scene snapshot
//!
//! Usage:
//!   splat-render --snapshot scene.ply --out-dir frames [--frames 36] [--width 640] [--height 480]
//!                [--fov 50] [--distance 2.5] [--elevation 20] [--backend array|kernel]
//!                [--config render.json] [--depth]

use anyhow::{bail, Context};
use log::info;
use std::path::PathBuf;
use tile_splat::core::camera::orbit_cameras;
use tile_splat::core::init::scene_extent;
use tile_splat::io::image::scalar_to_rgb_image;
use tile_splat::io::{load_snapshot, save_image};
use tile_splat::{forward, Backend, PrimitiveStore, RenderConfig};

struct Args {
    snapshot: PathBuf,
    out_dir: PathBuf,
    frames: usize,
    width: u32,
    height: u32,
    fov_deg: f32,
    distance: f32,
    elevation_deg: f32,
    backend: Option<Backend>,
    config: Option<PathBuf>,
    depth: bool,
}

fn value<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<T> {
    let raw = args.next().with_context(|| format!("missing value for {flag}"))?;
    raw.parse().map_err(|_| anyhow::anyhow!("invalid value for {flag}: '{raw}'"))
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut snapshot = None;
    let mut parsed = Args {
        snapshot: PathBuf::new(),
        out_dir: PathBuf::from("frames"),
        frames: 36,
        width: 640,
        height: 480,
        fov_deg: 50.0,
        distance: 2.5,
        elevation_deg: 20.0,
        backend: None,
        config: None,
        depth: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--snapshot" => snapshot = Some(PathBuf::from(value::<String>(&mut args, &arg)?)),
            "--out-dir" => parsed.out_dir = PathBuf::from(value::<String>(&mut args, &arg)?),
            "--frames" => parsed.frames = value(&mut args, &arg)?,
            "--width" => parsed.width = value(&mut args, &arg)?,
            "--height" => parsed.height = value(&mut args, &arg)?,
            "--fov" => parsed.fov_deg = value(&mut args, &arg)?,
            "--distance" => parsed.distance = value(&mut args, &arg)?,
            "--elevation" => parsed.elevation_deg = value(&mut args, &arg)?,
            "--backend" => {
                parsed.backend = Some(match value::<String>(&mut args, &arg)?.as_str() {
                    "array" => Backend::Array,
                    "kernel" => Backend::Kernel,
                    other => bail!("unknown backend '{other}' (expected array or kernel)"),
                })
            }
            "--config" => parsed.config = Some(PathBuf::from(value::<String>(&mut args, &arg)?)),
            "--depth" => parsed.depth = true,
            "--help" | "-h" => {
                println!("usage: splat-render --snapshot scene.ply [--out-dir DIR] [--frames N] [--width W] [--height H]");
                println!("                    [--fov DEG] [--distance X] [--elevation DEG] [--backend array|kernel]");
                println!("                    [--config render.json] [--depth]");
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }

    parsed.snapshot = snapshot.context("--snapshot is required")?;
    if parsed.frames == 0 || parsed.width == 0 || parsed.height == 0 {
        bail!("--frames, --width and --height must be positive");
    }
    Ok(parsed)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;
    info!("splat-render v{}", tile_splat::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<RenderConfig>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => RenderConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    let scene = load_snapshot(&args.snapshot).with_context(|| format!("loading {}", args.snapshot.display()))?;
    info!("loaded {} {} (SH degree {})", scene.len(), scene.kind_name(), scene.sh_degree());

    let centers = scene.centers();
    let center = if centers.is_empty() {
        nalgebra::Vector3::zeros()
    } else {
        centers.iter().sum::<nalgebra::Vector3<f32>>() / centers.len() as f32
    };
    let radius = scene_extent(&centers) * args.distance;
    let cameras = orbit_cameras(
        &center,
        radius,
        args.elevation_deg.to_radians(),
        args.frames,
        args.fov_deg.to_radians(),
        args.width,
        args.height,
    );

    std::fs::create_dir_all(&args.out_dir).with_context(|| format!("creating {}", args.out_dir.display()))?;
    for (i, camera) in cameras.iter().enumerate() {
        let output = forward(camera, &scene, scene.sh_degree(), &config)?;
        let path = args.out_dir.join(format!("frame_{i:04}.png"));
        save_image(&path, &output.color, output.width, output.height)
            .with_context(|| format!("writing {}", path.display()))?;
        if args.depth {
            let path = args.out_dir.join(format!("depth_{i:04}.png"));
            scalar_to_rgb_image(&output.depth, output.width, output.height)
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        info!("frame {i}: {} visible", output.num_visible());
    }
    info!("wrote {} frames to {}", cameras.len(), args.out_dir.display());
    Ok(())
}
