//! splat-train: fit a scene to synthetic views of a reference snapshot
//!
//! The reference snapshot is rendered from an orbit of cameras; those
//! renders (with their depth) become the training photographs. The fitted
//! scene starts from `--init` or from jittered, gray copies of the
//! reference primitive centers.
//!
//! Usage:
//!   splat-train --target reference.ply --out fitted.ply [--init start.ply] [--kind gaussians|triangles]
//!               [--views 24] [--width 256] [--height 256] [--iterations N] [--config train.json]
//!               [--seed 0] [--jitter 0.05] [--preview-dir DIR]

use anyhow::{bail, Context};
use log::{info, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::path::{Path, PathBuf};
use tile_splat::core::camera::orbit_cameras;
use tile_splat::core::init::{gaussians_from_points, scene_extent, triangles_from_points};
use tile_splat::core::{Camera, PointCloud};
use tile_splat::io::{load_snapshot, save_image, save_snapshot};
use tile_splat::optim::events::LogSink;
use tile_splat::optim::{IterationStats, TrainConfig, Trainer, TrainingEventSink, TrainingView};
use tile_splat::{forward, PrimitiveStore, RenderOutput, Scene};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gaussians,
    Triangles,
}

struct Args {
    target: PathBuf,
    out: PathBuf,
    init: Option<PathBuf>,
    kind: Option<Kind>,
    views: usize,
    width: u32,
    height: u32,
    fov_deg: f32,
    iterations: Option<usize>,
    config: Option<PathBuf>,
    seed: Option<u64>,
    jitter: f32,
    init_opacity: f32,
    preview_dir: Option<PathBuf>,
}

fn value<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<T> {
    let raw = args.next().with_context(|| format!("missing value for {flag}"))?;
    raw.parse().map_err(|_| anyhow::anyhow!("invalid value for {flag}: '{raw}'"))
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut target = None;
    let mut parsed = Args {
        target: PathBuf::new(),
        out: PathBuf::from("fitted.ply"),
        init: None,
        kind: None,
        views: 24,
        width: 256,
        height: 256,
        fov_deg: 50.0,
        iterations: None,
        config: None,
        seed: None,
        jitter: 0.05,
        init_opacity: 0.1,
        preview_dir: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--target" => target = Some(PathBuf::from(value::<String>(&mut args, &arg)?)),
            "--out" => parsed.out = PathBuf::from(value::<String>(&mut args, &arg)?),
            "--init" => parsed.init = Some(PathBuf::from(value::<String>(&mut args, &arg)?)),
            "--kind" => {
                parsed.kind = Some(match value::<String>(&mut args, &arg)?.as_str() {
                    "gaussians" => Kind::Gaussians,
                    "triangles" => Kind::Triangles,
                    other => bail!("unknown kind '{other}' (expected gaussians or triangles)"),
                })
            }
            "--views" => parsed.views = value(&mut args, &arg)?,
            "--width" => parsed.width = value(&mut args, &arg)?,
            "--height" => parsed.height = value(&mut args, &arg)?,
            "--fov" => parsed.fov_deg = value(&mut args, &arg)?,
            "--iterations" => parsed.iterations = Some(value(&mut args, &arg)?),
            "--config" => parsed.config = Some(PathBuf::from(value::<String>(&mut args, &arg)?)),
            "--seed" => parsed.seed = Some(value(&mut args, &arg)?),
            "--jitter" => parsed.jitter = value(&mut args, &arg)?,
            "--init-opacity" => parsed.init_opacity = value(&mut args, &arg)?,
            "--preview-dir" => parsed.preview_dir = Some(PathBuf::from(value::<String>(&mut args, &arg)?)),
            "--help" | "-h" => {
                println!("usage: splat-train --target reference.ply [--out fitted.ply] [--init start.ply]");
                println!("                   [--kind gaussians|triangles] [--views N] [--width W] [--height H] [--fov DEG]");
                println!("                   [--iterations N] [--config train.json] [--seed S] [--jitter X]");
                println!("                   [--init-opacity P] [--preview-dir DIR]");
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }

    parsed.target = target.context("--target is required")?;
    if parsed.views == 0 || parsed.width == 0 || parsed.height == 0 {
        bail!("--views, --width and --height must be positive");
    }
    if !(parsed.init_opacity > 0.0 && parsed.init_opacity < 1.0) {
        bail!("--init-opacity must be in (0, 1)");
    }
    Ok(parsed)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TrainConfig> {
    let Some(path) = path else {
        return Ok(TrainConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Two rings of cameras, above and below the equator.
fn training_cameras(reference: &Scene, args: &Args) -> Vec<Camera> {
    let centers = reference.centers();
    let center = if centers.is_empty() {
        Vector3::zeros()
    } else {
        centers.iter().sum::<Vector3<f32>>() / centers.len() as f32
    };
    let radius = scene_extent(&centers) * 2.5;
    let upper = args.views.div_ceil(2);
    let fov = args.fov_deg.to_radians();
    let mut cameras = orbit_cameras(&center, radius, 0.35, upper, fov, args.width, args.height);
    cameras.extend(orbit_cameras(&center, radius, -0.35, args.views - upper, fov, args.width, args.height));
    cameras
}

fn render_views(reference: &Scene, cameras: Vec<Camera>, config: &TrainConfig) -> anyhow::Result<Vec<TrainingView>> {
    cameras
        .into_iter()
        .map(|camera| -> anyhow::Result<TrainingView> {
            let output = forward(&camera, reference, reference.sh_degree(), &config.render)?;
            let mut view = TrainingView::new(camera, output.color);
            if config.loss.lambda_depth > 0.0 {
                view.depth = Some(output.depth);
            }
            Ok(view)
        })
        .collect()
}

fn seed_scene(reference: &Scene, args: &Args, sh_degree: usize, rng: &mut StdRng) -> Scene {
    let centers = reference.centers();
    let sigma = args.jitter * scene_extent(&centers);
    let positions: Vec<Vector3<f32>> = centers
        .iter()
        .map(|c| {
            let noise = Vector3::from_fn(|_, _| rng.sample::<f32, _>(StandardNormal));
            c + noise * sigma
        })
        .collect();
    let colors = vec![Vector3::repeat(0.5); positions.len()];
    let points = PointCloud::new(positions, colors);

    let kind = args.kind.unwrap_or(match reference {
        Scene::Gaussians(_) => Kind::Gaussians,
        Scene::Triangles(_) => Kind::Triangles,
    });
    match kind {
        Kind::Gaussians => gaussians_from_points(&points, sh_degree, args.init_opacity).into(),
        Kind::Triangles => triangles_from_points(&points, sh_degree, args.init_opacity, rng).into(),
    }
}

/// Logs progress and writes previews and intermediate snapshots to disk.
struct CliSink {
    log: LogSink,
    preview_dir: Option<PathBuf>,
}

impl TrainingEventSink for CliSink {
    fn on_loss(&mut self, stats: &IterationStats) {
        self.log.on_loss(stats);
    }

    fn on_image(&mut self, iteration: usize, view: usize, output: &RenderOutput) {
        let Some(dir) = &self.preview_dir else {
            return;
        };
        let path = dir.join(format!("iter_{iteration:06}_view_{view:03}.png"));
        if let Err(e) = save_image(&path, &output.color, output.width, output.height) {
            warn!("could not write {}: {e}", path.display());
        }
    }

    fn on_snapshot(&mut self, iteration: usize, scene: &Scene) {
        let Some(dir) = &self.preview_dir else {
            return;
        };
        let path = dir.join(format!("snapshot_{iteration:06}.ply"));
        if let Err(e) = save_snapshot(scene, &path) {
            warn!("could not write {}: {e}", path.display());
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;
    info!("splat-train v{}", tile_splat::VERSION);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let reference = load_snapshot(&args.target).with_context(|| format!("loading {}", args.target.display()))?;
    if reference.is_empty() {
        bail!("{} holds no primitives", args.target.display());
    }
    info!("reference: {} {}", reference.len(), reference.kind_name());

    let views = render_views(&reference, training_cameras(&reference, &args), &config)?;
    info!("rendered {} training views at {}x{}", views.len(), args.width, args.height);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let initial = match &args.init {
        Some(path) => load_snapshot(path).with_context(|| format!("loading {}", path.display()))?,
        None => seed_scene(&reference, &args, reference.sh_degree(), &mut rng),
    };

    if let Some(dir) = &args.preview_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut sink = CliSink {
        log: LogSink { every: 100 },
        preview_dir: args.preview_dir.clone(),
    };

    let mut trainer = Trainer::new(initial, views, config)?;
    let report = trainer.run(&mut sink)?;
    match report.last {
        Some(last) => info!(
            "done: {} iterations ({} skipped), loss {:.5}, psnr {:.2}, {} primitives",
            report.iterations_run, report.skipped_steps, last.loss, last.psnr, report.num_primitives
        ),
        None => warn!("done: no iteration produced an update"),
    }

    save_snapshot(trainer.scene(), &args.out).with_context(|| format!("writing {}", args.out.display()))?;
    info!("saved {}", args.out.display());
    Ok(())
}
