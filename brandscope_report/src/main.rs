use anyhow::{Context, Result, bail};
use brandscope::core_modules::heatmap_renderer::overlay_onto;
use brandscope::core_modules::image_helper::image_helper;
use brandscope::config::{BACKGROUND_ENV, CONFIG_PATH_ENV, SMOOTH_FACTOR_ENV, TIME_BINS_ENV};
use brandscope::{AnalyticsConfig, Detection, ParallelPipeline, VideoMeta};
use clap::Parser;
use std::path::PathBuf;

/// Brand exposure report for one video's detections.
#[derive(Debug, Parser)]
#[command(name = "brandscope_report", version)]
struct Args {
    /// JSON array of detections.
    input: PathBuf,

    /// Where to write the JSON report. Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    /// Video duration in seconds.
    #[arg(long)]
    duration: f64,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    #[arg(long, default_value_t = 0)]
    file_id: i64,

    /// Restrict the spatial heatmap to one brand (case-insensitive).
    #[arg(long)]
    brand: Option<String>,

    /// TOML config file. Environment overrides still apply.
    #[arg(long, env = "BRANDSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Heatmap background: transparent, white, gradient, dark or purple.
    #[arg(long)]
    background: Option<String>,

    #[arg(long)]
    smooth_factor: Option<f64>,

    #[arg(long)]
    time_bins: Option<usize>,

    /// Number of distribution workers. Defaults to the CPU count.
    #[arg(long)]
    workers: Option<usize>,

    /// Also save the spatial heatmap as a PNG.
    #[arg(long)]
    heatmap_png: Option<PathBuf>,

    /// Composite the heatmap onto this frame and save it next to the PNG.
    #[arg(long, requires = "heatmap_png")]
    frame: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // --- 1. Configuration ---
    // Command-line flags take precedence over the environment.
    let config = AnalyticsConfig::load_with(|key| {
        let flag = match key {
            CONFIG_PATH_ENV => args.config.as_ref().map(|p| p.to_string_lossy().to_string()),
            BACKGROUND_ENV => args.background.clone(),
            SMOOTH_FACTOR_ENV => args.smooth_factor.map(|v| v.to_string()),
            TIME_BINS_ENV => args.time_bins.map(|v| v.to_string()),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    })
    .context("loading configuration")?;

    // --- 2. Input ---
    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading detections from {}", args.input.display()))?;
    let detections: Vec<Detection> =
        serde_json::from_str(&raw).with_context(|| format!("parsing detections in {}", args.input.display()))?;
    if args.width == 0 || args.height == 0 {
        bail!("video dimensions must be non-zero, got {}x{}", args.width, args.height);
    }
    let video = VideoMeta::new(args.width, args.height, args.duration, args.fps);
    log::info!("loaded {} detections from {}", detections.len(), args.input.display());

    // --- 3. Analysis ---
    let pipeline = match args.workers {
        Some(workers) => ParallelPipeline::with_workers(config, workers),
        None => ParallelPipeline::new(config),
    };
    let report = pipeline
        .generate_report(&detections, &video, args.file_id, args.brand.as_deref())
        .await;
    for diagnostic in &report.diagnostics {
        log::warn!("degraded: {diagnostic}");
    }

    // --- 4. Images ---
    if let Some(png_path) = &args.heatmap_png {
        pipeline
            .pipeline()
            .save_heatmap(&report.heatmap, png_path)
            .with_context(|| format!("saving heatmap to {}", png_path.display()))?;
        log::info!("heatmap saved to {}", png_path.display());

        if let Some(frame_path) = &args.frame {
            let mut frame = image_helper::load(frame_path)
                .with_context(|| format!("loading frame {}", frame_path.display()))?;
            overlay_onto(&mut frame, &report.heatmap.image);
            let overlay_path = png_path.with_extension("overlay.png");
            image_helper::save(&overlay_path, &frame)
                .with_context(|| format!("saving overlay to {}", overlay_path.display()))?;
            log::info!("overlay saved to {}", overlay_path.display());
        }
    }

    // --- 5. Report ---
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
            log::info!("report saved to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_required_and_optional_args() {
        let args = Args::try_parse_from([
            "brandscope_report",
            "detections.json",
            "--width",
            "1920",
            "--height",
            "1080",
            "--duration",
            "60",
            "--brand",
            "Nike",
            "--background",
            "purple",
            "--time-bins",
            "12",
        ])
        .unwrap();
        assert_eq!(args.width, 1920);
        assert_eq!(args.fps, 30.0);
        assert_eq!(args.brand.as_deref(), Some("Nike"));
        assert_eq!(args.background.as_deref(), Some("purple"));
        assert_eq!(args.time_bins, Some(12));
        assert!(args.heatmap_png.is_none());
    }

    #[test]
    fn frame_requires_heatmap_png() {
        let parsed = Args::try_parse_from([
            "brandscope_report",
            "d.json",
            "--width",
            "10",
            "--height",
            "10",
            "--duration",
            "1",
            "--frame",
            "f.png",
        ]);
        assert!(parsed.is_err());
    }
}
