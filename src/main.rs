use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use dualcam_rectify::image_pipeline::{
    CalibrationStore, CameraId, CameraSource, CaptureOrchestrator, DirectorySink, PipelineConfig,
    ReplayCamera,
};
use dualcam_rectify::logger;

use tracing::{error, info, warn};

const USAGE: &str =
    "usage: dualcam_rectify <calibration.json> <cam0-raw> <cam1-raw> <output-dir> [pipeline.json]";

fn main() -> anyhow::Result<()> {
    logger::init();

    let args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if !(4..=5).contains(&args.len()) {
        bail!(USAGE);
    }
    let (calibration_path, cam0_raw, cam1_raw, output_dir) =
        (&args[0], &args[1], &args[2], &args[3]);

    info!("Starting dualcam_rectify...");

    let config = match args.get(4) {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading pipeline config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let calibration = Arc::new(CalibrationStore::load(calibration_path));
    if let Some(e) = calibration.last_error() {
        warn!("Running with default profiles: {}", e);
    }

    let cam0: Arc<dyn CameraSource> =
        Arc::new(ReplayCamera::new(CameraId::Cam0, [cam0_raw.clone()]));
    let cam1: Arc<dyn CameraSource> =
        Arc::new(ReplayCamera::new(CameraId::Cam1, [cam1_raw.clone()]));
    let sink = DirectorySink::new(output_dir);

    info!("Layout: {}", config.compositor.layout.name());
    info!("Compression: {:?}", config.encoding.compression);
    info!("Output directory: {}", sink.root().display());

    let orchestrator = CaptureOrchestrator::new(cam0, cam1, calibration, sink, config);
    let result = orchestrator.trigger_capture();
    result.timings.log_summary();

    for artifact in &result.stored {
        info!(kind = %artifact.kind, "Stored {}", artifact.identifier);
    }

    if result.is_done() {
        info!("{}", result.reason());
        Ok(())
    } else {
        error!("{}", result.reason());
        bail!(result.reason())
    }
}
