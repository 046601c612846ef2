use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use faceblur_core::blurring::infrastructure::cpu_rectangular_blurrer::CpuRectangularBlurrer;
use faceblur_core::classification::domain::attribute_classifier::ClassifierSet;
use faceblur_core::classification::domain::classifier_kind::ClassifierKind;
use faceblur_core::classification::infrastructure::onnx_attribute_classifier::OnnxAttributeClassifier;
use faceblur_core::detection::infrastructure::onnx_face_detector::OnnxFaceDetector;
use faceblur_core::inference::inference_coordinator::{CoordinatorConfig, InferenceCoordinator};
use faceblur_core::pipeline::live_blur_use_case::{LiveBlurUseCase, RenderCadence};
use faceblur_core::pipeline::pipeline_logger::SummaryPipelineLogger;
use faceblur_core::rendering::compositor::Compositor;
use faceblur_core::rendering::domain::display_surface::SurfaceSize;
use faceblur_core::rendering::domain::exemption_policy::{ExemptLabelPair, ExemptionPolicy};
use faceblur_core::rendering::infrastructure::png_sequence_surface::PngSequenceSurface;
use faceblur_core::shared::constants::{YOLO_MODEL_NAME, YOLO_MODEL_URL};
use faceblur_core::shared::model_resolver::{self, ModelSource};
use faceblur_core::shared::settings::PipelineSettings;
use faceblur_core::source::domain::frame_source::FrameSource;
use faceblur_core::source::infrastructure::image_sequence_source::ImageSequenceSource;

/// Selectively blurs faces in an image sequence, leaving one exempt
/// (gender, race) pair visible.
#[derive(Parser)]
#[command(name = "faceblur")]
struct Cli {
    /// Directory of input frames, read in file name order.
    input: PathBuf,

    /// Directory the composited frames are written to.
    output: PathBuf,

    /// ONNX gender classifier.
    #[arg(long)]
    gender_model: PathBuf,

    /// ONNX race classifier.
    #[arg(long)]
    race_model: PathBuf,

    /// ONNX face detector. Downloaded and cached when omitted.
    #[arg(long)]
    detector_model: Option<PathBuf>,

    /// Settings file. Defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_config: bool,

    /// Classification tasks allowed to run at once.
    #[arg(long)]
    permits: Option<usize>,

    /// Gender label of the exempt pair.
    #[arg(long)]
    exempt_gender: Option<String>,

    /// Race label of the exempt pair.
    #[arg(long)]
    exempt_race: Option<String>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Gaussian blur kernel size (must be odd).
    #[arg(long)]
    blur_strength: Option<usize>,

    /// Abandon an inference cycle stuck for this many milliseconds.
    #[arg(long)]
    stall_timeout_ms: Option<u64>,

    /// Output surface size as WIDTHxHEIGHT. Defaults to the first frame's size.
    #[arg(long, value_parser = parse_surface)]
    surface: Option<SurfaceSize>,

    /// Pace frames at this rate, as a camera would deliver them.
    #[arg(long)]
    fps: Option<f64>,

    /// Render every frame, including the ones inference skipped.
    #[arg(long)]
    every_frame: bool,

    /// Seconds to wait for in-flight inference once input ends.
    #[arg(long, default_value = "10")]
    drain_timeout: u64,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    if !cli.input.is_dir() {
        return Err(format!("Input directory not found: {}", cli.input.display()).into());
    }
    if let Some(fps) = cli.fps {
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(format!("FPS must be positive, got {fps}").into());
        }
    }

    let settings_path = cli.config.clone().or_else(PipelineSettings::default_path);
    let settings = apply_overrides(
        PipelineSettings::load_or_default(settings_path.as_deref())?,
        &cli,
    );
    settings.validate()?;
    if cli.save_config {
        if let Some(path) = &settings_path {
            settings.save(path)?;
            log::info!("Settings saved to {}", path.display());
        }
    }

    let detector = build_detector(&cli, &settings)?;
    let classifiers = build_classifiers(&cli)?;
    let coordinator = InferenceCoordinator::with_logger(
        detector,
        classifiers,
        CoordinatorConfig::from(&settings),
        Box::new(SummaryPipelineLogger::default()),
    )?;

    let mut source = ImageSequenceSource::open(&cli.input, cli.fps)?;
    let size = match cli.surface {
        Some(size) => size,
        None => first_frame_size(&cli.input)?,
    };
    let surface = PngSequenceSurface::new(&cli.output, size)?;
    let compositor = Compositor::new(
        Box::new(CpuRectangularBlurrer::new(settings.blur_strength)),
        ExemptionPolicy::new(settings.exempt_labels.clone()),
    );
    let cadence = if cli.every_frame {
        RenderCadence::EveryFrame
    } else {
        RenderCadence::AdmittedFrames
    };

    let mut use_case = LiveBlurUseCase::new(coordinator, compositor, Box::new(surface), cadence, None)
        .with_drain_timeout(Duration::from_secs(cli.drain_timeout));
    let report = use_case.execute(&mut source);
    eprintln!();

    log::info!(
        "{} frame(s) read, {} rendered to {}, {} admitted, {} dropped, {} unreadable",
        report.frames,
        report.rendered,
        cli.output.display(),
        report.stats.admitted,
        report.stats.dropped,
        report.source_errors
    );
    if !report.drained {
        return Err("inference did not settle before the drain timeout".into());
    }
    Ok(())
}

fn apply_overrides(mut settings: PipelineSettings, cli: &Cli) -> PipelineSettings {
    if let Some(permits) = cli.permits {
        settings.classification_permits = permits;
    }
    if cli.exempt_gender.is_some() || cli.exempt_race.is_some() {
        let current = settings.exempt_labels;
        settings.exempt_labels = ExemptLabelPair::new(
            cli.exempt_gender.clone().unwrap_or(current.gender),
            cli.exempt_race.clone().unwrap_or(current.race),
        );
    }
    if let Some(confidence) = cli.confidence {
        settings.detection_confidence = confidence;
    }
    if let Some(strength) = cli.blur_strength {
        settings.blur_strength = strength;
    }
    if cli.stall_timeout_ms.is_some() {
        settings.stall_timeout_ms = cli.stall_timeout_ms;
    }
    settings
}

fn build_detector(
    cli: &Cli,
    settings: &PipelineSettings,
) -> Result<Arc<OnnxFaceDetector>, Box<dyn std::error::Error + Send + Sync>> {
    let source = match &cli.detector_model {
        Some(path) => ModelSource::File(path.clone()),
        None => ModelSource::Download {
            name: YOLO_MODEL_NAME.to_string(),
            url: YOLO_MODEL_URL.to_string(),
        },
    };
    log::info!("Resolving face detection model: {source:?}");
    let model_path = model_resolver::resolve(&source, Some(Box::new(download_progress)))?;
    if cli.detector_model.is_none() {
        eprintln!();
    }
    Ok(Arc::new(OnnxFaceDetector::new(&model_path, settings.detection_confidence)?))
}

fn build_classifiers(cli: &Cli) -> Result<ClassifierSet, Box<dyn std::error::Error + Send + Sync>> {
    let load = |path: &PathBuf, kind: ClassifierKind| -> Result<_, Box<dyn std::error::Error + Send + Sync>> {
        let model_path = model_resolver::resolve(&ModelSource::File(path.clone()), None)?;
        log::info!("Loading {kind} classifier from {}", model_path.display());
        Ok(Arc::new(OnnxAttributeClassifier::new(&model_path, kind.labels())?))
    };
    Ok(ClassifierSet::new(
        load(&cli.gender_model, ClassifierKind::Gender)?,
        load(&cli.race_model, ClassifierKind::Race)?,
    ))
}

fn first_frame_size(input: &Path) -> Result<SurfaceSize, Box<dyn std::error::Error + Send + Sync>> {
    let mut source = ImageSequenceSource::open(input, None)?;
    let frame = source
        .next_frame()?
        .ok_or_else(|| format!("No images found in {}", input.display()))?;
    Ok(SurfaceSize::new(frame.width(), frame.height()))
}

fn parse_surface(value: &str) -> Result<SurfaceSize, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = w.trim().parse().map_err(|e| format!("bad width '{w}': {e}"))?;
    let height: u32 = h.trim().parse().map_err(|e| format!("bad height '{h}': {e}"))?;
    let size = SurfaceSize::new(width, height);
    if size.is_empty() {
        return Err(format!("surface must be non-empty, got '{value}'"));
    }
    Ok(size)
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
