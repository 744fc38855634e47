use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use visaphoto::{CropPlan, OutputFormat, PhotoProcessor, PlannerConfig, Resize};

use crate::args::CliArgs;

/// JSON printed by `--plan-only`.
#[derive(Serialize)]
struct PlanReport<'a> {
    input: &'a Path,
    stage1: Resize,
    plan: CropPlan,
}

pub fn run(args: &CliArgs) -> Result<()> {
    run_with_output(args, &mut io::stdout().lock())
}

/// `run`, with the plan JSON and data URL written to `out`.
fn run_with_output(args: &CliArgs, out: &mut impl Write) -> Result<()> {
    let config = load_planner_config(args)?;
    let mut processor = PhotoProcessor::new()
        .planner_config(config)?
        .format(args.format.into())
        .quality(args.quality);

    match &args.model {
        Some(model) => processor = attach_detector(processor, model)?,
        None => warn!("no face detection model given, photos will be center-cropped"),
    }

    let input = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    if args.plan_only {
        let (stage1, plan) = processor.plan(&input)?;
        let report = PlanReport {
            input: &args.input,
            stage1,
            plan,
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    let result = processor.process(&input)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, result.format));
    fs::write(&output, &result.data)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        output = %output.display(),
        bytes = result.data.len(),
        "visa photo written"
    );

    if args.data_url {
        writeln!(out, "{}", result.to_data_url())?;
    }
    Ok(())
}

/// Planner constants from `--config`, with individual flags layered on top.
fn load_planner_config(args: &CliArgs) -> Result<PlannerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => PlannerConfig::default(),
    };

    if let Some(ratio) = args.head_height_ratio {
        config.head_height_ratio = ratio;
    }
    if let Some(multiplier) = args.face_to_head_multiplier {
        config.face_to_head_multiplier = multiplier;
    }
    if let Some(offset) = args.vertical_face_offset {
        config.vertical_face_offset = offset;
    }
    Ok(config)
}

fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    input.with_file_name(format!("{stem}_visa.{}", format.extension()))
}

#[cfg(feature = "rustface")]
fn attach_detector(processor: PhotoProcessor, model: &Path) -> Result<PhotoProcessor> {
    let detector = visaphoto::RustfaceDetector::from_file(model)?;
    Ok(processor.face_detector(detector))
}

#[cfg(not(feature = "rustface"))]
fn attach_detector(_processor: PhotoProcessor, model: &Path) -> Result<PhotoProcessor> {
    anyhow::bail!(
        "--model {} needs face detection; rebuild with `--features rustface`",
        model.display()
    )
}
