use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use visaphoto::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "visaphoto", version, about = "Crop a photo to a 350x450 visa photo")]
pub struct CliArgs {
    /// Input image (JPEG, PNG or WebP)
    pub input: PathBuf,

    /// Output file (defaults to `<input>_visa.<ext>` next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value_t = FormatArg::Png)]
    pub format: FormatArg,

    /// JPEG quality from 0.0 to 1.0
    #[arg(long, default_value_t = 0.9)]
    pub quality: f32,

    /// JSON file with planner constants; flags below override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Target head height as a fraction of the normalized image height
    #[arg(long)]
    pub head_height_ratio: Option<f64>,

    /// Multiplier from detected face height to full head height
    #[arg(long)]
    pub face_to_head_multiplier: Option<f64>,

    /// Fraction of the output height above the face center
    #[arg(long)]
    pub vertical_face_offset: Option<f64>,

    /// SeetaFace model file for face detection (needs the `rustface` feature)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Print the result as a `data:` URL on stdout
    #[arg(long, default_value_t = false)]
    pub data_url: bool,

    /// Print the stage-1 resize and crop plan as JSON instead of writing an image
    #[arg(long, default_value_t = false)]
    pub plan_only: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Png,
    Jpeg,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
        }
    }
}
