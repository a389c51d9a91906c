use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod analyse;
mod check;

#[derive(Parser)]
#[command(name = "presence", version, about = "Presence operator tools")]
struct Cli {
    /// Directory containing the ONNX models (defaults to the daemon's model dir).
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the required models against the SHA256SUMS manifest.
    CheckModels,
    /// Run the liveness evaluator over a selfie video and print the verdict.
    Liveness {
        video: PathBuf,
        /// Maximum number of frames to analyse.
        #[arg(long, default_value_t = 75)]
        max_frames: usize,
        /// Fail the verdict when no audio is present.
        #[arg(long)]
        require_audio: bool,
    },
    /// Measure the audio level of a video and print the presence decision.
    Audio {
        video: PathBuf,
        /// RMS level that must be exceeded.
        #[arg(long, default_value_t = 0.005)]
        threshold: f32,
        /// Seconds of audio to analyse.
        #[arg(long, default_value_t = 3.0)]
        duration: f32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let model_dir = cli.model_dir.unwrap_or_else(presence_core::default_model_dir);

    match cli.command {
        Command::CheckModels => check::run(&model_dir),
        Command::Liveness {
            video,
            max_frames,
            require_audio,
        } => analyse::liveness(&model_dir, &video, max_frames, require_audio),
        Command::Audio {
            video,
            threshold,
            duration,
        } => analyse::audio(&video, threshold, duration),
    }
}
