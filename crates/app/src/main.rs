use std::{path::PathBuf, process::ExitCode};

use beat_pulse_core::{audio, AppConfig, BeatDetector, VideoPipeline};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Render {
            image,
            audio,
            output,
            config,
        } => run_render(&image, &audio, output, config),
        Commands::Analyze {
            input,
            output,
            config,
        } => run_analyze(&input, &output, config),
        Commands::InitConfig { output } => run_init_config(&output),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

fn run_render(
    image: &PathBuf,
    audio: &PathBuf,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
) -> beat_pulse_core::Result<()> {
    let config = load_config(config)?;
    let pipeline = VideoPipeline::new(config)?;
    pipeline.prepare_directories()?;

    let written = match output {
        Some(output) => pipeline.create_video_at(image, audio, &output)?,
        None => pipeline.create_video(image, audio)?,
    };
    println!("{}", written.display());
    Ok(())
}

fn run_analyze(
    input: &PathBuf,
    output: &PathBuf,
    config: Option<PathBuf>,
) -> beat_pulse_core::Result<()> {
    tracing::info!(?input, ?output, "running beat analysis");
    let config = load_config(config)?;
    let signal =
        audio::decode_file(&config.encoder.ffmpeg_path, input, config.analysis.sample_rate)?;
    let analysis = BeatDetector::new(config.analysis).analyze(&signal).map_err(|err| {
        tracing::error!(error = %err, "beat analysis failed");
        err
    })?;
    tracing::info!(
        beats = analysis.summary.beat_count,
        tempo_bpm = ?analysis.summary.tempo_bpm,
        "analysis complete"
    );
    std::fs::write(output, serde_json::to_vec_pretty(&analysis)?)?;
    Ok(())
}

fn run_init_config(output: &PathBuf) -> beat_pulse_core::Result<()> {
    let json = serde_json::to_string_pretty(&AppConfig::default())?;
    std::fs::write(output, json)?;
    tracing::info!(?output, "wrote default configuration");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> beat_pulse_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_json_file(&path).map_err(|err| {
            tracing::error!(?path, error = %err, "could not load configuration");
            err
        }),
        None => Ok(AppConfig::default()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Pulse a still image in time with an audio track", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a beat-synchronised video from an image and an audio file.
    Render {
        /// Still image to animate.
        #[arg(short, long)]
        image: PathBuf,
        /// Audio track that drives the pulse and is muxed into the video.
        #[arg(short, long)]
        audio: PathBuf,
        /// Where to write the video. Defaults to the configured output path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Detect beats in an audio file and write them as JSON.
    Analyze {
        /// Path to the audio file that should be analysed.
        input: PathBuf,
        /// Output path for the beat timeline.
        output: PathBuf,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write the default configuration to a file.
    InitConfig {
        /// Destination of the JSON configuration.
        output: PathBuf,
    },
}
