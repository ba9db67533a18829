use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use warden::configuration::config::Config;
use warden::configuration::types::ReplayConfig;
use warden::data_capture::replay::Replayer;
use warden::data_capture::ttyrec::{CaptureReader, CaptureSummary};
use warden::error_handling::types::{CaptureError, ConfigError};

#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Inspect and replay ttyrec captures recorded by the warden session relay")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, short, env = "WARDEN_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a summary of a capture file
    Inspect {
        file: PathBuf,
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Play a capture back on stdout with its recorded timing
    Replay {
        file: PathBuf,
        /// Playback speed multiplier
        #[arg(long, short)]
        speed: Option<f64>,
        /// Cap on any single pause, in seconds
        #[arg(long)]
        max_idle: Option<f64>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => Config::default(),
    };

    let result = match args.command {
        Command::Inspect { file, json } => inspect(&file, json).await,
        Command::Replay {
            file,
            speed,
            max_idle,
        } => {
            let settings = replay_settings(&config, speed, max_idle).unwrap_or_else(|e| {
                error!("{}", e);
                std::process::exit(1);
            });
            replay(&file, &settings).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn inspect(file: &Path, json: bool) -> Result<(), CaptureError> {
    let mut reader = CaptureReader::open(file).await?;
    let summary = CaptureSummary::scan(&mut reader).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|e| CaptureError::IoError(std::io::Error::other(e)))?;
        println!("{}", rendered);
    } else {
        println!("{}", file.display());
        println!("{}", summary);
    }
    Ok(())
}

/// Applies command line overrides on top of the `[replay]` section.
fn replay_settings(
    config: &Config,
    speed: Option<f64>,
    max_idle: Option<f64>,
) -> Result<ReplayConfig, ConfigError> {
    let mut settings = config.replay.clone();
    if let Some(speed) = speed {
        settings.speed = speed;
    }
    if max_idle.is_some() {
        settings.max_idle_secs = max_idle;
    }
    settings.validate()?;
    Ok(settings)
}

async fn replay(file: &Path, settings: &ReplayConfig) -> Result<(), CaptureError> {
    let mut reader = CaptureReader::open(file).await?;
    let mut stdout = tokio::io::stdout();
    let stats = Replayer::from_config(settings)
        .play(&mut reader, &mut stdout)
        .await?;
    stdout.flush().await?;

    info!(
        "Replayed {} records ({} bytes) from {}",
        stats.records,
        stats.bytes,
        file.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay_args() {
        let args = Args::try_parse_from(["warden", "replay", "session.ttyrec", "--speed", "2"])
            .expect("valid arguments");
        match args.command {
            Command::Replay { file, speed, max_idle } => {
                assert_eq!(file, PathBuf::from("session.ttyrec"));
                assert_eq!(speed, Some(2.0));
                assert_eq!(max_idle, None);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_parse_inspect_with_config() {
        let args = Args::try_parse_from([
            "warden",
            "inspect",
            "--json",
            "--config",
            "/etc/warden.toml",
            "capture.ttyrec",
        ])
        .expect("valid arguments");
        assert_eq!(args.config, Some(PathBuf::from("/etc/warden.toml")));
        assert!(matches!(args.command, Command::Inspect { json: true, .. }));
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Args::try_parse_from(["warden"]).is_err());
    }

    #[test]
    fn test_replay_overrides_are_validated() {
        let config = Config::default();

        let settings = replay_settings(&config, Some(4.0), Some(0.5)).unwrap();
        assert_eq!(settings.speed, 4.0);
        assert_eq!(settings.max_idle_secs, Some(0.5));
        assert_eq!(replay_settings(&config, None, None).unwrap(), config.replay);

        for (speed, max_idle) in [(Some(1e-300), None), (Some(f64::NAN), None), (None, Some(1e20))] {
            let err = replay_settings(&config, speed, max_idle).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(_)));
        }
    }

    #[tokio::test]
    async fn test_inspect_missing_file() {
        let err = inspect(Path::new("/nonexistent/session.ttyrec"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::OpenFailed(_)));
    }
}
