use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knownface_core::{EmbeddingProvider, FaceMatchService, FailureClass, MatchError};
use tracing_subscriber::EnvFilter;

mod config;
mod output;

use config::Config;

#[derive(Parser)]
#[command(name = "knownface", about = "Match a photo against a gallery of known faces")]
struct Cli {
    /// TOML config file (default: $KNOWNFACE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory of reference images
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    models: Option<PathBuf>,
    /// Euclidean distance below which two faces match
    #[arg(long, global = true)]
    threshold: Option<f32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match the faces in an image against the gallery
    Match {
        /// Query image
        image: PathBuf,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build the gallery and list enrolled identities
    Gallery {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?.with_overrides(cli.gallery, cli.models, cli.threshold);
    tracing::debug!(?config, "configuration resolved");

    let engine = knownface_models::spawn_engine_from_dir(&config.model_dir)
        .with_context(|| format!("failed to start embedding engine from {}", config.model_dir.display()))?;
    let service = match FaceMatchService::new(engine, config.match_config()) {
        Ok(service) => service,
        Err(err) => {
            let json = matches!(
                cli.command,
                Commands::Match { json: true, .. } | Commands::Gallery { json: true }
            );
            report_failure(&err, json);
            return Ok(exit_code(&err));
        }
    };

    match cli.command {
        Commands::Match { image, json } => run_match(&service, &image, json).await,
        Commands::Gallery { json } => run_gallery(&service, &config.gallery_dir, json).await,
    }
}

async fn run_match<P: EmbeddingProvider>(
    service: &FaceMatchService<P>,
    image: &Path,
    json: bool,
) -> Result<ExitCode> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("failed to read image {}", image.display()))?;
    let outcome = service.match_image(&bytes).await;
    drop(bytes);

    match outcome {
        Ok(result) => {
            println!("{}", output::render_match(&result, json)?);
            Ok(if result.is_match() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Err(err) => {
            report_failure(&err, json);
            Ok(exit_code(&err))
        }
    }
}

async fn run_gallery<P: EmbeddingProvider>(
    service: &FaceMatchService<P>,
    root: &Path,
    json: bool,
) -> Result<ExitCode> {
    match service.snapshot().await {
        Ok(snapshot) => {
            println!("{}", output::render_gallery(root, &snapshot, json)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report_failure(&err, json);
            // An empty gallery is still cached; show what was skipped and why.
            if let (MatchError::GalleryEmpty { .. }, Some(snapshot)) =
                (&err, service.gallery().current().await)
            {
                eprintln!("{}", output::render_gallery(root, &snapshot, false)?);
            }
            Ok(exit_code(&err))
        }
    }
}

fn report_failure(err: &MatchError, json: bool) {
    let rendered = output::render_failure(err, json);
    match err {
        MatchError::NoFacesDetected => println!("{rendered}"),
        _ if json => println!("{rendered}"),
        _ => eprintln!("{rendered}"),
    }
}

fn exit_code(err: &MatchError) -> ExitCode {
    match (err, err.class()) {
        (MatchError::NoFacesDetected, _) => ExitCode::from(1),
        (_, FailureClass::Input) => ExitCode::from(2),
        (_, FailureClass::Resource) => ExitCode::from(3),
        (_, FailureClass::Provider) => ExitCode::from(4),
    }
}
