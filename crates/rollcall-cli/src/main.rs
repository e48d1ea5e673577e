use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use rollcall_core::{Config, Engine, Gallery, OnnxExtractor, TemplateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face enrollment and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face in an image under an identity
    Enroll {
        /// Identity to store the template under (e.g., a student ID)
        #[arg(short, long)]
        identity: String,
        /// Image containing exactly one face
        image: PathBuf,
    },
    /// Identify the person in an image
    Recognize { image: PathBuf },
    /// Run fast detection only and print face boxes
    Detect { image: PathBuf },
    /// List enrolled identities
    List,
    /// Show configuration and gallery size
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let gallery = Arc::new(Gallery::new(
        TemplateStore::new(&config.template_dir),
        config.tolerance,
    ));

    match cli.command {
        Commands::Enroll { identity, image } => {
            let image = open_rgb(&image)?;
            let mut engine = load_engine(&config, gallery)?;
            engine.reload().context("loading gallery")?;
            let handle = engine
                .enroll(&image, &identity)
                .with_context(|| format!("enrolling {identity}"))?;
            println!("Enrolled {} -> {}", handle.identity, handle.path.display());
        }
        Commands::Recognize { image } => {
            let image = open_rgb(&image)?;
            let mut engine = load_engine(&config, gallery)?;
            let result = engine.recognize(&image)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Detect { image } => {
            let image = open_rgb(&image)?;
            let mut engine = load_engine(&config, gallery)?;
            let boxes = engine.preview(&image)?;
            println!("{}", serde_json::to_string_pretty(&boxes)?);
        }
        Commands::List => {
            gallery.load().context("loading gallery")?;
            let identities = gallery.identities();
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!("{identity}");
            }
        }
        Commands::Status => {
            let summary = gallery.load();
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "detection_mode": config.detection_mode.as_str(),
                "tolerance": config.tolerance,
                "template_dir": config.template_dir.display().to_string(),
                "model_dir": config.model_dir.display().to_string(),
                "gallery_size": gallery.len(),
                "skipped": summary.as_ref().map(|s| s.skipped.len()).unwrap_or(0),
                "gallery_error": summary.err().map(|e| e.to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn load_engine(config: &Config, gallery: Arc<Gallery>) -> Result<Engine<OnnxExtractor>> {
    let extractor = OnnxExtractor::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.detection_mode,
    )
    .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    Ok(Engine::new(extractor, gallery))
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("cannot decode image {}", path.display()))?;
    Ok(image.to_rgb8())
}
