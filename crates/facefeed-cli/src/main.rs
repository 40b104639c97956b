use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facefeed_core::{Gallery, OnnxEngine};
use facefeed_hw::{Camera, FrameSource};
use facefeedd::config::{self, Config};
use facefeedd::pipeline::stream::encode_jpeg;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facefeed", about = "facefeed diagnostics CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Enroll the configured identities exactly as the daemon does at startup
    Enroll {
        /// TOML config file (default: $FACEFEED_CONFIG)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Annotate a still image and write the result as JPEG
    Annotate {
        input: PathBuf,
        output: PathBuf,
        /// TOML config file (default: $FACEFEED_CONFIG)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Capture one frame from the camera and write it as JPEG
    Snapshot {
        output: PathBuf,
        /// Device index (/dev/videoN)
        #[arg(short, long, default_value_t = 0)]
        device: usize,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Frames to discard while exposure settles
        #[arg(long, default_value_t = 4)]
        warmup: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Enroll { config } => {
            let config = load_config(config)?;
            let (_, gallery) = load_gallery(&config)?;
            println!("Enrolled {} identities:", gallery.len());
            for (idx, entry) in gallery.entries().iter().enumerate() {
                println!("  {}. {}", idx + 1, entry.name);
            }
            Ok(())
        }
        Commands::Annotate {
            input,
            output,
            config,
        } => {
            let config = load_config(config)?;
            annotate(&config, &input, &output)
        }
        Commands::Snapshot {
            output,
            device,
            width,
            height,
            warmup,
        } => snapshot(&output, device, width, height, warmup),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.or_else(config::config_path_from_env);
    let config = Config::load(path.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_gallery(config: &Config) -> Result<(OnnxEngine, Gallery)> {
    let mut engine = OnnxEngine::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.similarity_threshold,
    )
    .context("failed to load recognition models")?;
    let gallery = Gallery::enroll(&config.identities, &mut engine, config.multi_face_policy)
        .context("failed to enroll known identities")?;
    tracing::info!(identities = gallery.len(), "gallery ready");
    Ok((engine, gallery))
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return Ok(());
    }
    for dev in devices {
        println!("{:>2}  {}  {} ({}, {})", dev.index, dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}

fn annotate(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let (mut engine, gallery) = load_gallery(config)?;
    let mut image = image::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?
        .to_rgb8();

    let settings = config.annotate_settings();
    let faces = facefeed_core::annotate(&mut engine, &gallery, &mut image, &settings)
        .context("face analysis failed")?;
    let identified = faces.iter().filter(|f| f.result.is_identified()).count();
    tracing::info!(
        input = %input.display(),
        faces = faces.len(),
        identified,
        "annotation finished"
    );
    if faces.is_empty() {
        println!("No faces found");
    }
    for face in &faces {
        let r = &face.region;
        println!(
            "{:<20} top={} right={} bottom={} left={}",
            face.result.label(),
            r.top,
            r.right,
            r.bottom,
            r.left
        );
    }

    write_jpeg(&image, output, config.jpeg_quality)
}

fn snapshot(output: &Path, device: usize, width: u32, height: u32, warmup: usize) -> Result<()> {
    let mut camera =
        Camera::open(device).with_context(|| format!("failed to open /dev/video{device}"))?;
    let (w, h) = camera.configure(width, height).context("failed to configure camera")?;
    println!("Capturing {w}x{h} from {} ({:?})", camera.device_path, camera.pixel_format());

    for _ in 0..warmup {
        camera.read_frame().context("warmup capture failed")?;
    }
    tracing::debug!(warmup, "discarded warmup frames");
    let frame = camera.read_frame().context("capture failed")?;
    if frame.width() == 0 || frame.height() == 0 {
        bail!("camera returned an empty frame");
    }
    write_jpeg(&frame.image, output, 95)
}

fn write_jpeg(image: &image::RgbImage, output: &Path, quality: u8) -> Result<()> {
    let jpeg = encode_jpeg(image, quality)?;
    std::fs::write(output, jpeg).with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_annotate() {
        let args = ["facefeed", "annotate", "in.jpg", "out.jpg", "--config", "f.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Annotate { input, output, config } => {
                assert_eq!(input, PathBuf::from("in.jpg"));
                assert_eq!(output, PathBuf::from("out.jpg"));
                assert_eq!(config, Some(PathBuf::from("f.toml")));
            }
            _ => panic!("expected annotate"),
        }
    }

    #[test]
    fn test_parse_snapshot_defaults() {
        let cli = Cli::try_parse_from(["facefeed", "snapshot", "shot.jpg"]).unwrap();
        match cli.command {
            Commands::Snapshot { device, width, height, warmup, .. } => {
                assert_eq!((device, width, height, warmup), (0, 640, 480, 4));
            }
            _ => panic!("expected snapshot"),
        }
    }

    #[test]
    fn test_write_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        write_jpeg(&image::RgbImage::new(8, 8), &path, 90).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    }
}
