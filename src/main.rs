use clap::{Parser, Subcommand};
use cropdeck::config::{self, PipelineConfig};
use cropdeck::imaging::{CropPercentage, RustBackend, downsample_for_display};
use cropdeck::logging;
use cropdeck::output::{self, CropEntry, CropReport};
use cropdeck::types::SourceImage;
use cropdeck::view_model::ImageListViewModel;
use image::imageops::FilterType;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cropdeck")]
#[command(about = "Symmetric crop pipeline for photo lists")]
#[command(long_about = "\
Symmetric crop pipeline for photo lists

Each image is downsampled so its longer edge is at most 1024 px, then an
equal border is removed from every edge. At most min(cores, 4) images are
in the pipeline at once; results are cached in memory for the session.

Examples:

  cropdeck crop photos/*.jpg --percentage 15 --output cropped/
  cropdeck preview photos/dawn.jpg --width 400 --height 400 --output dawn.png

Run 'cropdeck gen-config' to generate a documented cropdeck.toml.")]
#[command(version)]
struct Cli {
    /// Log debug events from the pipeline
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crop a batch of images and write `<stem>-cropped.png` for each
    ///
    /// Inputs sharing a stem get an index prefix: `002-<stem>-cropped.png`.
    Crop {
        /// Input image files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Percentage removed from each edge (clamped to 5-20)
        #[arg(short, long)]
        percentage: Option<f64>,

        /// Output directory
        #[arg(short, long, default_value = "cropped")]
        output: PathBuf,

        /// Config file (defaults to ./cropdeck.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Downsample one image so it covers a display size
    Preview {
        file: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a stock cropdeck.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose)?;

    match cli.command {
        Command::Crop {
            files,
            percentage,
            output,
            config,
            json,
        } => {
            let mut pipeline_config = resolve_config(config.as_deref())?;
            if let Some(p) = percentage {
                pipeline_config.crop.default_percentage = CropPercentage::new(p).value();
            }
            init_thread_pool(&pipeline_config.processing);

            let report = run_crop(files, &output, &pipeline_config).await?;
            if json {
                println!("{}", output::crop_report_json(&report)?);
            } else {
                output::print_crop_report(&report);
            }
        }
        Command::Preview {
            file,
            width,
            height,
            output,
        } => {
            let source = decode(&file);
            let Some(raster) = source.raster() else {
                return Err(format!("cannot decode {}", file.display()).into());
            };
            let target = (width, height);
            let backend = RustBackend::with_filter(FilterType::Triangle);
            let preview = downsample_for_display(&backend, raster, target)?;
            preview.save(&output)?;
            output::print_preview(
                source.name().unwrap_or_default(),
                (raster.width(), raster.height()),
                target,
                (preview.width(), preview.height()),
                &output.display().to_string(),
            );
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) if !path.exists() => {
            Err(format!("config file not found: {}", path.display()).into())
        }
        Some(path) => Ok(config::load_config(path)?),
        None => Ok(config::load_config(Path::new(config::CONFIG_FILE_NAME))?),
    }
}

/// Initialize the rayon thread pool used for decoding.
///
/// Sized like the pipeline so decoding and cropping use the same budget.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_concurrency(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// Decode a file into a source image. Unreadable files become undecodable
/// placeholders so they surface as per-image errors.
fn decode(path: &Path) -> SourceImage {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match image::open(path) {
        Ok(img) => SourceImage::new(img).with_name(name),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "decode failed");
            SourceImage::undecodable().with_name(name)
        }
    }
}

async fn run_crop(
    files: Vec<PathBuf>,
    output_dir: &Path,
    pipeline_config: &PipelineConfig,
) -> Result<CropReport, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output_dir)?;

    let files = Arc::new(files);
    let sources = tokio::task::spawn_blocking({
        let files = Arc::clone(&files);
        move || files.par_iter().map(|p| decode(p)).collect::<Vec<_>>()
    })
    .await?;

    let mut vm = ImageListViewModel::from_config(pipeline_config);
    let ids = vm.process_selected_images(sources);
    info!(
        images = ids.len(),
        crop = vm.crop_percentage().value(),
        "cropping"
    );
    vm.wait_until_idle().await;

    let stems: Vec<&str> = ids
        .iter()
        .map(|id| {
            vm.image(*id)
                .and_then(|entity| entity.original().name())
                .unwrap_or("image")
        })
        .collect();
    let file_names = output::cropped_file_names(&stems);

    let mut entries = Vec::with_capacity(ids.len());
    for ((id, path), file_name) in ids.iter().zip(files.iter()).zip(&file_names) {
        let Some(entity) = vm.image(*id) else {
            continue;
        };
        let original = entity.original();
        let mut entry = CropEntry {
            name: original.name().map(str::to_string),
            source: path.display().to_string(),
            original: original.pixel_size(),
            cropped: None,
            output: None,
            error: entity.error().map(|e| e.to_string()),
        };
        if let Some(cropped) = entity.cropped_image() {
            let out_path = output_dir.join(file_name);
            match cropped.save(&out_path) {
                Ok(()) => {
                    entry.cropped = Some((cropped.width(), cropped.height()));
                    entry.output = Some(out_path.display().to_string());
                }
                Err(e) => entry.error = Some(format!("write failed: {e}")),
            }
        }
        entries.push(entry);
    }

    Ok(CropReport {
        crop_percentage: vm.crop_percentage().value(),
        entries,
        cache: vm.cache().map(|c| c.stats()).unwrap_or_default(),
    })
}
