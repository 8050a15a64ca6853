use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use walkdir::WalkDir;

use std::path::{Path, PathBuf};

use subsample::{
    BoundedDecoder, DecodeError, DecodedImage, DecoderConfig, FileSource, ImageFormat,
    MemoryClass, PngCompression,
};

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff", "ico", "tga", "pnm", "qoi",
];

#[derive(Parser)]
#[command(name = "subsample")]
#[command(about = "Decode images within a pixel budget and write the reduced copies", long_about = None)]
#[command(version)]
struct Args {
    /// Input images or directories of images
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Maximum number of pixels in a decoded image
    #[arg(long, value_name = "PIXELS")]
    max_pixels: Option<u64>,

    /// Minimum side length to keep when sampling
    #[arg(long, value_name = "PIXELS")]
    min_side: Option<u32>,

    /// Derive the pixel budget from a heap size in MiB (16, 24, 32, 48, 64, 96, 128, 192, 256, 512)
    #[arg(long, value_name = "MIB")]
    heap: Option<String>,

    /// Sample to the largest power of two still covering WIDTHxHEIGHT, ignores other limits
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    fit: Option<String>,

    /// Only print dimensions and the sample size that would be used
    #[arg(long, default_value_t)]
    probe: bool,

    /// Output image format
    #[arg(long, value_enum)]
    image_format: Option<ImageFormatArg>,

    /// JPEG/WebP quality (0-100)
    #[arg(long, value_name = "QUALITY")]
    quality: Option<u8>,

    /// PNG compression level
    #[arg(long, value_enum)]
    png_compression: Option<PngCompressionArg>,

    /// Store the resulting settings as defaults for later runs
    #[arg(long, default_value_t)]
    save_config: bool,

    /// Verbose output
    #[arg(short, long, default_value_t)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, default_value_t)]
    quiet: bool,
}

impl Args {
    fn parse_fit(&self) -> Result<Option<(u32, u32)>> {
        let Some(fit) = &self.fit else {
            return Ok(None);
        };

        let (w, h) = fit
            .split_once(['x', 'X'])
            .with_context(|| format!("--fit expects WIDTHxHEIGHT, got `{fit}`"))?;
        let w = w.trim().parse().context("Invalid --fit width")?;
        let h = h.trim().parse().context("Invalid --fit height")?;
        Ok(Some((w, h)))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ImageFormatArg {
    Jpeg,
    Png,
    Webp,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum PngCompressionArg {
    Fast,
    Default,
    Best,
}

impl From<PngCompressionArg> for PngCompression {
    fn from(arg: PngCompressionArg) -> Self {
        match arg {
            PngCompressionArg::Fast => PngCompression::Fast,
            PngCompressionArg::Default => PngCompression::Default,
            PngCompressionArg::Best => PngCompression::Best,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(args.verbose, args.quiet);

    let config = build_config(&args)?;
    if args.save_config {
        match config.save() {
            Some(()) => log::info!("Saved settings to {:?}", DecoderConfig::config_path()),
            None => log::warn!("Could not save settings"),
        }
    }

    let files = collect_inputs(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No images found in the given inputs");
    }
    log::info!("Found {} images", files.len());

    let decoder = BoundedDecoder::new(config.constraints());
    let sources: Vec<FileSource> = files.iter().map(FileSource::new).collect();

    let fit = args.parse_fit()?;

    if args.probe {
        return probe(&decoder, &sources, fit);
    }

    if !args.output_dir.exists() {
        std::fs::create_dir_all(&args.output_dir).context("Failed to create output directory")?;
    }

    let results: Vec<Result<DecodedImage, DecodeError>> = match fit {
        Some((width, height)) => subsample::decode_batch_to_fit(&sources, width, height),
        None => decoder.decode_batch(&sources),
    };

    let mut failures = 0;
    for (source, result) in sources.iter().zip(results) {
        let written = result
            .map_err(anyhow::Error::from)
            .and_then(|decoded| write_output(source.path(), &decoded, &args.output_dir, config.image_format));

        match written {
            Ok(output) => log::info!("{} -> {}", source.path().display(), output.display()),
            Err(e) => {
                log::warn!("{}: {:#}", source.path().display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} images failed", sources.len());
    }

    log::info!("Done");
    Ok(())
}

/// Our own crates log at the requested level, codec dependencies only warn.
/// `RUST_LOG` still overrides both.
fn setup_logging(verbose: bool, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => log::LevelFilter::Error,
        (false, true) => log::LevelFilter::Debug,
        (false, false) => log::LevelFilter::Info,
    };

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn.min(level))
        .filter_module("subsample", level)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(verbose)
        .init();
}

fn build_config(args: &Args) -> Result<DecoderConfig> {
    let mut config = DecoderConfig::load().unwrap_or_default();

    if let Some(max_pixels) = args.max_pixels {
        config.max_pixels = Some(max_pixels);
    }

    if let Some(min_side) = args.min_side {
        config.min_side = Some(min_side);
    }

    if let Some(heap) = &args.heap {
        let class = MemoryClass::try_from(heap.as_str()).map_err(|e| anyhow::anyhow!(e))?;
        log::debug!("Heap {} gives a budget of {} pixels", class.name(), class.pixel_budget());
        config.memory_class = Some(class);
        // an explicit heap replaces a stored budget unless --max-pixels was given too
        if args.max_pixels.is_none() {
            config.max_pixels = None;
        }
    }

    // Validate quality
    if args.quality.is_some_and(|quality| quality > 100) {
        anyhow::bail!("Quality must be between 0 and 100");
    }

    let quality = args.quality.unwrap_or(match config.image_format {
        ImageFormat::Jpeg { quality } | ImageFormat::WebP { quality } => quality,
        ImageFormat::Png { .. } => 85,
    });
    let compression = args.png_compression.map(Into::into).unwrap_or(match config.image_format {
        ImageFormat::Png { compression } => compression,
        _ => PngCompression::Default,
    });

    config.image_format = match args.image_format {
        Some(ImageFormatArg::Jpeg) => ImageFormat::Jpeg { quality },
        Some(ImageFormatArg::Png) => ImageFormat::Png { compression },
        Some(ImageFormatArg::Webp) => ImageFormat::WebP { quality },
        None => match config.image_format {
            ImageFormat::Jpeg { .. } => ImageFormat::Jpeg { quality },
            ImageFormat::Png { .. } => ImageFormat::Png { compression },
            ImageFormat::WebP { .. } => ImageFormat::WebP { quality },
        },
    };

    log::debug!("Using config: {:?}", config);
    Ok(config)
}

fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.exists() {
            anyhow::bail!("Input does not exist: {}", input.display());
        }

        if input.is_dir() {
            for entry in WalkDir::new(input).follow_links(true) {
                let entry = entry.with_context(|| format!("Failed to walk {}", input.display()))?;
                if entry.file_type().is_file() && has_image_extension(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(input.clone());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn probe(decoder: &BoundedDecoder, sources: &[FileSource], fit: Option<(u32, u32)>) -> Result<()> {
    let mut failures = 0;

    for source in sources {
        match decoder.probe(source) {
            Ok(bounds) => {
                let sample = match fit {
                    Some((width, height)) => subsample::fit_sample_size(bounds, width, height),
                    None => decoder.sample_size_for(bounds),
                };
                println!(
                    "{}\t{}\tsample {}\t-> {}",
                    source.path().display(),
                    bounds,
                    sample.get(),
                    sample.apply(bounds)
                );
            }
            Err(e) => {
                log::warn!("{}: {}", source.path().display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} images could not be probed", sources.len());
    }
    Ok(())
}

fn write_output(
    input: &Path,
    decoded: &DecodedImage,
    output_dir: &Path,
    format: ImageFormat,
) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let output = output_dir.join(format!(
        "{stem}.1-{}.{}",
        decoded.sample_size().get(),
        format.extension()
    ));

    let bytes = subsample::image::encode(decoded.image(), format)?;
    std::fs::write(&output, bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    log::debug!(
        "{} sampled {} -> {}",
        input.display(),
        decoded.source_bounds(),
        decoded.dimensions()
    );
    Ok(output)
}
