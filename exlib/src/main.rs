use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};

use dnn_exlib::blob::TensorBlob;
use dnn_exlib::config::ExlibConfig;
use dnn_exlib::datasets::{DatasetKind, Split};
use dnn_exlib::image_io;
use dnn_exlib::layout::{Col2ImStrategy, ExecutionMode, Geometry, ImageShape, Parallel, TensorView};
use dnn_exlib::report;

/// im2col / col2im toolkit for convolutional networks.
///
/// Decodes MNIST and CIFAR corpora, unrolls image batches into patch
/// matrices, and verifies or times the sequential and parallel kernels.
#[derive(Parser)]
#[command(name = "exlib", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Kernel realization (overrides the config file).
    #[arg(long, global = true, value_enum)]
    execution: Option<ExecutionMode>,

    /// Size of a dedicated worker pool for the parallel kernels.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// How parallel col2im avoids overlapping writes.
    #[arg(long, global = true, value_enum)]
    strategy: Option<Col2ImStrategy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a dataset split and summarize it.
    Inspect {
        #[arg(value_enum)]
        dataset: DatasetKind,

        #[arg(long, default_value = "train", value_enum)]
        split: Split,

        /// Dataset root (defaults to the configured data directory).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Unroll the first records of a dataset and write the column tensor.
    Unfold {
        #[arg(value_enum)]
        dataset: DatasetKind,

        #[arg(long, default_value = "train", value_enum)]
        split: Split,

        /// Number of records to unroll.
        #[arg(long, default_value_t = 16)]
        count: usize,

        /// Filter height and width.
        #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [3, 3])]
        filter: Vec<usize>,

        /// Stride height and width.
        #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [1, 1])]
        stride: Vec<usize>,

        /// Output tensor file (.xlt).
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Verify the layout properties on synthetic data.
    Check {
        #[arg(long, default_value_t = 2)]
        batch: usize,

        /// Image height and width.
        #[arg(long, default_value_t = 16)]
        size: usize,

        #[arg(long, default_value_t = 3)]
        channels: usize,

        #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [3, 3])]
        filter: Vec<usize>,

        #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [1, 1])]
        stride: Vec<usize>,
    },

    /// Time sequential against parallel im2col/col2im.
    Bench {
        #[arg(long, default_value_t = 8)]
        batch: usize,

        #[arg(long, default_value_t = 64)]
        size: usize,

        #[arg(long, default_value_t = 16)]
        channels: usize,

        #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [3, 3])]
        filter: Vec<usize>,

        #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [1, 1])]
        stride: Vec<usize>,

        #[arg(long, default_value_t = 20)]
        iterations: u32,

        /// Also write the report as JSON.
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Read, optionally transform, and re-encode an image.
    Image {
        input: PathBuf,

        output: PathBuf,

        /// Resize to height and width.
        #[arg(long, num_args = 2, value_names = ["H", "W"])]
        resize: Option<Vec<usize>>,

        /// Convert to gray scale.
        #[arg(long)]
        gray: bool,

        /// Channels to decode (1 gray, 2 gray+alpha, 3 RGB, 4 RGBA).
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=4))]
        channels: u8,

        /// JPEG quality (1–100).
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,
    },
}

fn pair(values: &[usize], what: &str) -> Result<(usize, usize)> {
    match values {
        [h, w] => Ok((*h, *w)),
        _ => bail!("{what} needs two values, got {}", values.len()),
    }
}

fn synthetic_case(
    batch: usize,
    size: usize,
    channels: usize,
    filter: &[usize],
    stride: &[usize],
) -> Result<(ImageShape, Geometry)> {
    let (fh, fw) = pair(filter, "--filter")?;
    let (sh, sw) = pair(stride, "--stride")?;
    let shape = ImageShape::new(batch, size, size, channels);
    let geom = Geometry::for_conv(&shape, fh, fw, sh, sw, 0, 0)?;
    Ok((shape, geom))
}

fn run_inspect(config: &ExlibConfig, dataset: DatasetKind, split: Split) -> Result<()> {
    let data_dir = config.resolve_data_dir();
    let ds = dataset
        .load(&data_dir, split)
        .with_context(|| format!("cannot load {dataset} {split} from {}", data_dir.display()))?;

    println!("{dataset} ({split})");
    println!("  Records:  {}", ds.len());
    println!("  Shape:    {}", ds.shape);
    println!("  Labels:   {} byte(s) per record", ds.label_width);
    for slot in 0..ds.label_width {
        let hist = ds.label_histogram(slot);
        let cells: Vec<String> = hist
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(label, n)| format!("{label}:{n}"))
            .collect();
        println!("  Label {slot}:  {}", cells.join(" "));
    }
    for file in dataset.files(&data_dir, split)? {
        println!("  {}  {}", image_io::file_sha256(&file)?, file.display());
    }
    Ok(())
}

fn run_unfold(
    config: &ExlibConfig,
    dataset: DatasetKind,
    split: Split,
    count: usize,
    filter: &[usize],
    stride: &[usize],
    output: &Path,
) -> Result<()> {
    let data_dir = config.resolve_data_dir();
    let ds = dataset.load(&data_dir, split)?;
    ensure!(
        count <= ds.len(),
        "requested {count} records but {dataset} {split} has {}",
        ds.len()
    );
    let ds = ds.batch(0..count)?;
    let pixels = ds.to_f32(1.0 / 255.0);

    let (fh, fw) = pair(filter, "--filter")?;
    let (sh, sw) = pair(stride, "--stride")?;
    let geom = Geometry::for_conv(&ds.shape, fh, fw, sh, sw, 0, 0)?;
    let executor = config.executor()?;

    let t0 = std::time::Instant::now();
    let col = executor.im2col(&TensorView::new(&pixels, ds.shape)?, &geom)?;
    eprintln!(
        "Unrolled {} ({geom}) into {} values in {:.1}ms",
        ds.shape,
        col.len(),
        t0.elapsed().as_secs_f64() * 1e3
    );

    let dims = vec![ds.shape.batch, geom.out_h, geom.out_w, fh, fw, ds.shape.channels];
    TensorBlob::new(dims, col)?.save(output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn run_image(
    input: &Path,
    output: &Path,
    resize: Option<&[usize]>,
    gray: bool,
    channels: u8,
    quality: u8,
) -> Result<()> {
    let mut img = image_io::read(input, channels as usize)?;
    if let Some(size) = resize {
        let (h, w) = pair(size, "--resize")?;
        img = image_io::resize(&img, h, w)?;
    }
    if gray {
        img = image_io::to_gray_scale(&img)?;
    }
    image_io::write(output, &img, quality)?;
    println!(
        "Wrote {} ({}x{}x{})",
        output.display(),
        img.height,
        img.width,
        img.channels
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = ExlibConfig::load(cli.config.as_deref())?;
    if let Some(execution) = cli.execution {
        config.execution = execution;
    }
    if let Some(threads) = cli.threads {
        config.num_threads = Some(threads);
    }
    if let Some(strategy) = cli.strategy {
        config.col2im_strategy = strategy;
    }
    config.validate()?;

    match cli.command {
        Commands::Inspect {
            dataset,
            split,
            data_dir,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            run_inspect(&config, dataset, split)?;
        }

        Commands::Unfold {
            dataset,
            split,
            count,
            filter,
            stride,
            output,
            data_dir,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            run_unfold(&config, dataset, split, count, &filter, &stride, &output)?;
        }

        Commands::Check {
            batch,
            size,
            channels,
            filter,
            stride,
        } => {
            let (shape, geom) = synthetic_case(batch, size, channels, &filter, &stride)?;
            let report = report::run_checks(&config.executor()?, shape, &geom)?;
            print!("{report}");
            ensure!(report.passed(), "layout checks failed");
        }

        Commands::Bench {
            batch,
            size,
            channels,
            filter,
            stride,
            iterations,
            json,
        } => {
            let (shape, geom) = synthetic_case(batch, size, channels, &filter, &stride)?;
            let parallel = match config.num_threads {
                Some(n) => Parallel::with_threads(n)?,
                None => Parallel::new(),
            }
            .with_strategy(config.col2im_strategy);
            let report = report::run_bench(shape, &geom, iterations, parallel)?;
            print!("{report}");
            if let Some(path) = json {
                fs::write(&path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!("Report written to {}", path.display());
            }
        }

        Commands::Image {
            input,
            output,
            resize,
            gray,
            channels,
            quality,
        } => {
            run_image(&input, &output, resize.as_deref(), gray, channels, quality)?;
        }
    }

    Ok(())
}
