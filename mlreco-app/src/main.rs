//! MLReco command-line tool
//!
//! Inspects event files and collated batches:
//! - `info`: entry counts and key layouts
//! - `show`: one entry's data and result records as JSON
//! - `batch`: collate entries and report the batched field shapes

mod commands;
mod errors;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use mlreco_train::Variant;

use crate::errors::AppError;

/// MLReco - Event File Reader and Batch Collation
#[derive(Parser, Debug)]
#[command(name = "mlreco")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print entry counts and key layouts
    Info {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the data and result records of one entry as JSON
    Show {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Position in the entry list
        #[arg(short, long)]
        index: usize,

        /// Wrap every value in a one-element list
        #[arg(long)]
        nested: bool,

        /// Rebuild structured particle records as particle objects
        #[arg(long)]
        particles: bool,

        /// Global entries to expose (comma separated)
        #[arg(long, value_delimiter = ',')]
        entries: Option<Vec<usize>>,

        /// Global entries to skip (comma separated)
        #[arg(long, value_delimiter = ',')]
        skip: Option<Vec<usize>>,

        /// Reader options JSON file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Collate entries into one batch and print the batched shapes
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Entries to batch (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        indices: Vec<usize>,

        #[arg(long, value_enum, default_value_t = VariantArg::Sparse)]
        variant: VariantArg,

        /// Keys holding voxel tables (comma separated)
        #[arg(long, value_delimiter = ',', default_value = "input_data")]
        voxels: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VariantArg {
    Sparse,
    Dense,
    Minkowski,
}

impl VariantArg {
    fn variant(self) -> Variant<'static> {
        match self {
            VariantArg::Sparse => Variant::Sparse,
            VariantArg::Dense => Variant::Dense,
            VariantArg::Minkowski => Variant::Minkowski(&commands::SPARSE_BACKEND),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    #[cfg(feature = "tracy")]
    {
        use tracing_subscriber::Layer;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        tracing_subscriber::registry()
            .with(tracing_tracy::TracyLayer::default())
            .with(
                tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| default_level.into()),
                ),
            )
            .init();
    }

    #[cfg(not(feature = "tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
            )
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

fn run(command: Command) -> Result<(), AppError> {
    match command {
        Command::Info { files } => commands::info(&files),
        Command::Show {
            files,
            index,
            nested,
            particles,
            entries,
            skip,
            config,
        } => {
            let options = commands::reader_options(config.as_deref(), entries, skip, particles)?;
            commands::show(&files, index, nested, &options)
        }
        Command::Batch {
            files,
            indices,
            variant,
            voxels,
        } => commands::batch(&files, &indices, variant.variant(), &voxels),
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
