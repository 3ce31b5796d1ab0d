//! Specimen CLI: fetch regional series and write the wide specimen matrix.
//!
//! Commands:
//! - `fetch`: collect every region from the API and write a dates × regions matrix
//! - `regions`: list the region codes of a registry CSV

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use specimen_core::config::PipelineConfig;
use specimen_core::data::{CsvRegistry, GovUkClient, RegionRegistry, StaticRegistry};
use specimen_core::{get_specimen, ConflictPolicy, RegionId, Structure, WideMatrix};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "specimen",
    about = "Regional daily series collector and long-to-wide reshaper"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch regions from the API and write the wide matrix.
    Fetch {
        /// Region codes (e.g., E06000001). Defaults to every code in the registry.
        regions: Vec<String>,

        /// Region metadata CSV used when no regions are given.
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Registry column holding the region codes.
        #[arg(long)]
        code_column: Option<String>,

        /// Metric to place in the matrix cells.
        #[arg(long)]
        covariate: Option<String>,

        /// Attempts per region, including the first.
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Collector worker threads. 1 is sequential.
        #[arg(long)]
        workers: Option<usize>,

        /// Conflicting values for one cell: reject, keep-first or mean.
        #[arg(long)]
        conflicts: Option<ConflictPolicy>,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file. Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Print the region codes listed in a registry CSV.
    Regions {
        /// Region metadata CSV.
        #[arg(long)]
        registry: PathBuf,

        /// Column holding the region codes.
        #[arg(long, default_value = specimen_core::config::DEFAULT_CODE_COLUMN)]
        code_column: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

/// Flag overrides for `fetch`, applied on top of the config file.
struct FetchOverrides {
    registry: Option<PathBuf>,
    code_column: Option<String>,
    covariate: Option<String>,
    max_attempts: Option<u32>,
    workers: Option<usize>,
    conflicts: Option<ConflictPolicy>,
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            regions,
            registry,
            code_column,
            covariate,
            max_attempts,
            workers,
            conflicts,
            config,
            output,
            format,
        } => {
            let overrides = FetchOverrides {
                registry,
                code_column,
                covariate,
                max_attempts,
                workers,
                conflicts,
            };
            run_fetch(regions, config, overrides, output, format)
        }
        Commands::Regions {
            registry,
            code_column,
        } => run_regions(registry, &code_column),
    }
}

fn load_config(path: Option<PathBuf>, overrides: FetchOverrides) -> Result<PipelineConfig> {
    let mut cfg = match path {
        Some(path) => PipelineConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(covariate) = overrides.covariate {
        // A bare covariate flag requests the standard structure around it.
        if cfg.structure.is_none() {
            cfg.structure = Some(Structure::standard(&covariate));
        }
        cfg.reshape.covariate = Some(covariate);
    }
    if let Some(n) = overrides.max_attempts {
        cfg.fetch.max_attempts = n;
    }
    if let Some(n) = overrides.workers {
        cfg.fetch.workers = n;
    }
    if let Some(policy) = overrides.conflicts {
        cfg.reshape.conflicts = policy;
    }
    if overrides.registry.is_some() {
        cfg.registry.path = overrides.registry;
    }
    if let Some(col) = overrides.code_column {
        cfg.registry.code_column = col;
    }

    Ok(cfg)
}

fn run_fetch(
    regions: Vec<String>,
    config_path: Option<PathBuf>,
    overrides: FetchOverrides,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let cfg = load_config(config_path, overrides)?;
    let options = cfg.to_options().context("invalid pipeline configuration")?;
    let client = GovUkClient::new(&cfg.api).context("building HTTP client")?;

    let explicit = if regions.is_empty() {
        None
    } else {
        Some(regions.into_iter().map(RegionId::new).collect::<Vec<_>>())
    };

    let registry: Box<dyn RegionRegistry> = match (&explicit, &cfg.registry.path) {
        (Some(_), _) => Box::new(StaticRegistry::default()),
        (None, Some(path)) => Box::new(CsvRegistry::new(path, cfg.registry.code_column.clone())),
        (None, None) => bail!("no regions given; pass region codes or --registry FILE"),
    };

    let out = get_specimen(&client, registry.as_ref(), explicit, &options)?;

    for abandoned in &out.abandoned {
        warn!(
            region = %abandoned.region,
            attempts = abandoned.attempts,
            empty = abandoned.is_empty_response(),
            "region left out of the matrix"
        );
    }

    let (rows, cols) = out.matrix.shape();
    info!(
        rows,
        cols,
        dropped = out.abandoned.len(),
        hash = %out.matrix.content_hash(),
        "matrix ready"
    );

    match output {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            write_matrix(&out.matrix, format, std::io::BufWriter::new(file))?;
            info!(path = %path.display(), "written");
        }
        None => write_matrix(&out.matrix, format, std::io::stdout().lock())?,
    }

    Ok(())
}

fn write_matrix<W: Write>(matrix: &WideMatrix, format: OutputFormat, mut writer: W) -> Result<()> {
    match format {
        OutputFormat::Csv => matrix.write_csv(writer).context("writing CSV")?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, matrix).context("writing JSON")?;
            writeln!(writer)?;
            writer.flush()?;
        }
    }
    Ok(())
}

fn run_regions(path: PathBuf, code_column: &str) -> Result<()> {
    let registry = CsvRegistry::new(&path, code_column);
    let codes = registry
        .region_codes()
        .with_context(|| format!("reading registry {}", path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for code in &codes {
        writeln!(out, "{code}")?;
    }
    info!(count = codes.len(), "regions listed");
    Ok(())
}
