use clap::{Parser, Subcommand};
use reckon::aggregate::Statistic;
use reckon::cli;
use reckon::error::ReckonResult;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reckon")]
#[command(about = "Derived-indicator formula engine for reporting element catalogs")]
#[command(long_about = "Reckon - Derived-indicator formula engine

Resolves Excel-style formulas defined over a catalog of reporting elements,
evaluating derived elements recursively against raw submission records and
aggregating results across the population.

COMMANDS:
  resolve   - Evaluate elements against each submission record
  aggregate - Compute statistics across the submission set
  check     - Validate a catalog (formulas, references, cycles)

EXAMPLES:
  reckon resolve catalog.json samples.json D061 D073
  reckon aggregate catalog.json samples.json --element D061
  reckon aggregate catalog.json samples.json --field student_count --stat avg --group-by province
  reckon check catalog.json")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Evaluate elements against each submission record.

Resolves the named elements (or the whole catalog when none are named)
sample by sample. Derived elements are resolved recursively; each sample
gets its own evaluation context, so intermediate results are shared within
a sample but never across samples.

EXAMPLES:
  reckon resolve catalog.json samples.json            # All elements
  reckon resolve catalog.json samples.json D061 D073  # Specific elements
  reckon resolve catalog.json samples.json --json     # Machine-readable output")]
    /// Evaluate elements against each submission record
    Resolve {
        /// Path to catalog JSON file (array of element definitions)
        catalog: PathBuf,

        /// Path to submissions JSON file (array of records)
        samples: PathBuf,

        /// Element codes to resolve (all elements when omitted)
        codes: Vec<String>,

        /// Emit results as JSON
        #[arg(long)]
        json: bool,

        /// Show formulas alongside resolved values
        #[arg(short, long)]
        verbose: bool,
    },

    #[command(long_about = "Compute statistics across the submission set.

Two modes:

ELEMENT MODE (default):
  Aggregates catalog elements whose aggregation config is enabled, using
  each element's configured method and scope. Derived elements are resolved
  per sample first; null results drop out of the population.

  reckon aggregate catalog.json samples.json
  reckon aggregate catalog.json samples.json --element D061

FIELD MODE:
  Aggregates a raw record field directly, optionally partitioned by
  grouping keys. Records missing a grouping key partition under \"null\".

  reckon aggregate catalog.json samples.json --field student_count --stat avg
  reckon aggregate catalog.json samples.json --field area --stat cv --group-by province,stage")]
    /// Compute statistics across the submission set
    Aggregate {
        /// Path to catalog JSON file (array of element definitions)
        catalog: PathBuf,

        /// Path to submissions JSON file (array of records)
        samples: PathBuf,

        /// Aggregate a single element by code
        #[arg(short, long)]
        element: Option<String>,

        /// Aggregate a raw record field instead of a catalog element
        #[arg(short, long, conflicts_with = "element")]
        field: Option<String>,

        /// Statistic for field mode: sum, avg, count, min, max, stddev, cv
        #[arg(short, long)]
        stat: Option<Statistic>,

        /// Comma-separated grouping keys for field mode
        #[arg(short, long, value_delimiter = ',')]
        group_by: Vec<String>,

        /// Emit results as JSON
        #[arg(long)]
        json: bool,

        /// Show per-sample detail rows
        #[arg(short, long)]
        verbose: bool,
    },

    #[command(long_about = "Validate a catalog without resolving anything.

Checks that every derived element has a parseable formula, that base
elements carry a field reference, and that the dependency graph between
derived elements is acyclic. Exits non-zero on the first failure.

EXAMPLE:
  reckon check catalog.json")]
    /// Validate a catalog (formulas, references, cycles)
    Check {
        /// Path to catalog JSON file (array of element definitions)
        catalog: PathBuf,

        /// Show catalog summary
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> ReckonResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reckon=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve {
            catalog,
            samples,
            codes,
            json,
            verbose,
        } => cli::resolve(catalog, samples, codes, json, verbose),

        Commands::Aggregate {
            catalog,
            samples,
            element,
            field,
            stat,
            group_by,
            json,
            verbose,
        } => cli::aggregate(catalog, samples, element, field, stat, group_by, json, verbose),

        Commands::Check { catalog, verbose } => cli::check(catalog, verbose),
    }
}
