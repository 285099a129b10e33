use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use ucd_rs::{Client, GetOptions, MetaField, OutputFormat, models::Table, query, storage};

#[derive(Parser, Debug)]
#[command(
    name = "ucd",
    version,
    about = "Fetch, cache & reshape UNICEF SDMX indicator data"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch indicator data (and optionally save it).
    Get(GetArgs),
    /// List all dataflows known to the warehouse.
    Dataflows,
    /// Sync the metadata cache (dataflows, codelists, schemas, vintage).
    Sync {
        /// Re-sync even if the cache is fresh.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Show which dataflow an indicator reports under.
    Resolve {
        /// Indicator code (e.g. CME_MRY0T4)
        code: String,
    },
    /// List or search the indicator catalog.
    Indicators {
        /// Case-insensitive search over code and name.
        query: Option<String>,
    },
    /// Show metadata cache location, watermark, and vintages.
    CacheInfo,
}

#[derive(ValueEnum, Clone, Debug)]
enum OutFormat {
    Csv,
    Json,
}

#[derive(Args, Debug)]
struct GetArgs {
    /// Indicator codes separated by comma or semicolon (e.g. CME_MRY0T4)
    #[arg(short, long)]
    indicators: Option<String>,
    /// Dataflow ids (resolved from the indicator if omitted)
    #[arg(short = 'f', long)]
    dataflows: Option<String>,
    /// ISO3 country codes separated by comma or semicolon (e.g. ALB,USA)
    #[arg(short, long)]
    countries: Option<String>,
    /// First year of data (YYYY)
    #[arg(long)]
    start_year: Option<String>,
    /// Last year of data (YYYY)
    #[arg(long)]
    end_year: Option<String>,
    /// Sex filter code (default _T; pass 'all' to disable)
    #[arg(long, default_value = "_T")]
    sex: String,
    /// Output shape: long, wide, or wide_indicators
    #[arg(long, default_value = "long")]
    format: String,
    /// Keep only the latest non-missing value per country
    #[arg(long, default_value_t = false)]
    latest: bool,
    /// Keep only the N most recent observations per country
    #[arg(long)]
    mrv: Option<usize>,
    /// Remove rows with missing values
    #[arg(long, default_value_t = false)]
    dropna: bool,
    /// Keep only the essential columns
    #[arg(long, default_value_t = false)]
    simplify: bool,
    /// Metadata columns to attach (region,income_group,continent,indicator_name,indicator_category)
    #[arg(long)]
    add_metadata: Option<String>,
    /// Return the server's columns untouched
    #[arg(long, default_value_t = false)]
    raw: bool,
    /// Drop exact duplicate rows instead of failing on them
    #[arg(long, default_value_t = false)]
    ignore_duplicates: bool,
    /// Memoize identical queries within this invocation
    #[arg(long, default_value_t = false)]
    cache: bool,
    /// Retry attempts for transient network failures
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    /// Save results to file (format inferred by --out-format or extension).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Output format (csv or json). If omitted, inferred from --out extension.
    #[arg(long, value_enum)]
    out_format: Option<OutFormat>,
}

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("ucd_rs", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

fn parse_list(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Get(args) => cmd_get(args),
        Command::Dataflows => cmd_dataflows(),
        Command::Sync { force } => cmd_sync(force),
        Command::Resolve { code } => {
            let client = Client::new();
            println!("{}", client.resolve_dataflow(&code));
            Ok(())
        }
        Command::Indicators { query } => cmd_indicators(query),
        Command::CacheInfo => cmd_cache_info(),
    }
}

fn cmd_get(args: GetArgs) -> Result<()> {
    let opts = GetOptions {
        indicators: args.indicators.as_deref().map(parse_list).unwrap_or_default(),
        dataflows: args.dataflows.as_deref().map(parse_list).unwrap_or_default(),
        countries: args.countries.as_deref().map(parse_list),
        start_year: args
            .start_year
            .as_deref()
            .map(|s| query::parse_year("start_year", s))
            .transpose()?,
        end_year: args
            .end_year
            .as_deref()
            .map(|s| query::parse_year("end_year", s))
            .transpose()?,
        sex: match args.sex.as_str() {
            "all" => None,
            code => Some(code.to_string()),
        },
        format: args.format.parse::<OutputFormat>()?,
        latest: args.latest,
        mrv: args.mrv,
        dropna: args.dropna,
        simplify: args.simplify,
        add_metadata: args
            .add_metadata
            .as_deref()
            .map(parse_list)
            .unwrap_or_default()
            .iter()
            .map(|f| f.parse::<MetaField>())
            .collect::<Result<Vec<_>, _>>()?,
        raw: args.raw,
        ignore_duplicates: args.ignore_duplicates,
        cache: args.cache,
        max_retries: args.max_retries,
        ..GetOptions::default()
    };

    let client = Client::with_retries(args.max_retries);

    if let Some(path) = args.out.as_ref() {
        let fmt = match args.out_format {
            Some(OutFormat::Csv) => "csv",
            Some(OutFormat::Json) => "json",
            None => path.extension().and_then(|e| e.to_str()).unwrap_or("csv"),
        }
        .to_ascii_lowercase();
        match fmt.as_str() {
            "csv" => {
                let table = client.get(&opts)?;
                storage::save_table_csv(&table, path)?;
                eprintln!("Saved {} rows to {}", table.len(), path.display());
            }
            "json" => {
                let rows = client.get_rows(&opts)?;
                storage::save_json(&rows, path)?;
                eprintln!("Saved {} rows to {}", rows.len(), path.display());
            }
            other => anyhow::bail!("unsupported format: {}", other),
        }
        return Ok(());
    }

    let table = client.get(&opts)?;
    print_table(&table);
    Ok(())
}

fn cmd_dataflows() -> Result<()> {
    let client = Client::new();
    let mut flows = client.list_dataflows()?;
    flows.sort_by(|a, b| a.id.cmp(&b.id));
    for f in flows {
        println!("{}\t{}\t{}\t{}", f.id, f.agency, f.version, f.name);
    }
    Ok(())
}

fn cmd_sync(force: bool) -> Result<()> {
    let client = Client::new();
    let counts = client.sync_metadata(force)?;
    if counts.skipped {
        println!("cache is fresh, nothing to do (pass --force to re-sync)");
        return Ok(());
    }
    println!(
        "synced {} dataflows, {} codelists, {} indicators, {} schemas",
        counts.dataflows, counts.codelists, counts.indicators, counts.schemas
    );
    for err in &counts.errors {
        eprintln!("warning: {err}");
    }
    Ok(())
}

fn cmd_indicators(query: Option<String>) -> Result<()> {
    let client = Client::new();
    let records = match query.as_deref() {
        Some(q) => client.registry().search_indicators(q),
        None => client.registry().list_indicators(),
    };
    for r in records {
        println!(
            "{}\t{}\t{}\t{}",
            r.code,
            r.dataflow,
            r.sdg_target.as_deref().unwrap_or(""),
            r.name
        );
    }
    Ok(())
}

fn cmd_cache_info() -> Result<()> {
    let info = Client::new().cache_info();
    println!("cache dir: {}", info.cache_dir.display());
    println!("available: {}", info.available);
    println!("stale:     {}", info.stale);
    if let Some(w) = &info.watermark {
        println!("synced at: {}", w.synced_at);
        println!("source:    {}", w.source);
    }
    if !info.vintages.is_empty() {
        println!("vintages:  {}", info.vintages.join(", "));
    }
    Ok(())
}

fn print_table(table: &Table) {
    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.len()).collect();
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }
    let header: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<w$}", c, w = widths[i]))
        .collect();
    println!("{}", header.join("  "));
    for row in &table.rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<w$}", c, w = widths.get(i).copied().unwrap_or(0)))
            .collect();
        println!("{}", line.join("  "));
    }
    eprintln!("{} row(s)", table.len());
}
