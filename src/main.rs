use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressDrawTarget};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabledump::cancel::CancelToken;
use tabledump::config::{self, AppConfig};
use tabledump::dump::Dumper;
use tabledump::models::{self, Table};
use tabledump::mysql_source::MySqlSource;
use tabledump::report::{self, RunSummary};
use tabledump::scheduler::Scheduler;
use tabledump::source::RowSource;
use tabledump::upload::CommandUploader;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "tabledump")]
#[command(about = "Dump relational tables to delimited flat files")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML config file with [mysql] and [export] sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump tables to one delimited file each
    Dump(DumpArgs),
    /// Print catalog size estimates without dumping
    Estimate(EstimateArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// MySQL host
    #[arg(long, global = true)]
    host: Option<String>,

    /// MySQL port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// MySQL user
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// MySQL password (falls back to TABLEDUMP_PASSWORD)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Default database for tables given without a schema
    #[arg(long, global = true)]
    dbname: Option<String>,

    /// Connections kept in the pool; caps useful concurrency
    #[arg(long, global = true)]
    pool_size: Option<usize>,
}

#[derive(Args)]
struct DumpArgs {
    /// Tables to dump, as schema.table (or table with --dbname)
    tables: Vec<String>,

    /// Output directory for generated files
    #[arg(short, long)]
    output: Option<String>,

    /// Field delimiter (accepts \t)
    #[arg(long, value_parser = config::parse_char)]
    delimiter: Option<char>,

    /// Record terminator (accepts \n, \r, \0)
    #[arg(long, value_parser = config::parse_char)]
    record_terminator: Option<char>,

    /// Literal written for NULL values
    #[arg(long)]
    null_sentinel: Option<String>,

    /// Don't write the column-name header
    #[arg(long)]
    no_header: bool,

    /// Number of tables dumped at once
    #[arg(short = 'j', long)]
    max_concurrency: Option<usize>,

    /// Re-run a table this many times after a dropped connection
    #[arg(long)]
    max_retries: Option<u32>,

    /// Upload completed files under this s3:// or gs:// prefix
    #[arg(long)]
    upload_prefix: Option<String>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    max_runtime_secs: Option<u64>,

    /// Don't draw progress bars
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct EstimateArgs {
    /// Tables to estimate, as schema.table (or table with --dbname)
    tables: Vec<String>,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    let conn = &cli.connection;
    let db = &mut config.mysql;
    if let Some(host) = &conn.host {
        db.host = host.clone();
    }
    if let Some(port) = conn.port {
        db.port = port;
    }
    if let Some(user) = &conn.user {
        db.user = user.clone();
    }
    if let Some(password) = &conn.password {
        db.password = Some(password.clone());
    }
    if let Some(dbname) = &conn.dbname {
        db.dbname = Some(dbname.clone());
    }
    if let Some(pool_size) = conn.pool_size {
        db.pool_size = pool_size;
    }
    Ok(config)
}

fn merge_dump_args(config: &mut AppConfig, args: &DumpArgs) {
    let export = &mut config.export;
    if !args.tables.is_empty() {
        export.tables = args.tables.clone();
    }
    if let Some(output) = &args.output {
        export.output_dir = output.clone();
    }
    if let Some(delimiter) = args.delimiter {
        export.delimiter = delimiter;
    }
    if let Some(terminator) = args.record_terminator {
        export.record_terminator = terminator;
    }
    if let Some(sentinel) = &args.null_sentinel {
        export.null_sentinel = sentinel.clone();
    }
    if args.no_header {
        export.write_header = false;
    }
    if let Some(n) = args.max_concurrency {
        export.max_concurrency = n;
    }
    if let Some(n) = args.max_retries {
        export.max_retries = n;
    }
    if let Some(prefix) = &args.upload_prefix {
        export.upload_prefix = Some(prefix.clone());
    }
}

fn parse_tables(specs: &[String], default_schema: Option<&str>) -> Result<Vec<Table>> {
    if specs.is_empty() {
        bail!("No tables given (pass them as arguments or set export.tables)");
    }
    specs
        .iter()
        .map(|spec| Table::parse(spec, default_schema).map_err(anyhow::Error::from))
        .collect()
}

fn run_dump(mut config: AppConfig, args: DumpArgs) -> Result<ExitCode> {
    merge_dump_args(&mut config, &args);
    let tables = parse_tables(&config.export.tables, config.mysql.dbname.as_deref())?;
    config
        .export
        .validate(Some(config.mysql.pool_size))
        .context("Invalid export configuration")?;

    let source = Arc::new(MySqlSource::connect(&config.mysql).context("Failed to connect to MySQL")?);

    let progress = if args.no_progress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };
    let mut dumper = Dumper::new(source)
        .with_progress(progress)
        .with_max_retries(config.export.max_retries);
    if let Some(prefix) = &config.export.upload_prefix {
        let uploader = match &config.export.upload_command {
            Some(command) => CommandUploader::from_command(command, prefix)?,
            None => CommandUploader::for_prefix(prefix)?,
        };
        dumper = dumper.with_uploader(Arc::new(uploader));
    }

    let output_dir = Path::new(&config.export.output_dir);
    let scheduler = Scheduler::new(
        dumper,
        config.export.max_concurrency,
        output_dir,
        config.export.record_format(),
    )?;

    let cancel = CancelToken::new();
    if let Some(secs) = args.max_runtime_secs {
        cancel.cancel_after(Duration::from_secs(secs));
    }

    let start = Instant::now();
    let outcomes = models::in_input_order(scheduler.run(&tables, &cancel)?);
    let summary = RunSummary::from_outcomes(&outcomes, start.elapsed());

    report::print_summary(&outcomes, &summary);
    match report::write_json_report(output_dir, &outcomes, &summary) {
        Ok(path) => info!(path = %path.display(), "Report written"),
        Err(e) => warn!(error = %format!("{:#}", e), "Failed to write report"),
    }

    Ok(ExitCode::from(summary.exit_code()))
}

fn run_estimate(config: AppConfig, args: EstimateArgs) -> Result<ExitCode> {
    let specs = if args.tables.is_empty() {
        &config.export.tables
    } else {
        &args.tables
    };
    let tables = parse_tables(specs, config.mysql.dbname.as_deref())?;
    let source = MySqlSource::connect(&config.mysql).context("Failed to connect to MySQL")?;

    let mut failed = false;
    for table in &tables {
        match source.estimate_size(table) {
            Ok(est) => println!("{:<40} ~{:>12} rows  ~{:>10.2} MB", table.to_string(), est.rows, est.size_mb),
            Err(e) => {
                failed = true;
                println!("{:<40} error: {}", table.to_string(), e);
            }
        }
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// `RUST_LOG` directives, when given, take precedence over the `-v` level.
fn log_filter(level: Level, directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives.unwrap_or_default())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(level, rust_log.as_deref());

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Dump(args) => run_dump(config, args),
        Commands::Estimate(args) => run_estimate(config, args),
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_sets_the_default_filter() {
        let filter = log_filter(Level::INFO, None).to_string();
        assert!(filter.contains("info"), "got {}", filter);
    }

    #[test]
    fn rust_log_directives_are_honoured() {
        let filter = log_filter(Level::WARN, Some("tabledump=trace")).to_string();
        assert!(filter.contains("tabledump=trace"), "got {}", filter);
    }
}
