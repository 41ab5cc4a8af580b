#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use reelstats_core::config::resolve_data_dir;
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "reelstats: snapshot history for short-video creators",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (defaults to pretty on a TTY, text when piped).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Data directory (overrides `REELSTATS_DIR`).
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Capture",
        about = "Ingest post and profile observations",
        long_about = "Merge a JSON Lines file of observations into the store, save, and run comb mode if it is due.",
        after_help = "EXAMPLES:\n    # Ingest a capture file\n    reelstats ingest captures.jsonl\n\n    # Read from stdin and clean up touched buckets\n    cat captures.jsonl | reelstats ingest - --reconcile\n\n    # Emit machine-readable output\n    reelstats ingest captures.jsonl --json"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        next_help_heading = "Read",
        about = "List stored buckets",
        long_about = "List every stored identity bucket with its handle and post count.",
        after_help = "EXAMPLES:\n    # List buckets\n    reelstats users\n\n    # Emit machine-readable output\n    reelstats users --json"
    )]
    Users,

    #[command(
        next_help_heading = "Read",
        about = "Show one creator",
        long_about = "Resolve an identity key to its bucket and summarize its posts.",
        after_help = "EXAMPLES:\n    # Latest values only\n    reelstats show h:alice\n\n    # Full history across aliases\n    reelstats show id:42 --full --json\n\n    # Today's top posts\n    reelstats show __top_today__"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Fix post attribution for one bucket",
        long_about = "Reclaim matching posts from `unknown`, move mis-attributed posts to their owner, and drop stale posts without metrics.",
        after_help = "EXAMPLES:\n    # Run every pass\n    reelstats reconcile h:alice\n\n    # Only pull posts out of unknown\n    reelstats reconcile id:42 --pass reclaim"
    )]
    Reconcile(cmd::reconcile::ReconcileArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Thin old snapshot history",
        long_about = "Keep the recent window intact and downsample older snapshots to the configured gap.",
        after_help = "EXAMPLES:\n    # Run if due\n    reelstats comb\n\n    # Run now\n    reelstats comb --force"
    )]
    Comb(cmd::comb::CombArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Delete one bucket",
        long_about = "Delete a bucket and its cold history under the purge lock.",
        after_help = "EXAMPLES:\n    # Remove a bucket\n    reelstats purge h:spam --yes"
    )]
    Purge(cmd::purge::PurgeArgs),

    #[command(
        next_help_heading = "Portability",
        about = "Export every bucket with full history",
        after_help = "EXAMPLES:\n    # Write a bundle\n    reelstats export backup.json\n\n    # Stream to stdout\n    reelstats export -"
    )]
    Export(cmd::export::ExportArgs),

    #[command(
        next_help_heading = "Portability",
        about = "Merge an export bundle into the store",
        after_help = "EXAMPLES:\n    # Restore a bundle\n    reelstats import backup.json"
    )]
    Import(cmd::export::ImportArgs),

    #[command(
        name = "refresh-check",
        next_help_heading = "Read",
        about = "Decide whether a viewer should reload",
        long_about = "Compare the store's update marker with the last one seen and report refresh or skip.",
        after_help = "EXAMPLES:\n    # One poll tick\n    reelstats refresh-check --json"
    )]
    RefreshCheck(cmd::refresh::RefreshArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("REELSTATS_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "reelstats=debug,info"
        } else {
            "reelstats=info,warn"
        })
    });

    let format = env::var("REELSTATS_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    let data_dir = resolve_data_dir(cli.data_dir.as_deref())?;
    debug!(data_dir = %data_dir.display(), ?output, "resolved environment");

    match cli.command {
        Commands::Ingest(ref args) => cmd::ingest::run_ingest(args, output, &data_dir),
        Commands::Users => cmd::users::run_users(output, &data_dir),
        Commands::Show(ref args) => cmd::show::run_show(args, output, &data_dir),
        Commands::Reconcile(ref args) => cmd::reconcile::run_reconcile(args, output, &data_dir),
        Commands::Comb(ref args) => cmd::comb::run_comb(args, output, &data_dir),
        Commands::Purge(ref args) => cmd::purge::run_purge(args, output, &data_dir),
        Commands::Export(ref args) => cmd::export::run_export(args, output, &data_dir),
        Commands::Import(ref args) => cmd::export::run_import(args, output, &data_dir),
        Commands::RefreshCheck(ref args) => cmd::refresh::run_refresh_check(args, output, &data_dir),
    }
}
