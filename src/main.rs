//! shelf CLI: keeps a book catalog in step with a Drive folder.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shelf::tasks::{self, DedupeReport, EnrichOptions, ReconcileOptions};
use shelf::{Config, DriveClient, GoogleBooksClient, MergeMode, OperationStats, Result};

#[derive(Parser)]
#[command(name = "shelf", version, about = "Personal ebook catalog backed by Google Drive")]
struct Cli {
  /// JSON config file (credentialsPath, folderId, apiKey, ...).
  #[arg(long, global = true, env = "SHELF_CONFIG")]
  config: Option<PathBuf>,

  /// Catalog file; overrides the config file and SHELF_CATALOG.
  #[arg(long, global = true)]
  catalog: Option<PathBuf>,

  /// Log debug detail.
  #[arg(short, long, global = true, conflicts_with = "quiet")]
  verbose: bool,

  /// Only log warnings and errors.
  #[arg(short, long, global = true)]
  quiet: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args, Clone, Copy)]
struct DryRun {
  /// Report what would change without writing or deleting anything.
  #[arg(long)]
  dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
  /// Collapse catalog entries that describe the same book.
  Dedupe {
    #[command(flatten)]
    dry: DryRun,
  },

  /// Delete remote files that duplicate another file of the same book.
  DedupeRemote {
    #[command(flatten)]
    dry: DryRun,
  },

  /// Report catalog entries without files and files without entries.
  Reconcile {
    /// Drop catalog entries whose file is gone.
    #[arg(long)]
    prune_catalog: bool,

    /// Delete remote files that have no catalog entry.
    #[arg(long)]
    delete_files: bool,

    #[command(flatten)]
    dry: DryRun,
  },

  /// Add catalog entries for remote files that have none.
  Import {
    #[command(flatten)]
    dry: DryRun,
  },

  /// Fill missing metadata from Google Books.
  Enrich {
    /// Replace fields that already hold a value.
    #[arg(long)]
    overwrite: bool,

    /// Only look for covers.
    #[arg(long)]
    covers_only: bool,

    /// Stop after this many records.
    #[arg(long)]
    limit: Option<usize>,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(&cli);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      log::error!("{}", err);
      ExitCode::FAILURE
    }
  }
}

fn init_logging(cli: &Cli) {
  let default_level = if cli.verbose {
    "debug"
  } else if cli.quiet {
    "warn"
  } else {
    "info"
  };
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
    )
    .with_writer(std::io::stderr)
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let mut config = Config::load(cli.config.as_deref())?;
  if let Some(catalog) = cli.catalog {
    config.catalog_path = catalog;
  }
  let catalog = config.catalog_path.clone();

  match cli.command {
    Commands::Dedupe { dry } => {
      let report = tasks::dedupe_catalog(&catalog, dry.dry_run)?;
      print_dedupe("catalog entries", &report, &catalog);
    }

    Commands::DedupeRemote { dry } => {
      let drive = DriveClient::from_config(&config)?;
      let report = tasks::dedupe_remote(&catalog, &drive, dry.dry_run)?;
      print_dedupe("remote files", &report, &catalog);
      print_stats("deletions", &report.deletions);
    }

    Commands::Reconcile {
      prune_catalog,
      delete_files,
      dry,
    } => {
      let drive = DriveClient::from_config(&config)?;
      let options = ReconcileOptions {
        prune_catalog,
        delete_files,
        dry_run: dry.dry_run,
      };
      let report = tasks::reconcile(&catalog, &drive, options)?;
      println!("Catalog entries without a file: {}", report.orphan_records.len());
      for record in &report.orphan_records {
        println!("  {}  {}", record.id, record.label());
      }
      println!("Files without a catalog entry: {}", report.orphan_files.len());
      for file in &report.orphan_files {
        println!("  {}  {}", file.id, file.name);
      }
      if prune_catalog {
        println!("Pruned {} catalog entries{}", report.pruned, written_note(report.written, &catalog));
      }
      if delete_files {
        print_stats("deletions", &report.deletions);
      }
    }

    Commands::Import { dry } => {
      let drive = DriveClient::from_config(&config)?;
      let report = tasks::import(&catalog, &drive, dry.dry_run)?;
      for record in &report.added {
        println!("  {}  {}", record.id, record.label());
      }
      println!(
        "Imported {} new entries{}",
        report.added.len(),
        written_note(report.written, &catalog)
      );
    }

    Commands::Enrich {
      overwrite,
      covers_only,
      limit,
    } => {
      let books = GoogleBooksClient::from_config(&config)?;
      let options = EnrichOptions {
        mode: MergeMode {
          overwrite,
          covers_only,
        },
        limit,
        delay: config.request_delay(),
        checkpoint_every: config.checkpoint_every,
      };
      let stats = tasks::enrich(&catalog, &books, &options)?;
      print_stats("enrichment", &stats);
    }
  }

  Ok(())
}

fn print_dedupe(what: &str, report: &DedupeReport, catalog: &Path) {
  println!(
    "{} {}: {} -> {} ({} removed){}",
    what,
    if report.written || report.deletions.processed > 0 {
      "deduplicated"
    } else {
      "checked"
    },
    report.before,
    report.after,
    report.before - report.after,
    written_note(report.written, catalog)
  );
}

fn print_stats(label: &str, stats: &OperationStats) {
  println!(
    "{}: total {}, processed {}, skipped {}, errors {}",
    label, stats.total, stats.processed, stats.skipped, stats.errors
  );
}

fn written_note(written: bool, catalog: &Path) -> String {
  if written {
    format!(", wrote {}", catalog.display())
  } else {
    String::new()
  }
}
