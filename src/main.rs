use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use surveysync::config::Config;
use surveysync::session::{Session, Status};
use surveysync::sync::{PushOutcome, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "surveysync")]
#[command(about = "Offline-first survey cache and response sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/surveysync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh stale resources and push completed responses
  Sync,
  /// Start a new response (completing the active one)
  Start,
  /// Complete the active response
  Complete,
  /// Set a field of the active response, e.g. `set question-ratings.3 7`
  Set {
    /// Field path, dot separated
    path: String,
    /// JSON value; bare words are stored as strings
    value: String,
  },
  /// Remove a field of the active response, e.g. `unset respondent-data.province`
  Unset {
    /// Field path, dot separated
    path: String,
  },
  /// Print a field of the active response (or the whole response)
  Get { path: Option<String> },
  /// Record the display language on the active response
  Language { code: String },
  /// Print the comment selection for the active response
  Sample,
  /// Show local cache and response state
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let session = Session::open(&config)?;
  session.init()?;

  match args.command {
    Command::Sync => print_sync(&session.sync().await?),
    Command::Start => println!("{}", session.responses().start()?),
    Command::Complete => println!("{}", session.responses().complete()?),
    Command::Set { path, value } => {
      session
        .responses()
        .set_field(&split_path(&path), parse_value(value))?;
    }
    Command::Unset { path } => {
      if !session.responses().delete_field(&split_path(&path))? {
        println!("(unset)");
      }
    }
    Command::Get { path } => {
      let value = match path {
        Some(path) => session.responses().get_field(&split_path(&path))?,
        None => Some(serde_json::to_value(session.responses().get_active()?)?),
      };
      match value {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("(unset)"),
      }
    }
    Command::Language { code } => {
      if !session.responses().record_language(&code)? {
        println!("no active response; language not recorded");
      }
    }
    Command::Sample => {
      let (key, response) = session.responses().active()?;
      let mut rng = rand::thread_rng();
      let selection = session.sampler().selection_for(&key, &response, &mut rng)?;
      for comment in &selection.selected {
        println!("[{}] {}", comment.id, comment.message);
      }
    }
    Command::Status => print_status(&session.status()?),
  }

  Ok(())
}

fn split_path(path: &str) -> Vec<&str> {
  path.split('.').collect()
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(raw: String) -> Value {
  match serde_json::from_str(&raw) {
    Ok(value) => value,
    Err(_) => Value::String(raw),
  }
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  let name = path
    .file_name()
    .ok_or_else(|| color_eyre::eyre::eyre!("Invalid log file path: {}", path.display()))?;
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Ok(Some(guard))
}

fn print_sync(report: &SyncReport) {
  println!(
    "resources: {} refreshed, {} failed",
    report.refresh.refreshed(),
    report.refresh.failed()
  );
  println!(
    "responses: {} delivered, {} failed",
    report.push.delivered(),
    report.push.failed()
  );
  for (key, outcome) in &report.push.outcomes {
    if let PushOutcome::Failed(reason) = outcome {
      println!("  {}: {}", key, reason);
    }
  }
}

fn format_time(millis: Option<i64>) -> String {
  millis
    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| "never".to_string())
}

fn print_status(status: &Status) {
  println!("active: {}", status.active.as_deref().unwrap_or("none"));
  println!("completed: {}", status.completed.len());
  for key in &status.completed {
    println!("  {}", key);
  }

  println!("resources:");
  for resource in &status.resources {
    println!(
      "  {:<24} {:<6} {:<6} {}",
      resource.name,
      if resource.remote { "remote" } else { "local" },
      if resource.stale { "stale" } else { "fresh" },
      format_time(resource.fetched_at)
    );
  }

  let total: usize = status.usage.iter().map(|(_, bytes)| bytes).sum();
  println!("storage: {} bytes", total);
  for (key, bytes) in &status.usage {
    println!("  {:<32} {}", key, bytes);
  }
}
