use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use dbfix_lib::cancel::Cancellable;
use dbfix_lib::config::FixConfig;
use dbfix_lib::detect::scan;
use dbfix_lib::fixer::{FixEvent, Fixer};
use dbfix_lib::logging;
use dbfix_lib::registry::SchemaRegistry;

#[derive(Parser)]
#[command(name = "dbfix", about = "Upgrade a sonar survey database to the latest layout")]
struct Cli {
    /// Database root directory
    #[arg(value_name = "DB")]
    db: PathBuf,

    /// Directory of canonical schema files named <fingerprint>.sch
    #[arg(long, value_name = "DIR")]
    schemas: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Do not take the database lock
    #[arg(long)]
    no_lock: bool,

    /// Print detected versions and exit without changing anything
    #[arg(long)]
    detect: bool,

    /// Progress redraw interval
    #[arg(long, value_name = "MS")]
    progress_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = FixConfig::load();
    if let Some(dir) = cli.schemas {
        config.schema_dir = Some(dir);
    }
    if cli.no_lock {
        config.use_lock = false;
    }
    if cli.log_json {
        config.log_json = true;
    }
    if let Some(millis) = cli.progress_interval_ms {
        config = config.with_progress_interval_ms(millis);
    }
    logging::init(&config.log_filter, config.log_json);

    let registry = config.registry();
    if cli.detect {
        return detect(&cli.db, registry.as_ref());
    }
    run(cli.db, registry, &config).await;
    Ok(())
}

fn detect(root: &Path, registry: &dyn SchemaRegistry) -> Result<()> {
    let projects = scan(root, registry)
        .with_context(|| format!("scan database {}", root.display()))?;
    for project in projects {
        println!("{}: {}", project.name, project.detection.label());
        for track in project.tracks {
            println!("{}.{}: {}", project.name, track.name, track.detection.label());
        }
    }
    Ok(())
}

fn redraw(cancellable: &Cancellable, message: &str) {
    let percent = (cancellable.fraction() * 100.0) as u32;
    print!("\r[{percent:3}%]: {message}\x1b[K");
    let _ = std::io::stdout().flush();
}

async fn run(root: PathBuf, registry: Arc<dyn SchemaRegistry>, config: &FixConfig) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut fixer = Fixer::new(registry, tx);
    if !config.use_lock {
        fixer = fixer.without_lock();
    }
    let fixer = Arc::new(fixer);
    let cancellable = Cancellable::new();

    if let Err(err) = fixer.start(root, cancellable.clone()) {
        println!("{}", err.message());
        return;
    }

    let mut last_message = String::new();
    let mut ticker = tokio::time::interval(config.progress_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let status = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(FixEvent::Log(message)) => last_message = message,
                Some(FixEvent::Completed(_)) | None => {
                    let worker = fixer.clone();
                    break tokio::task::spawn_blocking(move || worker.complete())
                        .await
                        .unwrap_or(false);
                }
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                tracing::info!(target: "dbfix", event = "cancel_requested");
                cancellable.cancel();
            }
            _ = ticker.tick() => redraw(&cancellable, &last_message),
        }
    };

    println!();
    if status {
        println!("Completed");
    } else {
        println!("{last_message}");
    }
}
