//! shellcache: install, activate and serve versioned application shells from
//! a durable cache.

mod cli;
mod commands;
mod error;

use crate::cli::{Cli, Commands, GetArgs};
use crate::commands::App;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use shellcache_config::Config;
use shellcache_worker::Outcome;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            if e.is_retryable() {
                eprintln!("Hint: this may succeed if run again");
            }
            ExitCode::FAILURE
        },
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise 0 = warn, 1 = info, 2+ = debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let app = App::open(&config)?;

    match cli.command {
        Commands::Upgrade => report(app.upgrade().await?),
        Commands::Activate => report(app.activate().await?),
        Commands::Get(args) => get(&app, args).await?,
        Commands::Offline => {
            let report = app.offline().await?;
            println!("fetched {} resource(s)", report.fetched.len());
            if !report.is_complete() {
                for key in &report.failed {
                    eprintln!("failed: {key}");
                }
                exn::bail!(ErrorKind::OfflineIncomplete(report.failed.len()));
            }
        },
        Commands::Status => print!("{}", app.status().await?),
        Commands::Purge => {
            app.purge().await?;
            println!("cache purged");
        },
    }
    Ok(())
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Activated(r) => println!(
            "activated: {} evicted, {} retained, {} promoted{}",
            r.evicted,
            r.retained,
            r.promoted,
            if r.first_install { " (first install)" } else { "" }
        ),
        Outcome::Waiting => println!("installed; waiting for activation"),
        Outcome::Ignored => println!("already active"),
        Outcome::OfflineComplete(report) => println!("fetched {} resource(s)", report.fetched.len()),
    }
}

async fn get(app: &App, args: GetArgs) -> Result<()> {
    let (response, source) = app.get(args.method.into(), &args.url).await?;
    eprintln!("{} ({source})", response.status);
    match args.output {
        Some(path) => tokio::fs::write(&path, &response.body).await.or_raise(|| ErrorKind::Output)?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&response.body).await.or_raise(|| ErrorKind::Output)?;
            stdout.flush().await.or_raise(|| ErrorKind::Output)?;
        },
    }
    Ok(())
}
