use clap::Parser;
use slog::{error, info, o, warn, Drain, Logger};
use tokio_util::sync::CancellationToken;

use crate::briefing::Briefing;
use crate::catalog::{Catalog, CatalogError};
use crate::orchestrator::Selection;
use crate::transport::{http::NetTransport, TransportError};

mod briefing;
mod catalog;
mod cli;
mod extract;
mod naming;
mod orchestrator;
mod resolver;
#[cfg(test)]
mod test_support;
mod transport;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not write briefing manifest: {0}")]
    Manifest(#[from] std::io::Error),
    #[error("could not print catalog: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Conventional exit status for a process stopped by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = cli::Cli::parse();
    let logger = get_logger(cli.log_level.into());

    let catalog = match &cli.catalog {
        Some(path) => Catalog::from_path(path)?,
        None => {
            let catalog = catalog::defaults::catalog();
            catalog.validate()?;
            catalog
        }
    };

    if cli.print_catalog {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    let token = CancellationToken::new();
    let interrupt = token.clone();
    let signal_log = logger.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, interrupt, signal_log).await {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let transport = NetTransport::from_cli(&cli, logger.new(o!("component" => "transport")))?;
    let selection = Selection {
        only: cli.only.clone(),
        skip: cli.skip.clone(),
    };
    for id in selection.only.iter().chain(&selection.skip) {
        if catalog.get(id).is_none() {
            warn!(logger, "Unknown product id {}", id);
        }
    }

    info!(logger, "Fetching {} catalog products...", catalog.products.len());
    let (result, report) = orchestrator::run(
        &catalog,
        &transport,
        &cli.output_dir,
        &selection,
        &token,
        &logger,
    )
    .await;
    transport.close().await;

    for entry in report.failures() {
        error!(logger, "{}", serde_json::to_string(entry)?);
    }

    let manifest = Briefing::new(&result, chrono::Utc::now())
        .write(&cli.output_dir)
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    info!(
        logger,
        "Finished: {} fetched, {} failed, manifest at {}",
        report.fetched(),
        report.failures().count(),
        manifest.display()
    );
    Ok(())
}

fn get_logger(level: slog::Level) -> Logger {
    let drain = slog_async::Async::new(
        slog::Fuse::new(slog::Filter::new(
            slog_term::FullFormat::new(slog_term::PlainSyncDecorator::new(std::io::stderr()))
                .build(),
            move |record: &slog::Record| record.level().is_at_least(level),
        ))
        .fuse(),
    )
    .build()
    .fuse();

    slog::Logger::root(drain, o!())
}

/// First interrupt cancels `token` so the current product can finish; a
/// second one returns `true` and the caller exits immediately. Returns
/// `false` if the signal source fails.
async fn watch_interrupts<F, Fut>(mut interrupt: F, token: CancellationToken, log: Logger) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = interrupt().await {
        warn!(log, "Cannot listen for Ctrl-C: {}", e);
        return false;
    }
    warn!(log, "Interrupted, finishing current product (Ctrl-C again to exit)");
    token.cancel();

    if let Err(e) = interrupt().await {
        warn!(log, "Cannot listen for Ctrl-C: {}", e);
        return false;
    }
    warn!(log, "Interrupted again, exiting");
    true
}
