//!
//! src/main.rs
//!
//! Scrapes the ArcTanGent lineup, resolves every artist on Deezer with
//! a bounded number of artists in flight, and replaces the target
//! playlist with each artist's top tracks
//!

mod adapters;
mod config;
mod coordinator;
mod deezer;
mod errors;
mod fetch;
mod lineup;
mod logging;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{ArtistLineupSource, PlaylistWriter};
use crate::coordinator::{ConcurrencyBudget, ResolutionCoordinator, RunOutcome};
use crate::errors::GeneratorError;

#[tokio::main]
async fn main() -> Result<(), GeneratorError> {
    let cfgs = match config::load_config() {
        Ok(cfgs) => cfgs,
        Err(e) => {
            let program = std::env::args().next()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
            eprintln!("{e}\n");
            eprintln!("{}", config::usage(&program));
            return Err(e);
        }
    };
    let _logger = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service = "atg-playlist",
        version = %env!("CARGO_PKG_VERSION"),
        "starting"
    );
    tracing::debug!(config = ?cfgs, "config");

    // fatal before any fan-out
    let budget  = ConcurrencyBudget::new(cfgs.concurrency.budget)?;
    let lineup  = lineup::AtgLineup::new(&cfgs.http, &cfgs.atg)?;
    let deezer  = Arc::new(deezer::DeezerClient::new(&cfgs.http, &cfgs.deezer)?);
    let artists = lineup.fetch_lineup().await?;

    let shutdown = CancellationToken::new();
    let coordinator = ResolutionCoordinator::new(
        deezer.clone(),
        deezer.clone(),
        budget,
        cfgs.concurrency.top_track_limit,
    )
    .with_policy(cfgs.concurrency.failure_policy)
    .with_shutdown(shutdown.clone());

    let trigger = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(msg = "finishing started artists, spawning no more", "generator.signal");
            shutdown.cancel();
        }
    });

    let report = coordinator.run(artists).await;
    trigger.abort();

    for failure in &report.failures {
        warn!(
            run_id = %report.run_id,
            artist = %failure.artist,
            stage = ?failure.stage,
            error = %failure.error,
            "generator.failure"
        );
    }
    println!("{report}");

    if let Some(fatal) = report.failures.iter().find(|f| f.error.is_fatal()) {
        error!(artist = %fatal.artist, error = %fatal.error, "generator.fatal");
        return Err(GeneratorError::Config(fatal.error.to_string()));
    }

    // never replace the playlist with a partial lineup
    if let RunOutcome::Aborted(reason) = report.outcome {
        error!(run_id = %report.run_id, reason = ?reason, "generator.aborted");
        return Err(GeneratorError::Task(format!("run aborted: {reason:?}")));
    }
    debug_assert!(report.is_completed());

    deezer.write_playlist(&report.tracks).await?;
    info!(
        run_id = %report.run_id,
        playlist = cfgs.deezer.playlist_id,
        tracks = report.tracks.len(),
        "generator.done"
    );
    Ok(())
}
