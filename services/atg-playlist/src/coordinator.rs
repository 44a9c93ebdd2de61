//!
//! src/coordinator.rs
//!
//! Resolution coordinator. Fans out one task per artist under a counting
//! semaphore, each task resolves the artist then fetches its top tracks,
//! and fans the track ids back in through a JoinSet drained by the
//! coordinator alone
//!

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use tokio::{sync::{OwnedSemaphorePermit, Semaphore}, task::{Id, JoinError, JoinSet}};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{ArtistResolver, TrackFetcher};
use crate::errors::GeneratorError;
use crate::types::{ArtistId, ArtistName, TrackId};

/// What to do with the rest of the lineup once an artist fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// record the failure, keep going, report at the end
    #[default]
    BestEffort,
    /// stop spawning after the first failure, let in-flight tasks drain
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(FailurePolicy::BestEffort),
            "fail-fast" | "fail_fast" => Ok(FailurePolicy::FailFast),
            other => Err(format!("FAILURE_POLICY must be best-effort or fail-fast, got {other}")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::BestEffort => f.write_str("best-effort"),
            FailurePolicy::FailFast => f.write_str("fail-fast"),
        }
    }
}

/// Counting semaphore bounding how many artists are in flight. Owned by a
/// coordinator, never global
#[derive(Debug, Clone)]
pub struct ConcurrencyBudget {
    permits: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyBudget {
    pub fn new(permits: usize) -> Result<Self, GeneratorError> {
        if permits == 0 {
            return Err(GeneratorError::Config(
                "concurrency budget must be at least 1".to_string()
            ));
        }
        Ok( Self { permits, semaphore: Arc::new(Semaphore::new(permits)) } )
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Resolve,
    Fetch,
    Task,
}

#[derive(Debug)]
pub struct ArtistFailure {
    pub artist: ArtistName,
    pub stage: FailureStage,
    pub error: GeneratorError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Shutdown,
    FirstFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted(AbortReason),
}

/// Everything a run produced. `tracks` is in completion order and may hold
/// duplicates
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub attempted: usize,
    pub resolved: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub failures: Vec<ArtistFailure>,
    pub tracks: Vec<TrackId>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            outcome: RunOutcome::Completed,
            attempted: 0,
            resolved: 0,
            not_found: 0,
            skipped: 0,
            failures: Vec::new(),
            tracks: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: attempted {}, resolved {}, not found {}, failed {}, skipped {}, tracks {}",
            self.outcome, self.attempted, self.resolved, self.not_found,
            self.failed(), self.skipped, self.tracks.len()
        )
    }
}

/// Result of a single artist task
#[derive(Debug)]
enum TaskOutcome {
    Resolved { id: ArtistId, tracks: Vec<TrackId> },
    NotFound,
    Failed { stage: FailureStage, error: GeneratorError },
}

/// Resolve then fetch for one artist. Never panics on adapter errors,
/// they come back as `Failed`
async fn resolve_artist(
    resolver: &dyn ArtistResolver,
    fetcher: &dyn TrackFetcher,
    artist: &ArtistName,
    limit: usize,
) -> TaskOutcome {
    let id = match resolver.resolve(artist).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            info!(artist = %artist, "artist.not_found");
            return TaskOutcome::NotFound;
        },
        Err(error) => return TaskOutcome::Failed { stage: FailureStage::Resolve, error },
    };
    debug!(artist = %artist, id = %id, "artist.resolved");

    match fetcher.top_tracks(id, limit).await {
        Ok(tracks) => {
            let tracks: Vec<TrackId> = tracks.iter()
                .take(limit)
                .inspect(|t| debug!(
                    artist = %artist,
                    credited = ?t.artist.as_ref().map(|a| a.name.as_str()),
                    track = t.id,
                    title = %t.title,
                    rank = ?t.rank,
                    "artist.track"
                ))
                .map(|t| t.track_id())
                .collect();
            TaskOutcome::Resolved { id, tracks }
        },
        Err(error) => TaskOutcome::Failed { stage: FailureStage::Fetch, error },
    }
}

pub struct ResolutionCoordinator {
    resolver: Arc<dyn ArtistResolver>,
    fetcher: Arc<dyn TrackFetcher>,
    budget: ConcurrencyBudget,
    track_limit: usize,
    policy: FailurePolicy,

    // stops new spawns, in-flight tasks still finish
    shutdown: CancellationToken,
}

impl ResolutionCoordinator {
    pub fn new(
        resolver: Arc<dyn ArtistResolver>,
        fetcher: Arc<dyn TrackFetcher>,
        budget: ConcurrencyBudget,
        track_limit: usize,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            budget,
            track_limit,
            policy: FailurePolicy::BestEffort,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[cfg(test)]
    pub fn budget(&self) -> &ConcurrencyBudget {
        &self.budget
    }

    pub async fn run(&self, artists: Vec<ArtistName>) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        self.run_inner(run_id, artists).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, artists: Vec<ArtistName>) -> RunReport {
        let total = artists.len();
        info!(
            artists = total,
            budget = self.budget.permits(),
            limit = self.track_limit,
            policy = %self.policy,
            "coordinator.start"
        );

        let mut report = RunReport::new(run_id);
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut in_flight: HashMap<Id, ArtistName> = HashMap::new();

        // tripped by a task before it releases its permit, so the spawn
        // loop sees it as soon as the slot frees
        let first_failure = CancellationToken::new();

        for (index, artist) in artists.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => None,
                permit = self.budget.acquire() => permit,
            };
            let Some(permit) = permit else {
                warn!(remaining = total - index, "coordinator.shutdown");
                report.outcome = RunOutcome::Aborted(AbortReason::Shutdown);
                report.skipped = total - index;
                break;
            };

            while let Some(done) = tasks.try_join_next_with_id() {
                self.record(done, &mut in_flight, &mut report);
            }

            if self.policy == FailurePolicy::FailFast && first_failure.is_cancelled() {
                warn!(remaining = total - index, "coordinator.fail_fast");
                report.outcome = RunOutcome::Aborted(AbortReason::FirstFailure);
                report.skipped = total - index;
                break;
            }

            report.attempted += 1;
            let resolver = self.resolver.clone();
            let fetcher = self.fetcher.clone();
            let limit = self.track_limit;
            let failed = first_failure.clone();
            let span = info_span!("artist", artist = %artist);
            let name = artist.clone();

            let handle = tasks.spawn(async move {
                let _permit = permit;
                // dropped before the permit, on failure and on panic alike
                let trip = failed.drop_guard();
                let outcome = resolve_artist(&*resolver, &*fetcher, &name, limit).await;
                if !matches!(outcome, TaskOutcome::Failed { .. }) {
                    trip.disarm();
                }
                outcome
            }.instrument(span));
            in_flight.insert(handle.id(), artist);
        }

        // drain barrier
        while let Some(done) = tasks.join_next_with_id().await {
            self.record(done, &mut in_flight, &mut report);
        }

        info!(
            outcome = ?report.outcome,
            attempted = report.attempted,
            resolved = report.resolved,
            not_found = report.not_found,
            failed = report.failed(),
            skipped = report.skipped,
            tracks = report.tracks.len(),
            available = self.budget.available(),
            "coordinator.done"
        );
        report
    }

    fn record(
        &self,
        done: Result<(Id, TaskOutcome), JoinError>,
        in_flight: &mut HashMap<Id, ArtistName>,
        report: &mut RunReport,
    ) {
        let (id, outcome) = match done {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => {
                let artist = in_flight.remove(&e.id())
                    .unwrap_or_else(|| ArtistName::new("<unknown>"));
                let reason = if e.is_panic() { "panicked" } else { "cancelled" };
                error!(artist = %artist, reason, "artist.task.failed");
                report.failures.push(ArtistFailure {
                    artist,
                    stage: FailureStage::Task,
                    error: GeneratorError::Task(reason.to_string()),
                });
                self.fail_fast(report);
                return;
            }
        };
        let artist = in_flight.remove(&id)
            .unwrap_or_else(|| ArtistName::new("<unknown>"));

        match outcome {
            TaskOutcome::Resolved { id, tracks } => {
                info!(artist = %artist, id = %id, tracks = tracks.len(), "artist.done");
                report.resolved += 1;
                report.tracks.extend(tracks);
            },
            TaskOutcome::NotFound => {
                report.not_found += 1;
            },
            TaskOutcome::Failed { stage, error } => {
                error!(artist = %artist, stage = ?stage, error = %error, "artist.failed");
                report.failures.push(ArtistFailure { artist, stage, error });
                self.fail_fast(report);
            },
        }
    }

    // a failure after the last spawn still aborts the run. Shutdown wins if
    // it came first
    fn fail_fast(&self, report: &mut RunReport) {
        if self.policy == FailurePolicy::FailFast && report.outcome == RunOutcome::Completed {
            report.outcome = RunOutcome::Aborted(AbortReason::FirstFailure);
        }
    }
}
