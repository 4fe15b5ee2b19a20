//! Background retraining
//!
//! Rating writes push a request onto an unbounded channel and return at once.
//! A single worker task drains the channel and retrains from the full rating
//! set. Requests that pile up while a run is in flight collapse into one
//! follow-up run, since every run reads everything the store holds at its start.

use crate::collaborative::{CollaborativeFilteringEngine, TrainingReport};
use crate::error::{RecommenderError, Result};
use crate::store::RatingStore;
use crate::types::{MovieId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why a retrain was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainReason {
    RatingChanged { user_id: UserId, movie_id: MovieId },
    Periodic,
    Manual,
}

/// Reads the rating store and fits a new snapshot off the async runtime
#[derive(Clone)]
pub struct ModelTrainer {
    store: Arc<dyn RatingStore>,
    engine: Arc<CollaborativeFilteringEngine>,
}

impl ModelTrainer {
    pub fn new(store: Arc<dyn RatingStore>, engine: Arc<CollaborativeFilteringEngine>) -> Self {
        Self { store, engine }
    }

    pub async fn train(&self) -> Result<TrainingReport> {
        let ratings = self.store.list_all_ratings().await?;
        let engine = Arc::clone(&self.engine);

        tokio::task::spawn_blocking(move || engine.train(&ratings))
            .await
            .map_err(|e| RecommenderError::TrainingFailure(format!("training task aborted: {e}")))?
    }
}

/// Handle used to request a retrain. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RetrainScheduler {
    sender: mpsc::UnboundedSender<RetrainReason>,
}

impl RetrainScheduler {
    /// Queue a retrain. Returns false once the worker has stopped.
    pub fn schedule(&self, reason: RetrainReason) -> bool {
        match self.sender.send(reason) {
            Ok(()) => {
                debug!(?reason, "Retrain scheduled");
                true
            }
            Err(_) => {
                warn!(?reason, "Retrain worker stopped, request dropped");
                false
            }
        }
    }
}

/// Counters returned when the worker exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub runs: usize,
    pub failures: usize,
    /// Requests folded into another run
    pub coalesced: usize,
}

pub struct RetrainWorker {
    trainer: ModelTrainer,
    receiver: mpsc::UnboundedReceiver<RetrainReason>,
    interval: Option<Duration>,
}

/// Create a connected scheduler and worker. With `interval` set the worker
/// also retrains on that period.
pub fn retrain_channel(
    trainer: ModelTrainer,
    interval: Option<Duration>,
) -> (RetrainScheduler, RetrainWorker) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        RetrainScheduler { sender },
        RetrainWorker {
            trainer,
            receiver,
            interval: interval.filter(|period| !period.is_zero()),
        },
    )
}

impl RetrainWorker {
    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }

    /// Process requests until every scheduler handle is dropped
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut ticker = self.interval.map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!(
            interval_secs = self.interval.map(|d| d.as_secs()),
            "Retrain worker started"
        );

        loop {
            let reason = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    message = self.receiver.recv() => match message {
                        Some(reason) => reason,
                        None => break,
                    },
                    _ = ticker.tick() => RetrainReason::Periodic,
                },
                None => match self.receiver.recv().await {
                    Some(reason) => reason,
                    None => break,
                },
            };

            let mut folded = 0;
            while self.receiver.try_recv().is_ok() {
                folded += 1;
            }
            stats.coalesced += folded;

            debug!(?reason, coalesced = folded, "Starting retrain");

            match self.trainer.train().await {
                Ok(report) => {
                    stats.runs += 1;
                    info!(
                        ?reason,
                        version = report.version,
                        rmse = report.training_rmse,
                        duration_ms = report.duration_ms,
                        "Background retrain finished"
                    );
                }
                Err(RecommenderError::DataUnavailable(detail)) => {
                    stats.runs += 1;
                    debug!(?reason, %detail, "Nothing to train on yet");
                }
                Err(e) => {
                    stats.runs += 1;
                    stats.failures += 1;
                    error!(?reason, error = %e, "Background retrain failed");
                }
            }
        }

        info!(
            runs = stats.runs,
            failures = stats.failures,
            coalesced = stats.coalesced,
            "Retrain worker stopped"
        );
        stats
    }
}
