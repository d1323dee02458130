use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::context::RunContext;
use super::ledger::LedgerError;
use super::planner::{FetchReason, Plan};
use super::upload::{ItemError, TransferOutcome, transfer_item};
use crate::source::{RemoteItem, Source, SourceEnumerator, SourceError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("transfer of {name} failed: {source}")]
    Item {
        name: String,
        #[source]
        source: ItemError,
    },
}

/// A source and the folders to archive from it.
pub struct ConfiguredSource {
    pub source: Arc<dyn Source>,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_concurrent_transfers: usize,
    pub max_passes: Option<u32>,
    pub skip_dot_files: bool,
    pub backoff: Backoff,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            max_passes: None,
            skip_dot_files: true,
            backoff: Backoff::none(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Items handed to a transfer task. Drives convergence.
    pub attempted: usize,
    pub confirmed: usize,
    pub pending: usize,
    /// Already in the ledger.
    pub skipped: usize,
    pub unresolvable: usize,
    pub unavailable_sources: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Converged { passes: u32 },
    Cancelled,
    PassLimitReached { passes: u32 },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Converged { passes } => write!(f, "converged after {passes} pass(es)"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
            RunOutcome::PassLimitReached { passes } => {
                write!(f, "stopped at pass limit ({passes})")
            }
        }
    }
}

type TaskHandle = JoinHandle<(String, Result<TransferOutcome, ItemError>)>;

/// Repeats archive passes until one of them has nothing left to attempt.
pub struct SyncEngine {
    ctx: Arc<RunContext>,
    sources: Vec<ConfiguredSource>,
    options: EngineOptions,
    enumerator: SourceEnumerator,
    limiter: Arc<Semaphore>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<RunContext>, sources: Vec<ConfiguredSource>, options: EngineOptions) -> Self {
        let limiter = Arc::new(Semaphore::new(options.max_concurrent_transfers.max(1)));
        Self {
            ctx,
            sources,
            enumerator: SourceEnumerator::new(options.skip_dot_files),
            options,
            limiter,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome, EngineError> {
        let mut passes = 0u32;
        let mut busy_streak = 0u32;
        loop {
            passes += 1;
            let report = match self.run_pass(cancel).await? {
                PassOutcome::Completed(report) => report,
                PassOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
            };
            tracing::info!(
                pass = passes,
                attempted = report.attempted,
                confirmed = report.confirmed,
                pending = report.pending,
                skipped = report.skipped,
                unresolvable = report.unresolvable,
                unavailable_sources = report.unavailable_sources,
                "pass finished"
            );

            if report.attempted == 0 {
                return Ok(RunOutcome::Converged { passes });
            }
            if self.options.max_passes.is_some_and(|max| passes >= max) {
                tracing::warn!(passes, pending = report.pending, "pass limit reached");
                return Ok(RunOutcome::PassLimitReached { passes });
            }

            let delay = self.options.backoff.delay(busy_streak);
            busy_streak = busy_streak.saturating_add(1);
            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before next pass");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// One pass: plan against the ledger as of pass start, dispatch transfers,
    /// then wait for every dispatched transfer.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassOutcome, EngineError> {
        let snapshot = self.ctx.ledger.load().await?;
        let mut report = PassReport::default();
        let mut tasks: Vec<TaskHandle> = Vec::new();
        // Artifact paths owned by a task dispatched this pass.
        let mut claimed: HashSet<PathBuf> = HashSet::new();

        for configured in &self.sources {
            let source = &configured.source;
            'folders: for folder in &configured.folders {
                let mut enumeration = match self.enumerator.open(source.as_ref(), folder).await {
                    Ok(enumeration) => enumeration,
                    Err(err) => {
                        self.source_unavailable(source.label(), folder, &err);
                        report.unavailable_sources += 1;
                        break 'folders;
                    }
                };

                while let Some(next) = enumeration.next().await {
                    if cancel.is_cancelled() {
                        // Dispatched tasks are detached, not aborted.
                        tracing::info!(in_flight = tasks.len(), "run cancelled");
                        return Ok(PassOutcome::Cancelled);
                    }
                    let item = match next {
                        Ok(item) => item,
                        Err(err) => {
                            self.source_unavailable(source.label(), folder, &err);
                            report.unavailable_sources += 1;
                            break 'folders;
                        }
                    };

                    match self.ctx.planner.plan(&item, &snapshot).await {
                        Ok(Plan::Confirmed) => report.skipped += 1,
                        Ok(Plan::Unresolvable { .. }) => report.unresolvable += 1,
                        Ok(Plan::Transfer { local, .. }) if claimed.contains(&local) => {
                            tracing::debug!(
                                source = source.label(),
                                name = %item.name,
                                "artifact already in use this pass, deferring"
                            );
                            report.attempted += 1;
                            report.pending += 1;
                        }
                        Ok(Plan::Transfer { local, fetch }) => {
                            report.attempted += 1;
                            claimed.insert(local.clone());
                            tasks.push(self.dispatch(source.clone(), item, local, fetch));
                        }
                        Err(err) => {
                            tracing::warn!(name = %item.name, error = %err, "skipping unplannable file");
                            report.unresolvable += 1;
                        }
                    }
                }
            }
        }

        let mut fatal = None;
        for handle in tasks {
            match handle.await {
                Ok((_, Ok(TransferOutcome::Confirmed))) => report.confirmed += 1,
                Ok((_, Ok(TransferOutcome::PendingRetry(_)))) => report.pending += 1,
                Ok((name, Err(err))) => {
                    report.pending += 1;
                    if err.is_fatal() {
                        tracing::error!(name = %name, error = %err, "confirmation not durable");
                        fatal.get_or_insert(EngineError::Item { name, source: err });
                    } else {
                        tracing::warn!(
                            name = %name,
                            error = %err,
                            retryable = err.is_retryable(),
                            "transfer failed, retrying next pass"
                        );
                    }
                }
                Err(err) => {
                    report.pending += 1;
                    tracing::error!(error = %err, "transfer task panicked");
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(PassOutcome::Completed(report)),
        }
    }

    fn dispatch(
        &self,
        source: Arc<dyn Source>,
        item: RemoteItem,
        local: PathBuf,
        fetch: Option<FetchReason>,
    ) -> TaskHandle {
        let ctx = self.ctx.clone();
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let outcome = match limiter.acquire_owned().await {
                Ok(_permit) => transfer_item(&ctx, source.as_ref(), &item, &local, fetch).await,
                Err(_) => Err(ItemError::LimiterClosed),
            };
            if let Ok(TransferOutcome::PendingRetry(reason)) = &outcome {
                ctx.notifier
                    .progress(format!("{}: will retry next pass ({reason})", item.name));
            }
            (item.name, outcome)
        })
    }

    fn source_unavailable(&self, label: &str, folder: &str, err: &SourceError) {
        tracing::warn!(source = label, folder, error = %err, "source unavailable, skipping it this pass");
        self.ctx
            .notifier
            .announce(format!("{label}: source unavailable ({err}), skipped this pass"));
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
