use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth;
use crate::notify::{Notifier, WebhookSink};
use crate::settings::Settings;
use crate::sink::{DEFAULT_WEB_BASE, DiskSink, Sink, TransferClient, TransferConfig};
use crate::source::{OpendalSource, Source};
use crate::sync::backoff::Backoff;
use crate::sync::context::RunContext;
use crate::sync::engine::{ConfiguredSource, EngineOptions, RunOutcome, SyncEngine};
use crate::sync::planner::TransferPlanner;

const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sync,
    /// Plan and upload from already-present artifacts; never download.
    SkipFetch,
}

pub struct Runtime {
    app: String,
    engine: SyncEngine,
    notifier: Notifier,
    notify_worker: Option<JoinHandle<()>>,
}

impl Runtime {
    pub async fn bootstrap(settings: Settings, mode: RunMode) -> anyhow::Result<Self> {
        let (notifier, notify_worker) = start_notifier(&settings);
        match assemble(&settings, mode, notifier.clone()).await {
            Ok(engine) => Ok(Self {
                app: settings.application_name,
                engine,
                notifier,
                notify_worker,
            }),
            Err(err) => {
                notifier.announce(format!(
                    "🤖 {}: exception! {err:#}",
                    settings.application_name
                ));
                drop(notifier);
                flush(notify_worker).await;
                Err(err)
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<RunOutcome> {
        let Self {
            app,
            engine,
            notifier,
            notify_worker,
        } = self;
        notifier.announce(format!("🤖 {app}: starting"));

        let result = engine.run(&cancel).await;
        match &result {
            Ok(outcome) => notifier.announce(format!("🤖 {app}: exiting, {outcome}")),
            Err(err) => notifier.announce(format!("🤖 {app}: exception! {err}")),
        }

        drop(engine);
        drop(notifier);
        flush(notify_worker).await;
        Ok(result?)
    }
}

fn start_notifier(settings: &Settings) -> (Notifier, Option<JoinHandle<()>>) {
    match settings.slack.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            let (notifier, worker) =
                Notifier::spawn(Arc::new(WebhookSink::new(url)), settings.slack.log_progress);
            (notifier, Some(worker))
        }
        _ => (Notifier::disabled(), None),
    }
}

/// Waits for queued notifications. Transfers left running after a
/// cancellation still hold senders, hence the timeout.
async fn flush(worker: Option<JoinHandle<()>>) {
    let Some(worker) = worker else {
        return;
    };
    if tokio::time::timeout(NOTIFY_FLUSH_TIMEOUT, worker).await.is_err() {
        tracing::debug!("notification worker still busy at shutdown");
    }
}

async fn assemble(
    settings: &Settings,
    mode: RunMode,
    notifier: Notifier,
) -> anyhow::Result<SyncEngine> {
    tokio::fs::create_dir_all(&settings.download_path)
        .await
        .with_context(|| {
            format!(
                "failed to create download directory {}",
                settings.download_path.display()
            )
        })?;

    let token = auth::resolve_access_token(settings).await?;
    let client = auth::disk_client(settings, &token).context("invalid disk api configuration")?;
    let transfer = TransferClient::with_config(TransferConfig {
        upload_concurrency: settings.max_concurrent_transfers,
    });
    let web_base = settings
        .disk
        .web_base_url
        .as_deref()
        .unwrap_or(DEFAULT_WEB_BASE);
    let sink: Arc<dyn Sink> = Arc::new(DiskSink::new(client, transfer, web_base)?);

    let planner = TransferPlanner::new(settings.download_path.clone(), mode == RunMode::Sync);
    let ctx = RunContext::open(sink, &settings.root_folder, planner, notifier)
        .await
        .with_context(|| format!("failed to resolve root folder {}", settings.root_folder))?;

    let mut sources = Vec::with_capacity(settings.ftp_sources.len());
    for ftp in &settings.ftp_sources {
        let source: Arc<dyn Source> = Arc::new(
            OpendalSource::ftp(ftp)
                .with_context(|| format!("invalid ftp source {}:{}", ftp.host, ftp.port))?,
        );
        sources.push(ConfiguredSource {
            source,
            folders: ftp.folders.clone(),
        });
    }

    let options = EngineOptions {
        max_concurrent_transfers: settings.max_concurrent_transfers,
        max_passes: settings.max_passes,
        skip_dot_files: settings.skip_dot_files,
        backoff: Backoff::new(
            Duration::from_millis(settings.pass_backoff_ms),
            Duration::from_millis(settings.pass_backoff_max_ms),
            true,
        ),
    };
    tracing::info!(
        sources = sources.len(),
        download_path = %settings.download_path.display(),
        fetch = mode == RunMode::Sync,
        "engine ready"
    );
    Ok(SyncEngine::new(Arc::new(ctx), sources, options))
}
