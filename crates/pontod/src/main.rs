use anyhow::{Context, Result};
use ponto_core::controller::RecognitionEventController;
use ponto_core::matcher::{EuclideanMatcher, Gallery, Matcher};
use ponto_core::notify::Notifier;
use ponto_core::submitter::{AttendanceStore, AttendanceSubmitter};
use ponto_core::types::{Probe, Timestamp};
use ponto_core::Settings;
use ponto_store::{DirectoryEvidenceSink, GalleryStore, HttpAttendanceStore, WebhookNotifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod pipeline;
mod wire;

use config::DaemonOptions;
use pipeline::{spawn_pipeline, write_decisions, PendingFrame, PipelineHandle};
use wire::FrameInput;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("pontod starting");

    let options = DaemonOptions::from_env();
    let settings = Settings::load(options.config_path.as_deref()).context("loading settings")?;

    let gallery_path = settings.storage.gallery_path();
    let gallery = open_gallery(&gallery_path, &settings).context("loading gallery")?;

    let shutdown = CancellationToken::new();
    let store = HttpAttendanceStore::new(&settings.backend.url, settings.backend.timeout())
        .context("building attendance store client")?;
    tracing::info!(url = store.base_url(), "attendance store configured");
    let submitter = AttendanceSubmitter::new(store, settings.backend.max_retries, settings.backend.retry_interval())
        .with_attempt_timeout(settings.backend.timeout())
        .with_cancellation(shutdown.child_token());

    let mut controller =
        RecognitionEventController::new(settings.recognition.clone(), EuclideanMatcher, gallery, submitter);
    if settings.recognition.save_unknown_faces {
        let dir = settings.storage.evidence_dir();
        tracing::info!(dir = %dir.display(), "saving unknown faces");
        controller = controller.with_evidence_sink(Arc::new(DirectoryEvidenceSink::new(dir)));
    }

    match &settings.notifications.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url, settings.notifications.webhook_timeout())
                .context("building webhook client")?;
            tracing::info!(url = %url, "webhook notifications enabled");
            let controller = controller.with_notifier(Arc::new(notifier), settings.notifications.policy());
            serve(controller, &options, gallery_path, shutdown).await
        }
        None => serve(controller, &options, gallery_path, shutdown).await,
    }
}

/// Open the gallery database, take the startup backup, and load it.
fn open_gallery(path: &Path, settings: &Settings) -> Result<Gallery> {
    let store = GalleryStore::open(path).with_context(|| format!("opening {}", path.display()))?;
    if settings.storage.auto_backup {
        match store.backup(&settings.storage.backup_dir(), settings.storage.max_backups) {
            Ok(backup) => tracing::info!(path = %backup.display(), "gallery backed up"),
            Err(err) => tracing::warn!(error = %err, "gallery backup failed; continuing"),
        }
    }
    Ok(store.load_gallery()?)
}

async fn serve<M, S, N>(
    controller: RecognitionEventController<M, S, N>,
    options: &DaemonOptions,
    gallery_path: PathBuf,
    shutdown: CancellationToken,
) -> Result<()>
where
    M: Matcher + 'static,
    S: AttendanceStore + 'static,
    N: Notifier,
{
    let handle = spawn_pipeline(controller, options.queue_depth);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
            }
            shutdown.cancel();
        });
    }
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let (pending_tx, pending_rx) = mpsc::channel::<PendingFrame>(options.queue_depth);
    let emit = options.emit_decisions;
    let mut writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        write_decisions(pending_rx, &mut stdout, emit).await
    });

    tracing::info!("pontod ready");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = hangup.recv() => reload_gallery(&handle, &gallery_path).await,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(input) = parse_line(&line) else {
                        continue;
                    };
                    let now = chrono::Local::now();
                    let observed_at = input.observed_at(now);
                    let queued = tokio::select! {
                        queued = queue_frame(&handle, &pending_tx, observed_at, input.into_probes(now)) => queued,
                        _ = shutdown.cancelled() => break,
                    };
                    if let Err(err) = queued {
                        tracing::error!(error = %err, "frame intake stopped");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("input closed");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to read input");
                    break;
                }
            },
        }
    }

    // Queued frames still get their decisions written. After an interrupt,
    // cancelled submissions answer promptly and the grace period bounds the rest.
    drop(pending_tx);
    let grace = Duration::from_secs(options.shutdown_grace_secs);
    let drained = tokio::select! {
        written = &mut writer => Some(written),
        _ = async { shutdown.cancelled().await; tokio::time::sleep(grace).await } => None,
    };
    let result = match drained {
        Some(Ok(written)) => written.context("writing decisions"),
        Some(Err(err)) => Err(anyhow::Error::new(err).context("decision writer task")),
        None => {
            tracing::warn!("in-flight frames abandoned at shutdown");
            writer.abort();
            Ok(())
        }
    };

    shutdown.cancel();
    match handle.stats().await {
        Ok(stats) => tracing::info!(
            identities = stats.identities,
            cache_entries = stats.cache_entries,
            tracked_identities = stats.tracked_identities,
            unknown_failures = stats.unknown_failures,
            lockout_remaining_secs = ?stats.lockout_remaining_secs,
            "controller stats"
        ),
        Err(err) => tracing::warn!(error = %err, "controller stats unavailable"),
    }
    tracing::info!("pontod shutting down");
    result
}

/// Parse one input line. Blank and malformed lines yield nothing.
fn parse_line(line: &str) -> Option<FrameInput> {
    if line.trim().is_empty() {
        return None;
    }
    match FrameInput::parse(line) {
        Ok(input) => Some(input),
        Err(err) => {
            tracing::warn!(error = %err, "skipping malformed frame");
            None
        }
    }
}

/// Queue a frame and hand its pending decisions to the writer, keeping arrival order.
async fn queue_frame(
    handle: &PipelineHandle,
    pending: &mpsc::Sender<PendingFrame>,
    observed_at: Timestamp,
    probes: Vec<Probe>,
) -> Result<()> {
    let frame = handle.submit_frame(observed_at, probes).await?;
    pending
        .send(frame)
        .await
        .map_err(|_| anyhow::anyhow!("decision writer exited"))
}

async fn reload_gallery(handle: &PipelineHandle, path: &Path) {
    let path = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || GalleryStore::open(&path)?.load_gallery()).await;
    match loaded {
        Ok(Ok(gallery)) => {
            if let Err(err) = handle.replace_gallery(gallery).await {
                tracing::error!(error = %err, "gallery reload not applied");
            }
        }
        Ok(Err(err)) => tracing::error!(error = %err, "gallery reload failed; keeping current gallery"),
        Err(err) => tracing::error!(error = %err, "gallery reload task failed"),
    }
}
