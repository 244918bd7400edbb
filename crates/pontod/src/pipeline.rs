use crate::wire::FrameOutput;
use ponto_core::controller::{ControllerStats, Decision, RecognitionEventController};
use ponto_core::matcher::{Gallery, Matcher};
use ponto_core::notify::Notifier;
use ponto_core::submitter::AttendanceStore;
use ponto_core::types::{Probe, Timestamp};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline task exited")]
    ChannelClosed,
}

/// Messages sent from the input loop to the pipeline task.
enum PipelineRequest {
    Frame {
        probes: Vec<Probe>,
        reply: oneshot::Sender<Vec<Decision>>,
    },
    ReplaceGallery {
        gallery: Gallery,
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<ControllerStats>,
    },
}

/// A frame accepted into the queue whose decisions may still be pending.
pub struct PendingFrame {
    pub observed_at: Timestamp,
    reply: oneshot::Receiver<Vec<Decision>>,
}

impl PendingFrame {
    pub async fn decisions(self) -> Result<Vec<Decision>, PipelineError> {
        self.reply.await.map_err(|_| PipelineError::ChannelClosed)
    }
}

/// Clone-safe handle to the pipeline task.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineRequest>,
}

impl PipelineHandle {
    /// Queue one frame for decision. Returns once the frame is queued, not once it is decided.
    pub async fn submit_frame(&self, observed_at: Timestamp, probes: Vec<Probe>) -> Result<PendingFrame, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::Frame {
                probes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        Ok(PendingFrame {
            observed_at,
            reply: reply_rx,
        })
    }

    /// Decide every face of one frame and wait for the result.
    pub async fn process_frame(&self, probes: Vec<Probe>) -> Result<Vec<Decision>, PipelineError> {
        let observed_at = probes.first().map(|p| p.observed_at).unwrap_or_else(chrono::Local::now);
        self.submit_frame(observed_at, probes).await?.decisions().await
    }

    /// Swap the gallery between frames.
    pub async fn replace_gallery(&self, gallery: Gallery) -> Result<(), PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::ReplaceGallery {
                gallery,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)
    }

    pub async fn stats(&self) -> Result<ControllerStats, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::Stats { reply: reply_tx })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PipelineError::ChannelClosed)
    }
}

/// Spawn the controller on its own task behind a bounded request queue.
///
/// Frames are started in queue order, each on its own task, so a submission
/// stuck on the attendance store never holds back later frames. The task
/// exits once every handle is dropped.
pub fn spawn_pipeline<M, S, N>(controller: RecognitionEventController<M, S, N>, queue_depth: usize) -> PipelineHandle
where
    M: Matcher + 'static,
    S: AttendanceStore + 'static,
    N: Notifier,
{
    let (tx, mut rx) = mpsc::channel::<PipelineRequest>(queue_depth.max(1));
    let controller = Arc::new(controller);

    tokio::spawn(async move {
        tracing::info!("pipeline task started");
        while let Some(req) = rx.recv().await {
            match req {
                PipelineRequest::Frame { probes, reply } => {
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        let faces = probes.len();
                        let decisions = controller.process_frame(probes).await;
                        tracing::trace!(faces, "frame decided");
                        let _ = reply.send(decisions);
                    });
                }
                PipelineRequest::ReplaceGallery { gallery, reply } => {
                    controller.replace_gallery(gallery);
                    let _ = reply.send(());
                }
                PipelineRequest::Stats { reply } => {
                    let _ = reply.send(controller.stats(chrono::Local::now()));
                }
            }
        }
        tracing::info!("pipeline task exiting");
    });

    PipelineHandle { tx }
}

/// Write each frame's decisions as one JSON line, in the order frames were queued.
///
/// Runs until the sending side closes. A frame whose pipeline task died is
/// logged and skipped.
pub async fn write_decisions<W>(mut pending: mpsc::Receiver<PendingFrame>, out: &mut W, emit: bool) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = pending.recv().await {
        let observed_at = frame.observed_at;
        let decisions = match frame.decisions().await {
            Ok(decisions) => decisions,
            Err(err) => {
                tracing::error!(error = %err, "frame dropped");
                continue;
            }
        };
        for decision in &decisions {
            tracing::debug!(status = %decision.status_line(), "decision");
        }
        if !emit {
            continue;
        }

        match serde_json::to_string(&FrameOutput::new(observed_at, &decisions)) {
            Ok(mut json) => {
                json.push('\n');
                out.write_all(json.as_bytes()).await?;
                out.flush().await?;
            }
            Err(err) => tracing::error!(error = %err, "failed to encode decisions"),
        }
    }
    Ok(())
}
