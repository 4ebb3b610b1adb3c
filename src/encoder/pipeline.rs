//! Recording pipelines
//!
//! A pipeline is one in-flight encoding job: a pass-through byte sink feeding
//! the encoder's input, plus the encoder process itself. Pushing never waits
//! on the encoder; a writer task drains the sink in order. Closing the sink
//! signals end of stream and the encoder is left to flush and exit on its own.

use crate::encoder::ffmpeg::{EncoderLauncher, EncoderProcess};
use crate::encoder::types::{EncoderJob, SessionIdGenerator};
use crate::media::{MediaKind, ParticipantId, Resolution};
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

/// Byte counters for one pipeline
#[derive(Debug, Default)]
struct PipelineCounters {
    chunks: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time view of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub output_path: String,
    pub resolution: Option<String>,
    pub pushed_chunks: u64,
    pub pushed_bytes: u64,
    pub dropped_chunks: u64,
    pub closed: bool,
    pub ended: bool,
}

/// One in-flight encoding job
pub struct PipelineState {
    kind: MediaKind,
    output_path: PathBuf,
    resolution: Option<Resolution>,
    /// Pass-through byte sink; `None` once closed
    sink: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    ended: Arc<AtomicBool>,
    ended_rx: watch::Receiver<bool>,
    counters: PipelineCounters,
    resolution_drift: AtomicBool,
}

impl PipelineState {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Queue bytes for the encoder.
    ///
    /// Returns `false` and logs a warning when the sink is already closed,
    /// which happens when a payload races a concurrent teardown.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        let guard = self.sink.lock();
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Dropping {} bytes pushed after close of {}",
                bytes.len(),
                self.output_path.display()
            );
            return false;
        };

        let len = bytes.len() as u64;
        if sender.send(bytes).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Encoder input for {} is gone, dropping {} bytes",
                self.output_path.display(),
                len
            );
            return false;
        }

        self.counters.chunks.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(len, Ordering::Relaxed);
        true
    }

    /// Signal end of stream to the encoder.
    ///
    /// Returns `true` only for the call that actually closed a still running
    /// pipeline. `ended` flips later, when the encoder reports completion.
    pub fn close(&self) -> bool {
        let Some(sender) = self.sink.lock().take() else {
            return false;
        };
        drop(sender);

        if self.is_ended() {
            tracing::debug!("Pipeline {} already ended", self.output_path.display());
            return false;
        }

        tracing::info!("Closing encoder input for {}", self.output_path.display());
        true
    }

    /// Record the geometry of an incoming frame.
    ///
    /// The output is fixed at creation, so frames of another size are still
    /// written through. Returns `true` the first time a different size is seen.
    pub fn note_resolution(&self, resolution: Resolution) -> bool {
        match self.resolution {
            Some(expected) if expected != resolution => {
                !self.resolution_drift.swap(true, Ordering::Relaxed)
            }
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sink.lock().is_none()
    }

    /// Whether the encoder process has reported completion
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Wait until the encoder process has exited
    pub async fn wait_ended(&self) {
        let mut ended = self.ended_rx.clone();
        let _ = ended.wait_for(|ended| *ended).await;
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            output_path: self.output_path.to_string_lossy().to_string(),
            resolution: self.resolution.map(|r| r.to_string()),
            pushed_chunks: self.counters.chunks.load(Ordering::Relaxed),
            pushed_bytes: self.counters.bytes.load(Ordering::Relaxed),
            dropped_chunks: self.counters.dropped.load(Ordering::Relaxed),
            closed: self.is_closed(),
            ended: self.is_ended(),
        }
    }
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("kind", &self.kind)
            .field("output_path", &self.output_path)
            .field("resolution", &self.resolution)
            .field("closed", &self.is_closed())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Starts pipelines under a recordings root
#[derive(Clone)]
pub struct PipelineWriter {
    launcher: Arc<dyn EncoderLauncher>,
    root: PathBuf,
    ids: Arc<SessionIdGenerator>,
}

impl PipelineWriter {
    pub fn new(launcher: Arc<dyn EncoderLauncher>, root: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            root: root.into(),
            ids: Arc::new(SessionIdGenerator::new()),
        }
    }

    /// Describe a fresh job for a participant's track; every call gets a new id
    pub fn job_for(
        &self,
        kind: MediaKind,
        participant: &ParticipantId,
        resolution: Option<Resolution>,
    ) -> EncoderJob {
        EncoderJob::for_track(&self.root, kind, participant, resolution, self.ids.next_id())
    }

    /// Launch the encoder for `job` and wire a byte sink into it
    pub fn start(&self, job: EncoderJob) -> RecorderResult<Arc<PipelineState>> {
        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let EncoderProcess { input, exit } = self.launcher.launch(&job)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = watch::channel(false);
        let ended = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump(receiver, input, job.output_path.clone()));

        let ended_flag = ended.clone();
        let path = job.output_path.clone();
        tokio::spawn(async move {
            match exit.await {
                Ok(()) => tracing::info!("Stop recording >> {}", path.display()),
                Err(e) => tracing::error!("Encoder for {} failed: {}", path.display(), e),
            }
            ended_flag.store(true, Ordering::SeqCst);
            let _ = ended_tx.send(true);
        });

        tracing::info!("Start recording >> {}", job.output_path.display());

        Ok(Arc::new(PipelineState {
            kind: job.kind,
            output_path: job.output_path,
            resolution: job.input_resolution,
            sink: Mutex::new(Some(sender)),
            ended,
            ended_rx,
            counters: PipelineCounters::default(),
            resolution_drift: AtomicBool::new(false),
        }))
    }
}

/// Drain the byte sink into the encoder input, then close the input
async fn pump(
    mut receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    mut input: Box<dyn AsyncWrite + Send + Unpin>,
    path: PathBuf,
) {
    while let Some(chunk) = receiver.recv().await {
        if let Err(e) = input.write_all(&chunk).await {
            tracing::warn!("Failed to write to encoder for {}: {}", path.display(), e);
            return;
        }
    }

    if let Err(e) = input.shutdown().await {
        tracing::debug!("Encoder input for {} did not shut down cleanly: {}", path.display(), e);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory encoder used in place of ffmpeg

    use super::*;
    use crate::utils::error::RecorderError;
    use tokio::io::AsyncReadExt;
    use tokio::sync::Notify;

    /// One launched fake encoder
    #[derive(Clone)]
    pub struct FakeRun {
        pub job: EncoderJob,
        pub received: Arc<Mutex<Vec<u8>>>,
        pub saw_eof: Arc<AtomicBool>,
    }

    /// Launcher that reads the encoder input into memory
    #[derive(Default)]
    pub struct FakeLauncher {
        attempts: AtomicU64,
        runs: Mutex<Vec<FakeRun>>,
        failing: Mutex<Vec<MediaKind>>,
        crashing: Mutex<Vec<MediaKind>>,
        exit_gate: Option<Arc<Notify>>,
    }

    impl FakeLauncher {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Encoders stay alive after end of stream until the gate is notified
        pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                exit_gate: Some(gate),
                ..Self::default()
            })
        }

        pub fn fail_kind(&self, kind: MediaKind) {
            self.failing.lock().push(kind);
        }

        /// Encoders of `kind` start, then exit with an error without reading
        pub fn crash_kind(&self, kind: MediaKind) {
            self.crashing.lock().push(kind);
        }

        /// Launches requested, including failed ones
        pub fn attempts(&self) -> u64 {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn runs(&self) -> Vec<FakeRun> {
            self.runs.lock().clone()
        }

        pub fn runs_for(&self, kind: MediaKind) -> Vec<FakeRun> {
            self.runs
                .lock()
                .iter()
                .filter(|run| run.job.kind == kind)
                .cloned()
                .collect()
        }
    }

    impl EncoderLauncher for FakeLauncher {
        fn launch(&self, job: &EncoderJob) -> RecorderResult<EncoderProcess> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().contains(&job.kind) {
                return Err(RecorderError::Encoder(format!(
                    "Failed to start FFmpeg encoder for {}",
                    job.kind
                )));
            }

            let (client, mut server) = tokio::io::duplex(64 * 1024);
            let run = FakeRun {
                job: job.clone(),
                received: Arc::new(Mutex::new(Vec::new())),
                saw_eof: Arc::new(AtomicBool::new(false)),
            };
            self.runs.lock().push(run.clone());

            if self.crashing.lock().contains(&job.kind) {
                let exit = Box::pin(async move {
                    drop(server);
                    Err::<(), RecorderError>(RecorderError::Encoder(
                        "FFmpeg exited with 1: crashed".to_string(),
                    ))
                });
                return Ok(EncoderProcess {
                    input: Box::new(client),
                    exit,
                });
            }

            let gate = self.exit_gate.clone();
            let exit = Box::pin(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = server.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    run.received.lock().extend_from_slice(&buf[..n]);
                }
                run.saw_eof.store(true, Ordering::SeqCst);
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok::<(), RecorderError>(())
            });

            Ok(EncoderProcess {
                input: Box::new(client),
                exit,
            })
        }
    }
}
