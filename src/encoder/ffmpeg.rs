//! FFmpeg encoder process
//!
//! Raw frames or samples are written to ffmpeg's stdin; ffmpeg owns the
//! container and codec. The [`EncoderLauncher`] trait is the seam the
//! pipeline writer uses, so tests can substitute an in-memory process.

use crate::encoder::types::{EncoderJob, EncoderSettings};
use crate::media::MediaKind;
use crate::utils::error::{RecorderError, RecorderResult};
use futures_util::future::BoxFuture;
use std::process::Stdio;
use tokio::io::AsyncWrite;
use tokio::process::Command;

/// Lines of ffmpeg stderr kept when reporting a failed run
const STDERR_TAIL_LINES: usize = 20;

/// A running encoder: its raw input and a future resolving on exit
pub struct EncoderProcess {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub exit: BoxFuture<'static, RecorderResult<()>>,
}

/// Starts external encoding processes
pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, job: &EncoderJob) -> RecorderResult<EncoderProcess>;
}

/// Launches `ffmpeg` reading raw media from stdin
#[derive(Debug, Clone, Default)]
pub struct FfmpegLauncher {
    settings: EncoderSettings,
}

impl FfmpegLauncher {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, job: &EncoderJob) -> RecorderResult<EncoderProcess> {
        let args = build_args(&self.settings, job)?;

        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::Encoder(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Encoder("Failed to capture FFmpeg stdin".to_string()))?;

        let exit = Box::pin(async move {
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| RecorderError::Encoder(format!("Failed to wait for FFmpeg: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(RecorderError::Encoder(format!(
                    "FFmpeg exited with {}: {}",
                    output.status,
                    stderr_tail(&stderr)
                )));
            }
            Ok::<(), RecorderError>(())
        });

        Ok(EncoderProcess {
            input: Box::new(stdin),
            exit,
        })
    }
}

/// Build the ffmpeg command line for a job
pub fn build_args(settings: &EncoderSettings, job: &EncoderJob) -> RecorderResult<Vec<String>> {
    let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];

    match job.kind {
        MediaKind::Video => {
            let resolution = job.input_resolution.ok_or_else(|| {
                RecorderError::Encoder("Video job without input resolution".to_string())
            })?;
            let output = settings.video_output_size;
            args.extend([
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-s".to_string(),
                resolution.to_string(),
                "-r".to_string(),
                settings.video_frame_rate.to_string(),
                "-i".to_string(),
                "-".to_string(),
                "-vf".to_string(),
                format!("scale={}:{}", output.width, output.height),
                "-c:v".to_string(),
                settings.video_codec.clone(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
            ]);
        }
        MediaKind::Audio => {
            args.extend([
                "-f".to_string(),
                "s16le".to_string(),
                "-ar".to_string(),
                settings.audio_sample_rate.to_string(),
                "-ac".to_string(),
                settings.audio_channels.to_string(),
                "-i".to_string(),
                "-".to_string(),
                "-c:a".to_string(),
                settings.audio_codec.clone(),
            ]);
        }
    }

    args.push(job.output_path.to_string_lossy().to_string());
    Ok(args)
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
