use anyhow::Context;
use clap::Parser;
use livekit_recorder::encoder::FfmpegLauncher;
use livekit_recorder::room::livekit::LiveKitConnector;
use livekit_recorder::{server, BotConfig, RecordingBot};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Record every participant of a LiveKit room")]
struct Args {
    /// JSON configuration file; flags and environment override it
    #[arg(long, env = "RECORDER_CONFIG")]
    config: Option<PathBuf>,

    /// LiveKit server WebSocket URL
    #[arg(long, env = "LIVEKIT_URL")]
    livekit_url: Option<String>,

    #[arg(long, env = "LIVEKIT_API_KEY")]
    api_key: Option<String>,

    #[arg(long, env = "LIVEKIT_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Directory receiving `videos/` and `audios/`
    #[arg(long, env = "RECORDINGS_DIR")]
    recordings_dir: Option<PathBuf>,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg_path: Option<String>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<BotConfig> {
        let mut config = match &self.config {
            Some(path) => BotConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => BotConfig::default(),
        };

        if let Some(url) = &self.livekit_url {
            config.livekit_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if let Some(secret) = &self.api_secret {
            config.api_secret = secret.clone();
        }
        if let Some(dir) = &self.recordings_dir {
            config.recordings_dir = dir.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg_path {
            config.encoder.ffmpeg_path = ffmpeg.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    livekit_recorder::init_tracing();
    tracing::info!("Starting LiveKit Recorder v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = args.load_config()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    std::fs::create_dir_all(&config.recordings_dir).with_context(|| {
        format!(
            "failed to create recordings directory {}",
            config.recordings_dir.display()
        )
    })?;

    let launcher = Arc::new(FfmpegLauncher::new(config.encoder.clone()));
    let bot = Arc::new(RecordingBot::new(
        config,
        Arc::new(LiveKitConnector),
        launcher,
    ));

    server::serve(bot.clone(), addr, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
    })
    .await
    .context("http server failed")?;

    bot.stop_all().await;
    Ok(())
}
