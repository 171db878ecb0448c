use clap::Parser;
use loopback_lib::{RunOptions, SourceKind};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "loopback")]
#[command(version)]
#[command(about = "Negotiates a WebRTC loopback between two peer connections in one process", long_about = None)]
struct Cli {
    /// Stream source
    #[arg(short, long, value_enum, default_value_t = SourceKind::Synthetic)]
    source: SourceKind,

    /// MJPEG URL (e.g. http://192.168.4.1:81/stream)
    #[arg(long, env = "LOOPBACK_MJPEG_URL")]
    url: Option<String>,

    /// Add a synthetic audio track
    #[arg(long)]
    audio: bool,

    /// Omit the synthetic video track
    #[arg(long)]
    no_video: bool,

    /// STUN server URL, replaces the configured ICE servers (repeatable)
    #[arg(long = "stun")]
    stun: Vec<String>,

    /// Path to config.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log negotiation failures without alerting
    #[arg(long)]
    log_only: bool,

    /// Seconds to hold the session open, 0 waits for Ctrl-C
    #[arg(long, default_value_t = 10)]
    hold: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let opts = RunOptions {
        source: cli.source,
        url: cli.url,
        video: !cli.no_video,
        audio: cli.audio,
        stun: cli.stun,
        config: cli.config,
        log_only: cli.log_only,
        hold: (cli.hold > 0).then(|| Duration::from_secs(cli.hold)),
    };

    loopback_lib::run(opts).await
}
