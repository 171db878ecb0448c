//! Loopback - WebRTC Negotiation im selben Prozess
//!
//! Verbindet einen aufgenommenen Media-Stream mit zwei Peer Connections
//! ("local" und "remote") im selben Prozess:
//! - Stream-Quellen: Kamera + Mikrofon, MJPEG über HTTP, synthetisch
//! - ICE Candidates werden direkt im Speicher weitergereicht
//! - Ein einziger Offer/Answer Austausch, kein Signaling-Server
//! - Der zurückgeschleifte Stream landet in einem Playback-Sink

pub mod config;
pub mod media;
pub mod negotiator;
pub mod peer;
pub mod testing;

use anyhow::Context;
use config::{FailureReporting, LoopbackConfig};
use media::{MediaSource, MjpegSource, SyntheticSource};
use negotiator::{ConsoleNotifier, LogSink, LoopbackNegotiator, NegotiatorEvent};
use peer::RtcPeerFactory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{prelude::*, reload, EnvFilter, Registry};

// ============================================================================
// LOGGING
// ============================================================================

/// Handle zum Austauschen des Log-Filters nach dem Laden der Konfiguration
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Setzt den Filter aus der Konfiguration. Ein gesetztes `RUST_LOG` bleibt aktiv.
    pub fn apply(&self, filter: &str) -> anyhow::Result<()> {
        if self.from_env {
            return Ok(());
        }
        self.reload
            .reload(env_filter(filter))
            .context("Failed to apply log filter")
    }
}

fn env_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER))
}

/// Initialisiert das Logging. `RUST_LOG` hat Vorrang vor `filter`.
///
/// Gibt `None` zurück, wenn bereits ein globaler Subscriber gesetzt ist.
pub fn init_logging(filter: &str) -> Option<LogHandle> {
    let (env_filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, true),
        Err(_) => (env_filter(filter), false),
    };
    let (layer, reload) = reload::Layer::new(env_filter);

    tracing_subscriber::registry()
        .with(layer)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .ok()?;

    Some(LogHandle { reload, from_env })
}

// ============================================================================
// RUN
// ============================================================================

/// Welche Quelle die Session speist
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    Synthetic,
    Mjpeg,
    Device,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: SourceKind,
    pub url: Option<String>,
    pub video: bool,
    pub audio: bool,
    pub stun: Vec<String>,
    pub config: Option<PathBuf>,
    pub log_only: bool,
    /// `None` hält bis Ctrl-C
    pub hold: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            url: None,
            video: true,
            audio: false,
            stun: Vec::new(),
            config: None,
            log_only: false,
            hold: Some(Duration::from_secs(10)),
        }
    }
}

/// Wendet die Kommandozeile auf die geladene Konfiguration an
pub fn resolve_config(opts: &RunOptions) -> anyhow::Result<LoopbackConfig> {
    let mut config =
        LoopbackConfig::load(opts.config.as_deref()).context("Failed to load configuration")?;

    config = config.with_stun_servers(opts.stun.clone());
    if opts.log_only {
        config.failure_reporting = FailureReporting::LogOnly;
    }
    config.validate().context("Invalid ICE server configuration")?;

    Ok(config)
}

fn build_source(opts: &RunOptions) -> anyhow::Result<Box<dyn MediaSource>> {
    match opts.source {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(opts.video, opts.audio))),
        SourceKind::Mjpeg => {
            let url = opts
                .url
                .as_deref()
                .context("--url is required for the mjpeg source")?;
            Ok(Box::new(MjpegSource::parse(url)?))
        }
        #[cfg(feature = "device-capture")]
        SourceKind::Device => Ok(Box::new(media::DeviceSource::new())),
        #[cfg(not(feature = "device-capture"))]
        SourceKind::Device => {
            anyhow::bail!("Device capture is not available (built without `device-capture`)")
        }
    }
}

/// Startet eine Session, gibt den Report aus und hält sie bis Timeout oder Ctrl-C
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    // Logging vor dem Laden der Konfiguration, damit deren Meldungen sichtbar sind
    let logging = init_logging(config::DEFAULT_LOG_FILTER);
    let config = resolve_config(&opts)?;
    if let Some(logging) = &logging {
        logging.apply(&config.log_filter)?;
    }
    tracing::info!(
        "Using {} ICE server(s), failure reporting {:?}",
        config.ice_servers.len(),
        config.failure_reporting
    );

    let source = build_source(&opts)?;
    let negotiator = LoopbackNegotiator::new(
        config,
        Arc::new(RtcPeerFactory::new()),
        Arc::new(LogSink::new()),
        Arc::new(ConsoleNotifier),
    );

    let mut events = negotiator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                NegotiatorEvent::StateChanged(state) => tracing::debug!("State: {:?}", state),
                NegotiatorEvent::TrackAttached { stream_id, kinds } => {
                    tracing::info!("Loopback stream {} playing ({:?})", stream_id, kinds)
                }
                NegotiatorEvent::Error(message) => tracing::debug!("Error event: {}", message),
            }
        }
    });

    let session = negotiator
        .start(source.as_ref())
        .await
        .context("Loopback negotiation failed")?;

    let report = session.report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    match opts.hold {
        Some(hold) => {
            tracing::info!("Holding session for {:?} (Ctrl-C to stop)", hold);
            tokio::select! {
                _ = tokio::time::sleep(hold) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            }
        }
        None => {
            tracing::info!("Holding session until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        }
    }

    let (to_remote, to_local) = session.relay_stats();
    tracing::info!(
        "Relayed candidates: local->remote {} ({} failed), remote->local {} ({} failed)",
        to_remote.forwarded,
        to_remote.failed,
        to_local.forwarded,
        to_local.failed
    );

    negotiator.stop().await?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_logging_ready_before_config_filter() {
        // Einziger Test, der den globalen Subscriber setzt
        let handle = init_logging(config::DEFAULT_LOG_FILTER).unwrap();

        handle.apply("loopback_lib=debug").unwrap();
        // Ungültiger Filter fällt auf den Standard zurück
        handle.apply("loopback_lib=[").unwrap();

        assert!(init_logging("loopback_lib=trace").is_none());
    }

    #[test]
    fn test_resolve_config_applies_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "log_filter": "loopback_lib=debug" }}"#).unwrap();

        let opts = RunOptions {
            config: Some(file.path().to_path_buf()),
            stun: vec!["stun:127.0.0.1:3478".into()],
            log_only: true,
            ..Default::default()
        };
        let config = resolve_config(&opts).unwrap();

        assert_eq!(config.log_filter, "loopback_lib=debug");
        assert_eq!(config.failure_reporting, FailureReporting::LogOnly);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:127.0.0.1:3478"]);
    }

    #[test]
    fn test_resolve_config_rejects_bad_stun_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let opts = RunOptions {
            config: Some(path),
            stun: vec!["http://example.com".into()],
            ..Default::default()
        };

        assert!(resolve_config(&opts).is_err());
    }
}
