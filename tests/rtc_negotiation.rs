//! Negotiation mit echten webrtc-rs Peer Connections (ohne STUN)

use loopback_lib::config::{FailureReporting, LoopbackConfig};
use loopback_lib::media::{MediaStream, MediaTrack, SyntheticSource, TrackKind};
use loopback_lib::negotiator::{negotiate, LoopbackNegotiator, Notifier, PlaybackSink};
use loopback_lib::peer::{
    PeerConnection, PeerRole, RtcPeer, RtcPeerFactory, SdpType, SignalingState,
};
use loopback_lib::testing::{RecordingNotifier, RecordingSink};
use std::sync::Arc;
use std::time::{Duration, Instant};
use webrtc::peer_connection::signaling_state::RTCSignalingState;

fn offline_config() -> LoopbackConfig {
    LoopbackConfig {
        ice_servers: Vec::new(),
        failure_reporting: FailureReporting::Alert,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_rtc_peers_reach_stable() {
    let local = RtcPeer::new(PeerRole::Local, &[]).await.unwrap();
    let remote = RtcPeer::new(PeerRole::Remote, &[]).await.unwrap();

    let mut stream = MediaStream::new();
    stream.add_track(MediaTrack::new(TrackKind::Video, "video"));
    local.add_track(&stream.tracks()[0], &stream).await.unwrap();

    negotiate(&local, &remote).await.unwrap();

    assert_eq!(local.signaling_state(), SignalingState::Stable);
    assert_eq!(remote.signaling_state(), SignalingState::Stable);
    assert_eq!(local.stack_signaling_state(), RTCSignalingState::Stable);
    assert_eq!(remote.stack_signaling_state(), RTCSignalingState::Stable);

    let offer = remote.remote_description().await.unwrap();
    assert_eq!(offer.kind, SdpType::Offer);
    assert!(offer.sdp.contains("m=video"));
    assert!(offer.sdp.contains(&stream.id));

    local.close().await.unwrap();
    remote.close().await.unwrap();
}

#[tokio::test]
async fn test_rtc_answer_before_offer_is_rejected() {
    let remote = RtcPeer::new(PeerRole::Remote, &[]).await.unwrap();

    assert!(remote.create_answer().await.is_err());
    assert_eq!(remote.signaling_state(), SignalingState::New);

    remote.close().await.unwrap();
}

#[tokio::test]
async fn test_rtc_negotiator_session() {
    let sink = Arc::new(RecordingSink::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let negotiator = LoopbackNegotiator::new(
        offline_config(),
        Arc::new(RtcPeerFactory::new()),
        Arc::clone(&sink) as Arc<dyn PlaybackSink>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );

    let session = negotiator
        .start(&SyntheticSource::new(true, true))
        .await
        .unwrap();

    let report = session.report().await;
    assert_eq!(report.local.signaling_state, SignalingState::Stable);
    assert_eq!(report.remote.signaling_state, SignalingState::Stable);
    assert_eq!(report.local.local_description, Some(SdpType::Offer));
    assert_eq!(report.local.remote_description, Some(SdpType::Answer));
    assert_eq!(report.remote.local_description, Some(SdpType::Answer));
    assert_eq!(report.remote.remote_description, Some(SdpType::Offer));
    assert_eq!(report.local.outbound_tracks, 2);
    assert_eq!(report.remote.outbound_tracks, 0);
    assert!(notifier.messages().is_empty());

    negotiator.stop().await.unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
#[ignore = "needs working host ICE candidates on this machine"]
async fn test_rtc_video_loops_back_to_sink() {
    let sink = Arc::new(RecordingSink::default());
    let negotiator = LoopbackNegotiator::new(
        offline_config(),
        Arc::new(RtcPeerFactory::new()),
        Arc::clone(&sink) as Arc<dyn PlaybackSink>,
        Arc::new(RecordingNotifier::default()),
    );

    let session = negotiator.start(&SyntheticSource::video_only()).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(15);
    while sink.last().is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let attached = sink.last().expect("no stream reached the sink");
    assert_eq!(attached.tracks().len(), 1);
    assert_eq!(attached.tracks()[0].kind, TrackKind::Video);
    assert_eq!(attached.tracks()[0].id, session.stream().tracks()[0].id);

    negotiator.stop().await.unwrap();
}
