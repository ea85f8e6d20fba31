// Copy-versus-encode decisions carried through a full session

use ffseg::config::SegmentConfig;
use ffseg::engine::{
    AckGate, CopyThresholds, Rational, SegmentScheduler, StreamCopyDecider, StreamMode,
    SyntheticEngine,
};
use tempfile::TempDir;

use crate::common::fixtures::*;
use crate::common::segments;

#[test]
fn test_baseline_source_is_remuxed_end_to_end() {
    let dir = TempDir::new().unwrap();
    let session = prepare(
        baseline_720p(30.0, Rational::new(1, 1)),
        main_31_caps(),
        options("3mbps", dir.path().join("clip")),
    )
    .unwrap();

    assert_eq!(session.streams[0].mode, StreamMode::Copy);
    assert_eq!(session.streams[1].mode, StreamMode::Copy);

    let mut engine = SyntheticEngine::new(session.probe.clone());
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    assert_eq!(stats.packets_encoded, 0);
    assert_eq!(stats.segments_emitted(), 3);

    let records = segments::all_records(&segments::finalized(dir.path()));
    assert!(!records.is_empty());
    assert!(
        records.iter().all(|r| r.payload.starts_with("src:")),
        "every packet should be a remuxed source packet"
    );
    // 24 fps for 30 seconds
    assert_eq!(records.iter().filter(|r| r.stream == 0).count(), 720);
}

#[test]
fn test_anamorphic_source_is_reencoded() {
    let dir = TempDir::new().unwrap();
    let session = prepare(
        baseline_720p(30.0, Rational::new(4, 3)),
        main_31_caps(),
        options("3mbps", dir.path().join("clip")),
    )
    .unwrap();

    assert_eq!(session.streams[0].mode, StreamMode::Encode);
    assert_eq!(
        session.streams[0].copy_rejected.as_deref(),
        Some("sample aspect ratio 1.333")
    );
    // The audio decision does not depend on the picture
    assert_eq!(session.streams[1].mode, StreamMode::Copy);

    let mut engine = SyntheticEngine::new(session.probe.clone());
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    let records = segments::all_records(&segments::finalized(dir.path()));
    let video: Vec<_> = records.iter().filter(|r| r.stream == 0).collect();
    assert_eq!(video.len(), 720);
    assert!(video.iter().all(|r| r.payload.starts_with("enc:")));
    assert_eq!(stats.packets_encoded, 720);
}

#[test]
fn test_anamorphic_client_accepts_non_square_pixels() {
    let session = prepare(
        baseline_720p(30.0, Rational::new(4, 3)),
        caps(&["main", "31", "720", "aac=0", "0", "1", "0"]),
        options("3mbps", "clip".into()),
    )
    .unwrap();
    assert_eq!(session.streams[0].mode, StreamMode::Copy);
}

#[test]
fn test_surround_ac3_copied_at_source_bitrate() {
    let probe = hd_movie(600.0);
    let session = prepare(probe.clone(), hd_caps(), options("4mbps", "movie".into())).unwrap();

    let audio = session.output_for_source(1).unwrap();
    assert_eq!(audio.mode(), StreamMode::Copy);
    assert_eq!(audio.gain, 1.0);

    let target = session.target.audio.as_ref().unwrap();
    assert_eq!(target.bitrate_kbps, 448);
    assert_eq!(target.channels, 6);

    // Same answer straight from the decider
    let thresholds = CopyThresholds::default();
    let decider = StreamCopyDecider::new(&thresholds);
    let mut gain = 1.0;
    assert!(decider.decide_audio_copy(&hd_caps(), &probe, &probe.streams[1], 160_000, &mut gain));
}

#[test]
fn test_ac3_without_ceiling_entry_is_encoded() {
    let session = prepare(
        hd_movie(600.0),
        caps(&["high", "41", "1080", "aac=0", "0", "0", "0"]),
        options("4mbps", "movie".into()),
    )
    .unwrap();

    let audio = session.output_for_source(1).unwrap();
    assert_eq!(audio.mode(), StreamMode::Encode);
    let target = session.target.audio.as_ref().unwrap();
    assert_eq!(target.codec_name, "aac");
    assert_eq!(target.channels, 2);
}

#[test]
fn test_live_transport_never_copies() {
    let mut probe = baseline_720p(0.0, Rational::new(1, 1));
    probe.location = "rtsp://camera.local/stream".to_string();

    let thresholds = CopyThresholds::default();
    let decider = StreamCopyDecider::new(&thresholds);
    let mut gain = 1.0;
    assert!(!decider.decide_audio_copy(
        &main_31_caps(),
        &probe,
        &probe.streams[1],
        128_000,
        &mut gain
    ));

    // Video copy does not look at the transport
    let session = prepare(probe, main_31_caps(), options("3mbps", "cam".into())).unwrap();
    assert_eq!(session.streams[0].mode, StreamMode::Copy);
    assert_eq!(session.streams[1].mode, StreamMode::Encode);
}

#[test]
fn test_copy_disabled_by_client() {
    let session = prepare(
        baseline_720p(30.0, Rational::new(1, 1)),
        caps(&["main", "31", "720", "aac=0", "0", "0", "0", "0", "0"]),
        options("3mbps", "clip".into()),
    )
    .unwrap();
    assert_eq!(session.streams[0].mode, StreamMode::Encode);
    assert_eq!(session.streams[1].mode, StreamMode::Encode);
    assert_eq!(session.streams[0].copy_rejected.as_deref(), Some("copy disabled by client"));
}
