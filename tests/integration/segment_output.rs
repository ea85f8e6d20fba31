// Segment rotation, naming, draining and failure handling

use ffseg::config::SegmentConfig;
use ffseg::engine::{
    AckGate, SchedulerState, SegmentScheduler, SessionOptions, StreamMode, SyntheticEngine,
    TranscodeError,
};
use std::path::Path;
use tempfile::TempDir;

use crate::common::fixtures::*;
use crate::common::segments;

const SEGMENT_TICKS: i64 = 10 * 90_000;

fn hd_session(dir: &Path, duration_secs: f64, options: SessionOptions) -> ffseg::engine::Session {
    prepare(
        hd_movie(duration_secs),
        hd_caps(),
        SessionOptions {
            output_base: dir.join("media"),
            ..options
        },
    )
    .unwrap()
}

#[test]
fn test_ten_minute_source_yields_sixty_segments() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 600.0, options("8mbps", "".into()));
    assert_eq!(session.streams[0].mode, StreamMode::Copy);
    assert_eq!(session.streams[2].mode, StreamMode::Suppressed);

    let mut engine = SyntheticEngine::new(session.probe.clone());
    let mut scheduler =
        SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled());
    let stats = scheduler.run(&mut engine).unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Finished);

    let files = segments::finalized(dir.path());
    let names = segments::file_names(&files);
    assert_eq!(names.len(), 60);
    assert_eq!(names[0], "media-00000.ts");
    assert_eq!(names[59], "media-00059.ts");
    assert!(!dir.path().join("media-tmp.ts").exists());

    assert_eq!(stats.segments, files);
    assert_eq!(stats.first_segment, Some(0));
    assert_eq!(stats.last_segment, Some(59));
    assert_eq!(stats.packets_filled, 0);
    assert!((stats.output_secs - 600.0).abs() < 1e-6);
    // Subtitle packets never reach an output
    assert!(stats.packets_dropped > 0);

    for (index, path) in files.iter().enumerate() {
        let records = segments::records(path);
        let start = index as i64 * SEGMENT_TICKS;
        assert!(
            records
                .iter()
                .all(|r| r.pts >= start && r.pts < start + SEGMENT_TICKS),
            "{} spans past its segment",
            path.display()
        );
        let first_video = records.iter().find(|r| r.stream == 0).unwrap();
        assert!(first_video.keyframe, "{} starts mid-GOP", path.display());
        assert!(records.iter().all(|r| r.stream < 2));
    }
}

#[test]
fn test_initial_segment_offsets_file_names() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(
        dir.path(),
        25.0,
        SessionOptions {
            initial_segment: 7,
            ..options("8mbps", "".into())
        },
    );

    let mut engine = SyntheticEngine::new(session.probe.clone());
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    assert_eq!(
        segments::file_names(&segments::finalized(dir.path())),
        vec!["media-00007.ts", "media-00008.ts", "media-00009.ts"]
    );
    assert_eq!(stats.first_segment, Some(7));

    // Timestamps restart from zero regardless of the first index
    let first = segments::records(&dir.path().join("media-00007.ts"));
    assert_eq!(first[0].pts, 0);
}

#[test]
fn test_source_timestamps_are_rebased() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 20.0, options("8mbps", "".into()));

    let mut engine = SyntheticEngine::new(session.probe.clone()).with_start_offset(1.4);
    SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    let files = segments::finalized(dir.path());
    assert_eq!(files.len(), 2);
    let records = segments::all_records(&files);
    assert_eq!(records.iter().map(|r| r.pts).min(), Some(0));
    assert!(records.iter().all(|r| r.pts < 20 * 90_000));
}

#[test]
fn test_encoded_video_forces_keyframes_and_drains() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(
        dir.path(),
        30.0,
        SessionOptions {
            burn_subtitles: true,
            ..options("8mbps", "".into())
        },
    );
    assert_eq!(session.streams[0].mode, StreamMode::Encode);

    // Source GOPs of 3 s never line up with the 10 s boundaries
    let mut engine = SyntheticEngine::new(session.probe.clone()).with_keyframe_interval(3.0);
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    let files = segments::finalized(dir.path());
    assert_eq!(files.len(), 3);

    let mut video_packets = 0;
    for (index, path) in files.iter().enumerate() {
        let video: Vec<_> = segments::records(path)
            .into_iter()
            .filter(|r| r.stream == 0)
            .collect();
        assert!(video.iter().all(|r| r.payload.starts_with("enc:")));
        assert_eq!(video[0].pts, index as i64 * SEGMENT_TICKS);
        assert!(video[0].keyframe);
        // One forced keyframe per segment
        assert_eq!(video.iter().filter(|r| r.keyframe).count(), 1);
        video_packets += video.len();
    }

    // The frame held back by the encoder was flushed into the last segment
    assert_eq!(video_packets, 750);
    assert_eq!(stats.packets_encoded, 750);
}

#[test]
fn test_short_source_is_padded_to_declared_duration() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 30.0, options("8mbps", "".into()));

    let mut engine = SyntheticEngine::new(session.probe.clone()).with_real_duration(25.0);
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    let files = segments::finalized(dir.path());
    assert_eq!(files.len(), 3);
    assert!(stats.packets_filled > 0);
    assert_eq!(stats.real_output_secs.round(), 25.0);
    assert!((stats.output_secs - 30.0).abs() < 1e-6);

    let last = segments::records(&files[2]);
    let fillers: Vec<_> = last.iter().filter(|r| r.is_filler()).collect();
    assert!(!fillers.is_empty());
    assert!(fillers.iter().all(|r| r.pts >= 25 * 90_000 - 1920));
    let end = last.iter().map(|r| r.pts + r.duration).max().unwrap();
    assert!(end >= 30 * 90_000);
}

#[test]
fn test_duration_limit_stops_reading_the_source() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(
        dir.path(),
        600.0,
        SessionOptions {
            duration_limit: Some(20.0),
            ..options("8mbps", "".into())
        },
    );
    assert_eq!(session.output_duration_secs(), 20.0);

    let mut engine = SyntheticEngine::new(session.probe.clone());
    let mut scheduler =
        SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled());
    let stats = scheduler.run(&mut engine).unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Finished);

    let names = segments::file_names(&segments::finalized(dir.path()));
    assert_eq!(names, vec!["media-00000.ts", "media-00001.ts"]);
    assert_eq!(stats.packets_filled, 0);
    // The remaining 580 s of the source are never demuxed
    assert!(
        stats.packets_dropped < 1000,
        "dropped {} packets",
        stats.packets_dropped
    );
    assert!(stats.output_secs >= 20.0 && stats.output_secs < 20.1);
}

#[test]
fn test_duration_limit_with_encoded_video_drains_once() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(
        dir.path(),
        600.0,
        SessionOptions {
            burn_subtitles: true,
            duration_limit: Some(20.0),
            ..options("8mbps", "".into())
        },
    );
    assert_eq!(session.streams[0].mode, StreamMode::Encode);

    let mut engine = SyntheticEngine::new(session.probe.clone());
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    let records = segments::all_records(&segments::finalized(dir.path()));
    let video: Vec<_> = records.iter().filter(|r| r.stream == 0).collect();
    assert_eq!(video.len(), 500);
    assert!(video.iter().all(|r| r.pts < 20 * 90_000));
    assert!(stats.packets_dropped < 1000);
}

#[test]
fn test_source_running_dry_is_reported_distinctly() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 600.0, options("8mbps", "".into()));

    let mut engine = SyntheticEngine::new(session.probe.clone()).with_real_duration(0.5);
    let mut scheduler =
        SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled());
    let err = scheduler.run(&mut engine).unwrap_err();

    assert!(err.is_data_insufficient(), "unexpected error: {}", err);
    assert!(!err.is_fatal());
    assert_eq!(scheduler.state(), SchedulerState::Failed);
    assert!(segments::finalized(dir.path()).is_empty());
}

#[test]
fn test_unknown_duration_stops_at_end_of_input() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 0.0, options("8mbps", "".into()));
    assert_eq!(session.output_duration_secs(), 0.0);

    let mut engine = SyntheticEngine::new(session.probe.clone()).with_real_duration(15.0);
    let stats = SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    assert_eq!(stats.segments_emitted(), 2);
    assert_eq!(stats.packets_filled, 0);
}

#[test]
fn test_mux_failure_leaves_temp_file_for_inspection() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 60.0, options("8mbps", "".into()));

    let mut engine = SyntheticEngine::new(session.probe.clone()).with_fail_write_at(1000);
    let mut scheduler =
        SegmentScheduler::new(&session, &SegmentConfig::default(), AckGate::disabled());
    let err = scheduler.run(&mut engine).unwrap_err();

    match &err {
        TranscodeError::MuxWrite { segment, pts, .. } => {
            // About 14 seconds in: 25 video + ~47 audio packets per second
            assert_eq!(*segment, 1);
            assert!(pts.is_some());
        }
        other => panic!("expected a mux error, got {:?}", other),
    }
    assert!(err.is_fatal());
    assert_eq!(scheduler.state(), SchedulerState::Failed);
    assert!(dir.path().join("media-tmp.ts").exists());
    assert_eq!(
        segments::file_names(&segments::finalized(dir.path())),
        vec!["media-00000.ts"]
    );
}

#[test]
fn test_shorter_segments_from_config() {
    let dir = TempDir::new().unwrap();
    let session = hd_session(dir.path(), 12.0, options("8mbps", "".into()));
    let config = SegmentConfig {
        segment_seconds: 4.0,
        extension: "m2ts".to_string(),
        ..SegmentConfig::default()
    };

    let mut engine = SyntheticEngine::new(session.probe.clone());
    SegmentScheduler::new(&session, &config, AckGate::disabled())
        .run(&mut engine)
        .unwrap();

    assert_eq!(
        segments::file_names(&segments::finalized(dir.path())),
        vec!["media-00000.m2ts", "media-00001.m2ts", "media-00002.m2ts"]
    );
}
