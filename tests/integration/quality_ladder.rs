// Quality ladder resolution against realistic sources

use ffseg::config::Config;
use ffseg::engine::{LadderConfig, ParameterTable, Rational, Rung, TranscodeError};
use insta::assert_snapshot;

use crate::common::fixtures::*;

#[test]
fn test_label_and_index_resolve_identically() {
    let table = ParameterTable::default();
    let probe = hd_movie(600.0);
    let caps = hd_caps();

    let by_index = table.resolve_named("9", &probe, &caps, 1.0).unwrap();
    let by_label = table.resolve_named("8mbps", &probe, &caps, 1.0).unwrap();
    assert_eq!(by_index, by_label);
    assert_eq!(by_index.quality_index, 9);
}

#[test]
fn test_unknown_quality_is_configuration_error() {
    let table = ParameterTable::default();
    let err = table
        .resolve_named("8k", &hd_movie(600.0), &hd_caps(), 1.0)
        .unwrap_err();
    assert!(matches!(err, TranscodeError::UnknownQualityLevel(_)));
    assert!(err.is_configuration());
    assert!(!err.is_fatal());
}

#[test]
fn test_capability_ceiling_limits_hd_source() {
    let table = ParameterTable::default();
    let target = table
        .resolve_named("20mbps", &hd_movie(600.0), &main_31_caps(), 1.0)
        .unwrap();
    let video = target.video.unwrap();
    assert_eq!((video.width, video.height), (1280, 720));
    assert_eq!(video.frame_rate, Rational::new(25, 1));
    assert_eq!(video.gop_length, 125);
}

#[test]
fn test_audio_only_source_has_no_video_target() {
    let table = ParameterTable::default();
    let probe = source(
        "/media/song.mp3",
        240.0,
        vec![audio_stream(0, ffseg::engine::AudioCodec::Mp3, 2, 320_000)],
    );
    let target = table.resolve_named("5", &probe, &hd_caps(), 1.0).unwrap();
    assert!(target.video.is_none());
    let audio = target.audio.unwrap();
    assert_eq!(audio.codec_name, "aac");
    assert_eq!(audio.bitrate_kbps, 128);
}

#[test]
fn test_custom_ladder_from_config() {
    let mut config = Config::default();
    config.ladder = LadderConfig {
        rungs: vec![Rung {
            label: "only".to_string(),
            max_width: 854,
            max_height: 480,
            video_kbps: 1200,
            crf: 23.0,
            motion_estimation: ffseg::engine::MotionEstimation::Hex,
            ref_frames: 3,
            quality_compression: 6,
            max_fps: 30.0,
            audio_kbps: 128,
        }],
        ..LadderConfig::default()
    };

    let table = ParameterTable::new(config.ladder.clone());
    assert_eq!(table.rungs().len(), 1);
    assert!(table.parse_quality("1").is_err());

    let target = table
        .resolve_named("only", &hd_movie(600.0), &hd_caps(), 1.0)
        .unwrap();
    let video = target.video.unwrap();
    // Width is rounded down to stay even
    assert_eq!((video.width, video.height), (852, 480));
}

#[test]
fn test_encoder_args_open_ended_on_slow_cpu() {
    let table = ParameterTable::default();
    let target = table
        .resolve_named("20mbps_max", &hd_movie(600.0), &main_31_caps(), 2.0)
        .unwrap();

    assert_snapshot!(
        target.encoder_args().join(" "),
        @"-c:v libx264 -s 1280x720 -r 25/1 -crf 34.0 -minrate 10000k -me_method umh -refs 2 -subq 7 -g 125 -c:a aac -profile:a aac_low -b:a 448k -ar 48000 -ac 2"
    );
}
