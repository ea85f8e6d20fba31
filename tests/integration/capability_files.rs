// Capability profiles from positional arguments and documents

use ffseg::engine::{AudioCodec, BitrateCeiling, CapabilityProfile, H264Profile, TranscodeError};
use std::fs;
use tempfile::TempDir;

use crate::common::fixtures::caps;

#[test]
fn test_positional_and_toml_profiles_agree() {
    let positional = caps(&["main", "3.1", "720", "aac=0,ac3=448000", "0", "1", "0"]);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("client.toml");
    fs::write(
        &path,
        r#"
[video]
profile = "main"
level = 31
max_resolution_height = 720
plays_anamorphic = true

[audio.ceilings]
aac = 0
ac3 = 448000
"#,
    )
    .unwrap();

    let loaded = CapabilityProfile::load(&path).unwrap();
    assert_eq!(loaded, positional);
    assert_eq!(loaded.video.profile, H264Profile::Main);
    assert_eq!(
        loaded.audio.ceilings.ceiling(&AudioCodec::Ac3),
        BitrateCeiling::Max(448_000)
    );
    assert_eq!(
        loaded.audio.ceilings.ceiling(&AudioCodec::Dts),
        BitrateCeiling::Unsupported
    );
}

#[test]
fn test_json_profile() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("client.json");
    fs::write(
        &path,
        r#"{
            "auto_cpu_quality": true,
            "video": { "profile": "high", "level": 41, "allow_video_copy": false },
            "audio": { "fallback_codec": "mp3", "ceilings": { "mp3": 320000 } }
        }"#,
    )
    .unwrap();

    let loaded = CapabilityProfile::load(&path).unwrap();
    assert!(loaded.auto_cpu_quality);
    assert!(!loaded.video.allow_video_copy);
    assert!(loaded.audio.allow_audio_copy);
    assert_eq!(loaded.video.max_resolution_height, 0);
    assert_eq!(loaded.audio.fallback_codec, "mp3");
    assert_eq!(
        loaded.audio.ceilings.ceiling(&AudioCodec::Aac),
        BitrateCeiling::Unsupported
    );
}

#[test]
fn test_malformed_inputs_are_configuration_errors() {
    let cases: [&[&str]; 4] = [
        &["high", "41", "1080"],
        &["ultra", "41", "1080", "aac=0", "0", "0", "0"],
        &["high", "41", "1080", "aac=fast", "0", "0", "0"],
        &["high", "41", "1080", "aac=0", "0", "maybe", "0"],
    ];
    for fields in cases {
        let err = CapabilityProfile::parse_positional(fields).unwrap_err();
        assert!(
            matches!(err, TranscodeError::MalformedCapability { .. }),
            "{:?} gave {:?}",
            fields,
            err
        );
        assert!(err.is_configuration());
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "video = 3").unwrap();
    assert!(CapabilityProfile::load(&path).unwrap_err().is_configuration());

    let missing = CapabilityProfile::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(missing, TranscodeError::Io { .. }));
}
