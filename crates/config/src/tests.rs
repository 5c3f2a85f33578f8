use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_are_valid() {
    let cfg = MergeConfig::default();
    assert_eq!(cfg.max_file_inputs, 100);
    assert!(cfg.delete_intermediate_files);
    assert_eq!(cfg.compression, CompressionKind::None);
    cfg.validate().unwrap();
}

#[test]
fn fan_in_below_two_is_rejected() {
    let cfg = MergeConfig::default().with_max_file_inputs(1);
    assert_eq!(cfg.validate(), Err(ConfigError::MaxFileInputsTooSmall(1)));
    let cfg = MergeConfig::default().with_max_file_inputs(2);
    assert!(cfg.validate().is_ok());
}

#[test]
fn trigger_level_must_be_a_fraction() {
    let mut cfg = MergeConfig::default();
    cfg.memory_storage_trigger_level = 1.5;
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::TriggerLevelOutOfRange(_))
    ));
}

#[test]
fn empty_lookup_gives_defaults() {
    let cfg = MergeConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, MergeConfig::default());
}

#[test]
fn lookup_overrides_every_field() {
    let cfg = MergeConfig::from_lookup(lookup_from(&[
        ("MERGE_LOCAL_DIR", "/data/spill"),
        ("MERGE_TASK_ATTEMPT_ID", "stage3_task7_attempt1"),
        ("MERGE_MAX_FILE_INPUTS", "16"),
        ("MERGE_MEMORY_TRIGGER", "0.25"),
        ("MERGE_READ_BUFFER_KB", "8"),
        ("MERGE_WRITE_BUFFER_KB", "128"),
        ("MERGE_DELETE_INTERMEDIATE", "false"),
        ("MERGE_MEMORY_IN_FINAL", "false"),
        ("MERGE_COMPRESSION", "LZ4"),
        ("MERGE_VERIFY_CHECKSUMS", "false"),
    ]))
    .unwrap();

    assert_eq!(cfg.local_dir, PathBuf::from("/data/spill"));
    assert_eq!(cfg.task_attempt_id, "stage3_task7_attempt1");
    assert_eq!(cfg.max_file_inputs, 16);
    assert_eq!(cfg.memory_storage_trigger_level, 0.25);
    assert_eq!(cfg.read_buffer_bytes, 8 * 1024);
    assert_eq!(cfg.write_buffer_bytes, 128 * 1024);
    assert!(!cfg.delete_intermediate_files);
    assert!(!cfg.memory_inputs_in_final_pass);
    assert_eq!(cfg.compression, CompressionKind::Lz4);
    assert!(!cfg.verify_checksums);
}

#[test]
fn malformed_values_are_errors_not_defaults() {
    let err = MergeConfig::from_lookup(lookup_from(&[("MERGE_MAX_FILE_INPUTS", "lots")]))
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::InvalidValue {
            key: "MERGE_MAX_FILE_INPUTS".to_string(),
            value: "lots".to_string()
        }
    );

    let err = MergeConfig::from_lookup(lookup_from(&[("MERGE_COMPRESSION", "snappy")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn lookup_result_is_validated() {
    let err = MergeConfig::from_lookup(lookup_from(&[("MERGE_MAX_FILE_INPUTS", "1")]))
        .unwrap_err();
    assert_eq!(err, ConfigError::MaxFileInputsTooSmall(1));
}

#[test]
fn compression_kind_display_round_trips() {
    for kind in [CompressionKind::None, CompressionKind::Lz4] {
        assert_eq!(kind.to_string().parse::<CompressionKind>().unwrap(), kind);
    }
}
