use std::io::Write;

use serial_test::serial;
use time::macros::datetime;

use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert_eq!(settings.cache, CacheConfig::default());
    assert!(settings.regions.is_empty());
}

#[test]
fn json_logging_selects_format() {
    let mut raw = RawSettings::default();
    raw.logging.json = Some(true);
    raw.logging.level = Some("debug".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid level");
    assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
}

#[test]
fn zero_lock_timeout_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.lock_timeout_ms = 0;

    let err = Settings::from_raw(raw).expect_err("zero timeout");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.lock_timeout_ms",
            ..
        }
    ));
}

#[test]
fn region_fields_are_converted() {
    let mut raw = RawSettings::default();
    raw.regions.insert(
        "short".to_string(),
        RawRegionSettings {
            parent: Some("base".to_string()),
            store: Some(" memory ".to_string()),
            namespace: Some("short".to_string()),
            maxage_seconds: Some(30),
            expiry_unix: Some(1),
            timeout_ms: Some(250),
            id_field: Some("id".to_string()),
            ..RawRegionSettings::default()
        },
    );

    let settings = Settings::from_raw(raw).expect("valid settings");
    let region = &settings.regions["short"];
    assert_eq!(region.parent.as_deref(), Some("base"));
    assert_eq!(region.store.as_deref(), Some("memory"));
    assert_eq!(region.namespace, Some(Some("short".to_string())));
    assert_eq!(region.maxage, Some(Duration::from_secs(30)));
    assert_eq!(region.expiry, Some(datetime!(1970-01-01 0:00:01 UTC)));
    assert_eq!(region.timeout, Some(Duration::from_millis(250)));
    assert_eq!(region.id_field.as_deref(), Some("id"));

    let options = region.call_options();
    assert_eq!(options.effective_namespace(), Some("short"));
    assert!(options.store.is_none());
}

#[test]
fn no_namespace_clears_inherited_namespace() {
    let mut raw = RawSettings::default();
    raw.regions.insert(
        "bare".to_string(),
        RawRegionSettings {
            no_namespace: Some(true),
            ..RawRegionSettings::default()
        },
    );

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.regions["bare"].namespace, Some(None));
}

#[test]
fn conflicting_namespace_settings_are_rejected() {
    let mut raw = RawSettings::default();
    raw.regions.insert(
        "both".to_string(),
        RawRegionSettings {
            namespace: Some("ns".to_string()),
            no_namespace: Some(true),
            ..RawRegionSettings::default()
        },
    );

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "regions.*.namespace",
            ..
        })
    ));
}

#[test]
fn default_region_cannot_have_parent() {
    let mut raw = RawSettings::default();
    raw.regions.insert(
        "default".to_string(),
        RawRegionSettings {
            parent: Some("other".to_string()),
            ..RawRegionSettings::default()
        },
    );

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "regions.default.parent",
            ..
        })
    ));
}

#[test]
fn zero_maxage_is_rejected() {
    let mut raw = RawSettings::default();
    raw.regions.insert(
        "instant".to_string(),
        RawRegionSettings {
            maxage_seconds: Some(0),
            ..RawRegionSettings::default()
        },
    );

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
#[serial]
fn load_reads_explicit_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(
        file,
        r#"
[logging]
level = "warn"

[cache]
lock_timeout_ms = 1500

[regions.default]
namespace = "app"

[regions.short]
maxage_seconds = 5
store = "memory"
"#
    )
    .expect("write settings");

    let settings = load(Some(file.path())).expect("settings load");
    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.lock_timeout(), Duration::from_millis(1500));
    assert_eq!(
        settings.regions["default"].namespace,
        Some(Some("app".to_string()))
    );
    assert_eq!(
        settings.regions["short"].maxage,
        Some(Duration::from_secs(5))
    );
}

#[test]
#[serial]
fn load_requires_explicit_file_to_exist() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    assert!(matches!(load(Some(&missing)), Err(LoadError::Build(_))));
}

#[test]
#[serial]
fn environment_overrides_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(file, "[cache]\nlock_timeout_ms = 1500").expect("write settings");

    // SAFETY: serialised with every other test that reads the environment.
    unsafe { std::env::set_var("MEMORA__CACHE__LOCK_TIMEOUT_MS", "250") };
    let settings = load(Some(file.path()));
    unsafe { std::env::remove_var("MEMORA__CACHE__LOCK_TIMEOUT_MS") };

    let settings = settings.expect("settings load");
    assert_eq!(settings.cache.lock_timeout_ms, 250);
}
