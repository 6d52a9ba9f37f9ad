use super::*;

use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn defaults_apply_without_file_or_env() {
    let settings = load_settings_from(None, env_from(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
}

#[test]
fn file_values_override_defaults_and_env_overrides_file() {
    let file = r#"
        bind_addr = "0.0.0.0:9000"
        database_url = "sqlite://./file.db"
        page_size = 25
    "#;
    let settings = load_settings_from(
        Some(file),
        env_from(&[("APP__DATABASE_URL", "sqlite://./env.db")]),
    );
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.database_url, "sqlite://./env.db");
    assert_eq!(settings.page_size, 25);
}

#[test]
fn prefixed_env_wins_over_plain_env() {
    let settings = load_settings_from(
        None,
        env_from(&[("SERVER_BIND", "127.0.0.1:1"), ("APP__BIND_ADDR", "127.0.0.1:2")]),
    );
    assert_eq!(settings.server_bind, "127.0.0.1:2");
}

#[test]
fn invalid_numbers_are_ignored_and_page_size_is_clamped() {
    let settings = load_settings_from(
        None,
        env_from(&[("APP__PAGE_SIZE", "lots"), ("APP__MAX_PAGE_SIZE", "5")]),
    );
    assert_eq!(settings.max_page_size, 5);
    assert_eq!(settings.page_size, 5);

    let settings = load_settings_from(None, env_from(&[("APP__PAGE_SIZE", "0")]));
    assert_eq!(settings.page_size, 1);
}

#[test]
fn unreadable_file_falls_back_to_defaults() {
    let settings = load_settings_from(Some("page_size = \"ten\""), env_from(&[]));
    assert_eq!(settings, Settings::default());
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}

#[test]
fn creates_parent_dir_for_sqlite_url() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.path().join("data").exists());
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}
