use super::*;

use std::{
    collections::HashMap,
    env,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

struct TempConfig {
    dir: PathBuf,
    path: PathBuf,
}

impl TempConfig {
    fn new(contents: &str) -> Self {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = env::temp_dir().join(format!("scan_console_config_test_{suffix}"));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("scanner.toml");
        fs::write(&path, contents).expect("write config");
        Self { dir, path }
    }
}

impl Drop for TempConfig {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn missing_config_file_keeps_defaults() {
    let mut settings = Settings::default();
    apply_env(&mut settings, |_| None).expect("no env");
    assert_eq!(settings, Settings::default());

    let path = env::temp_dir().join("scan_console_definitely_missing.toml");
    let loaded = load_settings(&path).expect("load");
    assert_eq!(loaded.connect_timeout_secs, Settings::default().connect_timeout_secs);
}

#[test]
fn config_file_values_are_applied() {
    let config = TempConfig::new(
        r#"
directory_url = "https://eventos.example.org/api/"
default_mode = "entrega"
connect_timeout_secs = 3
"#,
    );

    let raw = fs::read_to_string(&config.path).expect("read");
    let mut settings = Settings::default();
    apply_file(&mut settings, toml::from_str(&raw).expect("parse")).expect("apply");

    assert_eq!(settings.directory_url, "https://eventos.example.org/api");
    assert_eq!(settings.default_mode, Some(Mode::Entrega));
    assert_eq!(settings.connect_timeout_secs, 3);

    let dir = config.dir.clone();
    drop(config);
    assert!(!dir.exists(), "temporary config dir is removed");
}

#[test]
fn prefixed_env_overrides_plain_env() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("DIRECTORY_URL", "http://plain.local"),
        ("APP__DIRECTORY_URL", "http://prefixed.local/api"),
        ("APP__DEFAULT_MODE", "ENTRADA"),
        ("APP__CONNECT_TIMEOUT_SECS", " 25 "),
    ]);
    let mut settings = Settings::default();
    apply_env(&mut settings, |key| env.get(key).map(|v| v.to_string())).expect("apply");

    assert_eq!(settings.directory_url, "http://prefixed.local/api");
    assert_eq!(settings.default_mode, Some(Mode::Entrada));
    assert_eq!(settings.connect_timeout_secs, 25);
}

#[test]
fn deprecated_mode_in_config_is_refused() {
    let mut settings = Settings::default();
    let err = apply_env(&mut settings, |key| {
        (key == "APP__DEFAULT_MODE").then(|| "sorteo".to_string())
    })
    .expect_err("sorteo is not supported");
    assert!(format!("{err:#}").contains("deprecated"));
}

#[test]
fn malformed_config_file_is_an_error() {
    let config = TempConfig::new("directory_url = [");
    assert!(load_settings(&config.path).is_err());
}

#[test]
fn directory_url_must_be_http() {
    assert_eq!(
        normalize_directory_url(" http://127.0.0.1:8000/ ").expect("valid"),
        "http://127.0.0.1:8000"
    );
    assert!(normalize_directory_url("ftp://files.example.org").is_err());
    assert!(normalize_directory_url("not a url").is_err());
}
