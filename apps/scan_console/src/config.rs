use std::{fs, io, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::Mode;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub directory_url: String,
    pub default_mode: Option<Mode>,
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory_url: "http://127.0.0.1:8000/api".into(),
            default_mode: None,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    directory_url: Option<String>,
    default_mode: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// Defaults, then the optional TOML file at `config_path`, then environment.
pub fn load_settings(config_path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(config_path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw).with_context(|| {
                format!("failed to parse config file '{}'", config_path.display())
            })?;
            apply_file(&mut settings, file_cfg)?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read config file '{}'", config_path.display())
            })
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) -> anyhow::Result<()> {
    if let Some(v) = file_cfg.directory_url {
        settings.directory_url = normalize_directory_url(&v)?;
    }
    if let Some(v) = file_cfg.default_mode {
        settings.default_mode = Some(parse_mode(&v)?);
    }
    if let Some(v) = file_cfg.connect_timeout_secs {
        settings.connect_timeout_secs = v;
    }
    Ok(())
}

pub(crate) fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("DIRECTORY_URL") {
        settings.directory_url = normalize_directory_url(&v)?;
    }
    if let Some(v) = lookup("APP__DIRECTORY_URL") {
        settings.directory_url = normalize_directory_url(&v)?;
    }

    if let Some(v) = lookup("APP__DEFAULT_MODE") {
        settings.default_mode = Some(parse_mode(&v)?);
    }

    if let Some(v) = lookup("APP__CONNECT_TIMEOUT_SECS") {
        settings.connect_timeout_secs = v
            .trim()
            .parse()
            .with_context(|| format!("invalid APP__CONNECT_TIMEOUT_SECS '{v}'"))?;
    }

    Ok(())
}

fn parse_mode(raw: &str) -> anyhow::Result<Mode> {
    raw.parse::<Mode>()
        .with_context(|| format!("invalid default mode '{raw}'"))
}

/// Accepts only absolute http(s) URLs; trailing slashes are dropped.
pub fn normalize_directory_url(raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    let parsed =
        Url::parse(raw).with_context(|| format!("invalid directory url '{raw}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!(
            "directory url '{raw}' must use http or https, not '{}'",
            parsed.scheme()
        );
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
