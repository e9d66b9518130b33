use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "qblur.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub backend_url: String,
    pub bearer_token: Option<String>,
    pub user_id: Option<String>,
    pub display_name: String,
    pub email: String,
    pub download_dir: PathBuf,
    pub job_timeout_seconds: u64,
    pub template_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080".into(),
            bearer_token: None,
            user_id: None,
            display_name: String::new(),
            email: String::new(),
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            job_timeout_seconds: 300,
            template_prefix: "templates".into(),
        }
    }
}

impl Settings {
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_seconds > 0).then(|| Duration::from_secs(self.job_timeout_seconds))
    }

    fn apply(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "backend_url" => self.backend_url = value,
            "bearer_token" => self.bearer_token = Some(value).filter(|v| !v.is_empty()),
            "user_id" => self.user_id = Some(value).filter(|v| !v.is_empty()),
            "display_name" => self.display_name = value,
            "email" => self.email = value,
            "download_dir" => self.download_dir = PathBuf::from(value),
            "job_timeout_seconds" => {
                self.job_timeout_seconds = value
                    .trim()
                    .parse()
                    .with_context(|| format!("job_timeout_seconds must be a number, got '{value}'"))?
            }
            "template_prefix" => self.template_prefix = value,
            _ => {}
        }
        Ok(())
    }
}

const KEYS: [&str; 8] = [
    "backend_url",
    "bearer_token",
    "user_id",
    "display_name",
    "email",
    "download_dir",
    "job_timeout_seconds",
    "template_prefix",
];

pub fn load_settings(path: &Path) -> Result<Settings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Defaults, then the toml file if present, then `QBLUR_*` and finally
/// `APP__*` environment variables.
pub fn load_settings_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: HashMap<String, toml::Value> = toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            for (key, value) in file_cfg {
                let value = match value {
                    toml::Value::String(text) => text,
                    toml::Value::Integer(number) => number.to_string(),
                    other => bail!("unsupported value for '{key}' in {}: {other}", path.display()),
                };
                settings.apply(&key, value)?;
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(value) = env(&format!("QBLUR_{upper}")) {
            settings.apply(key, value)?;
        }
        if let Some(value) = env(&format!("APP__{upper}")) {
            settings.apply(key, value)?;
        }
    }

    Ok(settings)
}
