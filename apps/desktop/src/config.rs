use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "orcafacil.toml";
const DATA_DIR_NAME: &str = ".orcafacil";

const BACKEND_URL_VARS: &[&str] = &[
    "VITE_SUPABASE_URL",
    "SUPABASE_URL",
    "ORCAFACIL_BACKEND_URL",
];
const ANON_KEY_VARS: &[&str] = &[
    "VITE_SUPABASE_ANON_KEY",
    "SUPABASE_ANON_KEY",
    "ORCAFACIL_ANON_KEY",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub anon_key: String,
    pub data_dir: PathBuf,
    pub cache_max_age_hours: Option<u64>,
    pub profile_retry_delay_ms: u64,
    pub oauth_redirect_url: String,
    pub log_filter: String,
}

impl Settings {
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.db")
    }

    pub fn cache_max_age(&self) -> Option<chrono::Duration> {
        self.cache_max_age_hours
            .and_then(|hours| i64::try_from(hours).ok())
            .map(chrono::Duration::hours)
    }

    pub fn profile_retry_delay(&self) -> Duration {
        Duration::from_millis(self.profile_retry_delay_ms)
    }
}

/// Values given on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    backend_url: Option<String>,
    anon_key: Option<String>,
    data_dir: Option<PathBuf>,
    cache_max_age_hours: Option<u64>,
    profile_retry_delay_ms: Option<u64>,
    oauth_redirect_url: Option<String>,
    log_filter: Option<String>,
}

/// Reads `config_path`, or `orcafacil.toml` in the working directory when it exists.
pub fn load_settings(config_path: Option<&Path>, cli: &CliOverrides) -> Result<Settings> {
    let raw = match config_path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).ok(),
    };
    load_settings_from(raw.as_deref(), |name| std::env::var(name).ok(), cli)
}

pub fn load_settings_from(
    raw_file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    cli: &CliOverrides,
) -> Result<Settings> {
    let file = match raw_file {
        Some(raw) => toml::from_str::<FileSettings>(raw).context("invalid config file")?,
        None => FileSettings::default(),
    };
    let env_value = |name: &str| non_blank(env(name));
    let first_env = |names: &[&str]| names.iter().rev().find_map(|&name| env_value(name));

    let mut backend_url = "http://127.0.0.1:54321".to_string();
    let mut anon_key = String::new();
    let mut data_dir = None;
    let mut cache_max_age_hours = None;
    let mut profile_retry_delay_ms = 750;
    let mut oauth_redirect_url = "http://localhost:3000/".to_string();
    let mut log_filter = "info".to_string();

    if let Some(v) = non_blank(file.backend_url) {
        backend_url = v;
    }
    if let Some(v) = non_blank(file.anon_key) {
        anon_key = v;
    }
    if let Some(v) = file.data_dir.filter(|dir| !dir.as_os_str().is_empty()) {
        data_dir = Some(v);
    }
    if let Some(v) = file.cache_max_age_hours {
        cache_max_age_hours = Some(v);
    }
    if let Some(v) = file.profile_retry_delay_ms {
        profile_retry_delay_ms = v;
    }
    if let Some(v) = non_blank(file.oauth_redirect_url) {
        oauth_redirect_url = v;
    }
    if let Some(v) = non_blank(file.log_filter) {
        log_filter = v;
    }

    if let Some(v) = first_env(BACKEND_URL_VARS) {
        backend_url = v;
    }
    if let Some(v) = first_env(ANON_KEY_VARS) {
        anon_key = v;
    }
    if let Some(v) = env_value("ORCAFACIL_DATA_DIR") {
        data_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = env_value("ORCAFACIL_CACHE_MAX_AGE_HOURS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            cache_max_age_hours = Some(parsed);
        }
    }
    if let Some(v) = env_value("ORCAFACIL_PROFILE_RETRY_DELAY_MS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            profile_retry_delay_ms = parsed;
        }
    }
    if let Some(v) = env_value("ORCAFACIL_OAUTH_REDIRECT_URL") {
        oauth_redirect_url = v;
    }
    if let Some(v) = env_value("RUST_LOG") {
        log_filter = v;
    }

    if let Some(v) = non_blank(cli.backend_url.clone()) {
        backend_url = v;
    }
    if let Some(v) = non_blank(cli.anon_key.clone()) {
        anon_key = v;
    }
    if let Some(v) = cli.data_dir.clone().filter(|dir| !dir.as_os_str().is_empty()) {
        data_dir = Some(v);
    }
    if let Some(v) = non_blank(cli.log_filter.clone()) {
        log_filter = v;
    }

    let data_dir = match data_dir {
        Some(dir) => dir,
        None => resolve_default_data_dir(&env)?,
    };

    Ok(Settings {
        backend_url,
        anon_key,
        data_dir,
        cache_max_age_hours,
        profile_retry_delay_ms,
        oauth_redirect_url,
        log_filter,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_default_data_dir(env: &impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    let mut checked = vec!["HOME"];
    if let Some(home) = non_blank(env("HOME")) {
        return Ok(PathBuf::from(home).join(DATA_DIR_NAME));
    }

    if cfg!(target_os = "windows") {
        checked.push("USERPROFILE");
        if let Some(profile) = non_blank(env("USERPROFILE")) {
            return Ok(PathBuf::from(profile).join(DATA_DIR_NAME));
        }
    }

    bail!(
        "no per-user directory available (checked {}); set ORCAFACIL_DATA_DIR or pass --data-dir",
        checked.join(", ")
    )
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
