#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CREDENTIALS_VAR: &str = "GDRIVE_JSON";
/// Names the variable holding the service-account JSON, when not `GDRIVE_JSON`.
pub const CREDENTIALS_VAR_KEY: &str = "AUTOUPLOAD_CREDENTIALS_VAR";
pub const DEFAULT_ROOT_FOLDER: &str = "AutoUploadYT";
pub const DEFAULT_INCOMING_FOLDER: &str = "videos";
pub const DEFAULT_ARCHIVE_FOLDER: &str = "done";
pub const DEFAULT_CLIENT_SECRET: &str = "client_secret.json";
pub const DEFAULT_CATEGORY_ID: &str = "10";
pub const DEFAULT_PRIVACY_STATUS: &str = "public";
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const REFRESH_TOKEN_KEY: &str = "YOUTUBE_REFRESH_TOKEN";

const PRIVACY_STATUSES: [&str; 3] = ["public", "unlisted", "private"];

/// Everything a run needs that is not a secret fetched at auth time.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Raw service-account JSON, as found in `drive_credentials_var`.
    pub drive_credentials: Option<String>,
    pub drive_credentials_var: String,
    pub root_folder: String,
    pub incoming_folder: String,
    pub archive_folder: String,
    pub work_dir: PathBuf,
    pub client_secret_path: PathBuf,
    pub refresh_token: Option<String>,
    pub category_id: String,
    pub privacy_status: String,
    pub set_thumbnail: bool,
    pub log_filter: String,
    pub env_path: PathBuf,
}

impl Settings {
    /// Returns the service-account blob or explains which variable is missing.
    pub fn require_drive_credentials(&self) -> crate::Result<&str> {
        self.drive_credentials.as_deref().ok_or_else(|| {
            crate::PipelineError::config(format!("{} secret not found", self.drive_credentials_var))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub root_folder: Option<String>,
    pub incoming_folder: Option<String>,
    pub archive_folder: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub client_secret_path: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: RuntimeOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides, env_path)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(
        file_vars,
        env_lookup,
        RuntimeOverrides::default(),
        PathBuf::from(DEFAULT_ENV_PATH),
    )
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
    env_path: PathBuf,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let root_folder = non_blank(overrides.root_folder)
        .or_else(|| lookup("AUTOUPLOAD_ROOT_FOLDER"))
        .unwrap_or_else(|| DEFAULT_ROOT_FOLDER.to_string());
    let incoming_folder = non_blank(overrides.incoming_folder)
        .or_else(|| lookup("AUTOUPLOAD_INCOMING_FOLDER"))
        .unwrap_or_else(|| DEFAULT_INCOMING_FOLDER.to_string());
    let archive_folder = non_blank(overrides.archive_folder)
        .or_else(|| lookup("AUTOUPLOAD_ARCHIVE_FOLDER"))
        .unwrap_or_else(|| DEFAULT_ARCHIVE_FOLDER.to_string());
    if incoming_folder == archive_folder {
        bail!("incoming and archive folders must differ (both are {incoming_folder:?})");
    }

    let work_dir = overrides
        .work_dir
        .or_else(|| lookup("AUTOUPLOAD_WORK_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let client_secret_path = overrides
        .client_secret_path
        .or_else(|| lookup("YOUTUBE_CLIENT_SECRET").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRET));

    let privacy_status = lookup("YOUTUBE_PRIVACY_STATUS")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_PRIVACY_STATUS.to_string());
    if !PRIVACY_STATUSES.contains(&privacy_status.as_str()) {
        bail!("YOUTUBE_PRIVACY_STATUS must be one of {PRIVACY_STATUSES:?}, got {privacy_status:?}");
    }

    let set_thumbnail = match lookup("YOUTUBE_SET_THUMBNAIL") {
        Some(value) => parse_bool(&value)
            .ok_or_else(|| anyhow!("YOUTUBE_SET_THUMBNAIL is not a boolean: {value:?}"))?,
        None => false,
    };

    let drive_credentials_var =
        lookup(CREDENTIALS_VAR_KEY).unwrap_or_else(|| DEFAULT_CREDENTIALS_VAR.to_string());

    Ok(Settings {
        drive_credentials: lookup(&drive_credentials_var),
        drive_credentials_var,
        root_folder,
        incoming_folder,
        archive_folder,
        work_dir,
        client_secret_path,
        refresh_token: lookup(REFRESH_TOKEN_KEY),
        category_id: lookup("YOUTUBE_CATEGORY_ID")
            .unwrap_or_else(|| DEFAULT_CATEGORY_ID.to_string()),
        privacy_status,
        set_thumbnail,
        log_filter: lookup("AUTOUPLOAD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        env_path,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

/// Splits `KEY=value` (optionally prefixed with `export `) into trimmed parts.
/// Comments, blank lines and lines without a key yield `None`.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then(|| (key, value.trim()))
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        return unescape_double_quoted(inner);
    }
    value
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(value)
        .to_string()
}

/// Reads a `.env` file. A missing file is the same as an empty one.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    Ok(content
        .lines()
        .filter_map(split_assignment)
        .map(|(key, value)| (key.to_string(), unquote(value)))
        .collect())
}

/// Reverses the escaping applied by [`upsert_env_value`]. Service-account
/// blobs carry quotes and `\n` sequences, so this must round-trip exactly.
fn unescape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(escaped @ ('"' | '\\')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Sets `key` in the env file, rewriting its line in place (keeping any
/// `export ` prefix) or appending it. Other lines are kept verbatim. The file
/// is replaced through a sibling temp file.
pub fn upsert_env_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("Reading {}", path.display())),
    };
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    let assignment = format!("{key}=\"{escaped}\"");

    let mut replaced = false;
    let mut lines: Vec<String> = raw
        .lines()
        .map(|line| match split_assignment(line) {
            Some((candidate, _)) if candidate == key => {
                replaced = true;
                let export = if line.trim_start().starts_with("export ") { "export " } else { "" };
                format!("{export}{assignment}")
            }
            _ => line.to_string(),
        })
        .collect();
    if !replaced {
        lines.push(assignment);
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, lines.join("\n") + "\n")
        .with_context(|| format!("Writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("Replacing {}", path.display()))?;
    Ok(())
}
