#![forbid(unsafe_code)]

//! Runs the upload pipeline once: takes the first video package from the
//! Drive inbox, publishes it on YouTube and moves it to the archive folder.
//!
//! Exits 0 when there is nothing to do. Any configuration, transfer, format,
//! upload or archive failure ends the run with a non-zero status and the
//! storage folders as they were at that point.

use anyhow::{Context, Result, anyhow, bail};
use autoupload_tools::config::{
    REFRESH_TOKEN_KEY, RuntimeOverrides, Settings, resolve_settings, upsert_env_value,
};
use autoupload_tools::credentials::ServiceAccountTokenProvider;
use autoupload_tools::drive::DriveClient;
use autoupload_tools::logging;
use autoupload_tools::oauth::{OAuthTokenProvider, YOUTUBE_UPLOAD_SCOPE};
use autoupload_tools::pipeline::{Pipeline, PipelineConfig, RunOutcome};
use autoupload_tools::progress::{ConsoleProgress, ProgressFanout, ProgressWriter};
use autoupload_tools::youtube::{UploadOptions, YouTubeClient};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
struct UploadArgs {
    overrides: RuntimeOverrides,
    progress_file: Option<PathBuf>,
}

impl UploadArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = || -> Result<String> {
                match inline.clone() {
                    Some(value) => Ok(value),
                    None => args
                        .next()
                        .ok_or_else(|| anyhow!("{flag} requires a value")),
                }
            };

            match flag.as_str() {
                "--env-file" => parsed.overrides.env_path = Some(PathBuf::from(value()?)),
                "--work-dir" => parsed.overrides.work_dir = Some(PathBuf::from(value()?)),
                "--root-folder" => parsed.overrides.root_folder = Some(value()?),
                "--incoming-folder" => parsed.overrides.incoming_folder = Some(value()?),
                "--archive-folder" => parsed.overrides.archive_folder = Some(value()?),
                "--client-secret" => {
                    parsed.overrides.client_secret_path = Some(PathBuf::from(value()?))
                }
                "--progress-file" => parsed.progress_file = Some(PathBuf::from(value()?)),
                "-h" | "--help" => bail!(
                    "Usage: autoupload [--env-file <path>] [--work-dir <path>] [--root-folder <name>] [--incoming-folder <name>] [--archive-folder <name>] [--client-secret <path>] [--progress-file <path>]"
                ),
                _ => bail!("unknown argument: {arg}"),
            }
        }

        Ok(parsed)
    }
}

fn build_youtube(settings: &Settings) -> (YouTubeClient, Arc<OAuthTokenProvider>) {
    if settings.refresh_token.is_none() {
        warn!("no YOUTUBE_REFRESH_TOKEN set; the upload step will ask for authorization");
    }
    let tokens = Arc::new(OAuthTokenProvider::from_client_secrets_file(
        &settings.client_secret_path,
        YOUTUBE_UPLOAD_SCOPE,
        settings.refresh_token.clone(),
        true,
    ));
    let client = YouTubeClient::new(
        tokens.clone(),
        UploadOptions {
            category_id: settings.category_id.clone(),
            privacy_status: settings.privacy_status.clone(),
            ..UploadOptions::default()
        },
    );
    (client, tokens)
}

/// Keeps a refresh token granted at the prompt so the next run is unattended.
fn store_new_refresh_token(settings: &Settings, tokens: &OAuthTokenProvider) {
    let Some(token) = tokens.new_refresh_token() else {
        return;
    };
    match upsert_env_value(&settings.env_path, REFRESH_TOKEN_KEY, &token) {
        Ok(()) => info!(path = %settings.env_path.display(), "stored {REFRESH_TOKEN_KEY}"),
        Err(err) => warn!(error = %err, "could not store {REFRESH_TOKEN_KEY}"),
    }
}

fn main() -> Result<()> {
    let args = UploadArgs::parse()?;
    let settings = resolve_settings(args.overrides.clone()).context("loading settings")?;
    logging::init(&settings.log_filter);

    let drive_tokens = ServiceAccountTokenProvider::from_json(settings.require_drive_credentials()?)?;
    info!(client_email = drive_tokens.client_email(), "using service account");
    let drive = DriveClient::new(Arc::new(drive_tokens));
    let (youtube, youtube_tokens) = build_youtube(&settings);

    let mut observer = ProgressFanout::new().with(ConsoleProgress::new());
    if let Some(path) = args.progress_file.clone() {
        observer = observer.with(ProgressWriter::new(path));
    }

    let result = Pipeline::new(&drive, &youtube, PipelineConfig::from(&settings)).run(&mut observer);
    store_new_refresh_token(&settings, &youtube_tokens);
    let outcome = result.context("upload run failed")?;

    println!("{}", outcome.message());
    if let RunOutcome::Uploaded { video_id, .. } = &outcome {
        info!(%video_id, "run complete");
    }
    Ok(())
}
