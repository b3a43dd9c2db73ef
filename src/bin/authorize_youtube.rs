#![forbid(unsafe_code)]

//! One-time interactive authorization for the YouTube upload scope.
//!
//! Prints the consent URL, reads the code back from the terminal and stores
//! the resulting refresh token as `YOUTUBE_REFRESH_TOKEN` in the env file, so
//! `autoupload` can run unattended afterwards.

use anyhow::{Context, Result, anyhow, bail};
use autoupload_tools::config::{REFRESH_TOKEN_KEY, RuntimeOverrides, resolve_settings, upsert_env_value};
use autoupload_tools::logging;
use autoupload_tools::oauth::{InstalledAppFlow, YOUTUBE_UPLOAD_SCOPE};
use std::env;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
struct AuthorizeArgs {
    env_path: Option<PathBuf>,
    client_secret_path: Option<PathBuf>,
}

impl AuthorizeArgs {
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
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.env_path = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--client-secret=") {
                parsed.client_secret_path = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    parsed.env_path = Some(PathBuf::from(value));
                }
                "--client-secret" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--client-secret requires a value"))?;
                    parsed.client_secret_path = Some(PathBuf::from(value));
                }
                _ => bail!("unknown argument: {arg}"),
            }
        }

        Ok(parsed)
    }
}

fn main() -> Result<()> {
    let args = AuthorizeArgs::parse()?;
    let settings = resolve_settings(RuntimeOverrides {
        env_path: args.env_path,
        client_secret_path: args.client_secret_path,
        ..RuntimeOverrides::default()
    })
    .context("loading settings")?;
    logging::init(&settings.log_filter);

    let flow =
        InstalledAppFlow::from_client_secrets_file(&settings.client_secret_path, YOUTUBE_UPLOAD_SCOPE)?;
    let stdin = io::stdin();
    let granted = flow.run_console(&mut stdin.lock(), &mut io::stdout())?;
    println!();

    let Some(refresh_token) = granted.refresh_token else {
        bail!(
            "Google did not return a refresh token; revoke the app's access at https://myaccount.google.com/permissions and try again"
        );
    };
    upsert_env_value(&settings.env_path, REFRESH_TOKEN_KEY, &refresh_token)
        .with_context(|| format!("writing {}", settings.env_path.display()))?;
    println!(
        "Stored {REFRESH_TOKEN_KEY} in {}. autoupload can now run unattended.",
        settings.env_path.display()
    );
    Ok(())
}
