#![forbid(unsafe_code)]

//! Installed-app OAuth flow for the YouTube upload scope.
//!
//! The flow is console driven: we print a consent URL, the operator approves
//! it in a browser and pastes back either the bare authorization code or the
//! whole URL the browser was redirected to. Once a refresh token exists it is
//! used directly and no human is needed.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::credentials::{CachedToken, TokenProvider, request_token};
use crate::error::{PipelineError, Result};

pub const YOUTUBE_UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Client registration loaded from `client_secret.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Google wraps the registration in either an `installed` or `web` object.
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            PipelineError::config(format!("reading client secret {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|err| PipelineError::config(format!("{}: {err}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(raw)
            .map_err(|err| PipelineError::config(format!("client secret is malformed: {err}")))?;
        file.installed.or(file.web).ok_or_else(|| {
            PipelineError::config("client secret has neither an `installed` nor a `web` section")
        })
    }

    fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }
}

/// PKCE verifier plus the anti-forgery `state` for one consent attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    code_verifier: String,
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub struct InstalledAppFlow {
    secret: ClientSecret,
    scope: String,
}

impl InstalledAppFlow {
    pub fn new(secret: ClientSecret, scope: &str) -> Self {
        Self {
            secret,
            scope: scope.to_string(),
        }
    }

    pub fn from_client_secrets_file(path: &Path, scope: &str) -> Result<Self> {
        Ok(Self::new(ClientSecret::from_file(path)?, scope))
    }

    pub fn client_secret(&self) -> &ClientSecret {
        &self.secret
    }

    /// Builds the consent URL. `access_type=offline` plus `prompt=consent`
    /// makes Google hand out a refresh token every time.
    pub fn authorization_request(&self) -> Result<AuthorizationRequest> {
        let state = random_token(16);
        let code_verifier = random_token(48);
        let mut url = Url::parse(&self.secret.auth_uri).map_err(|err| {
            PipelineError::config(format!("client secret auth_uri is invalid: {err}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.secret.client_id)
            .append_pair("redirect_uri", self.secret.redirect_uri())
            .append_pair("scope", &self.scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge(&code_verifier))
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
        })
    }

    /// Exchanges an authorization code for tokens.
    pub fn exchange_code(&self, request: &AuthorizationRequest, code: &str) -> Result<GrantedTokens> {
        let response = request_token(
            &self.secret.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.secret.client_id),
                ("client_secret", &self.secret.client_secret),
                ("redirect_uri", self.secret.redirect_uri()),
                ("code_verifier", &request.code_verifier),
            ],
        )?;
        let refresh_token = response.refresh_token.clone();
        Ok(GrantedTokens {
            access: response.into_cached(Utc::now()),
            refresh_token,
        })
    }

    /// Runs the whole consent flow against the given console streams.
    pub fn run_console<R: BufRead, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<GrantedTokens> {
        let request = self.authorization_request()?;
        write_prompt(output, &request.url)
            .map_err(|err| PipelineError::auth(format!("writing prompt: {err}")))?;

        let mut line = String::new();
        input
            .read_line(&mut line)
            .map_err(|err| PipelineError::auth(format!("reading authorization code: {err}")))?;
        let code = parse_authorization_response(&line, &request.state)?;
        self.exchange_code(&request, &code)
    }
}

fn write_prompt<W: Write>(output: &mut W, url: &str) -> std::io::Result<()> {
    writeln!(output, "Please visit this URL to authorize this application:")?;
    writeln!(output, "{url}")?;
    write!(output, "Enter the authorization code (or the full redirect URL): ")?;
    output.flush()
}

/// Tokens produced by a completed consent or refresh.
#[derive(Debug, Clone)]
pub struct GrantedTokens {
    pub(crate) access: CachedToken,
    pub refresh_token: Option<String>,
}

impl GrantedTokens {
    pub fn access_token(&self) -> &str {
        &self.access.access_token
    }
}

/// Pulls the authorization code out of what the operator pasted.
///
/// A bare code is taken as-is. A URL must carry a `code` parameter and, when
/// it carries `state`, that state must match the one we generated.
pub fn parse_authorization_response(input: &str, expected_state: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::auth("no authorization code entered"));
    }
    if !trimmed.contains("://") {
        return Ok(trimmed.to_string());
    }

    let url = Url::parse(trimmed)
        .map_err(|err| PipelineError::auth(format!("could not parse redirect URL: {err}")))?;
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(error) = error {
        return Err(PipelineError::auth(format!("consent was refused: {error}")));
    }
    if let Some(state) = state
        && state != expected_state
    {
        return Err(PipelineError::auth("state mismatch in redirect URL"));
    }
    code.filter(|code| !code.is_empty())
        .ok_or_else(|| PipelineError::auth("redirect URL has no `code` parameter"))
}

/// Token provider for the upload scope.
///
/// Uses the stored refresh token when there is one. Without it, and only if
/// `interactive` is set, the console flow runs on stdin/stdout the first time
/// a token is needed. When built from a path, the client secret is read on
/// that first request too, so runs that never upload never touch it.
pub struct OAuthTokenProvider {
    flow: OnceLock<InstalledAppFlow>,
    secret_path: PathBuf,
    scope: String,
    interactive: bool,
    refresh_token: Mutex<Option<String>>,
    obtained_interactively: Mutex<bool>,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthTokenProvider {
    pub fn new(flow: InstalledAppFlow, refresh_token: Option<String>, interactive: bool) -> Self {
        let scope = flow.scope.clone();
        Self {
            flow: OnceLock::from(flow),
            secret_path: PathBuf::new(),
            scope,
            interactive,
            refresh_token: Mutex::new(refresh_token),
            obtained_interactively: Mutex::new(false),
            cache: Mutex::new(None),
        }
    }

    /// Defers reading `path` until the first access token is requested.
    pub fn from_client_secrets_file(
        path: impl Into<PathBuf>,
        scope: &str,
        refresh_token: Option<String>,
        interactive: bool,
    ) -> Self {
        Self {
            flow: OnceLock::new(),
            secret_path: path.into(),
            scope: scope.to_string(),
            interactive,
            refresh_token: Mutex::new(refresh_token),
            obtained_interactively: Mutex::new(false),
            cache: Mutex::new(None),
        }
    }

    /// A refresh token granted by the console flow during this process, if
    /// any. Configured tokens are not reported.
    pub fn new_refresh_token(&self) -> Option<String> {
        if *self.obtained_interactively.lock() {
            self.refresh_token.lock().clone()
        } else {
            None
        }
    }

    fn flow(&self) -> Result<&InstalledAppFlow> {
        if let Some(flow) = self.flow.get() {
            return Ok(flow);
        }
        let loaded = InstalledAppFlow::from_client_secrets_file(&self.secret_path, &self.scope)?;
        Ok(self.flow.get_or_init(|| loaded))
    }

    fn refresh(&self, refresh_token: &str) -> Result<CachedToken> {
        let secret = self.flow()?.client_secret();
        let response = request_token(
            &secret.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &secret.client_id),
                ("client_secret", &secret.client_secret),
            ],
        )?;
        Ok(response.into_cached(Utc::now()))
    }

    fn authorize_interactively(&self) -> Result<CachedToken> {
        if !self.interactive {
            return Err(PipelineError::auth(
                "no YouTube refresh token configured; run authorize_youtube first",
            ));
        }
        let flow = self.flow()?;
        info!("starting interactive YouTube authorization");
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        let granted = flow.run_console(&mut input, &mut output)?;
        if let Some(token) = granted.refresh_token {
            *self.refresh_token.lock() = Some(token);
            *self.obtained_interactively.lock() = true;
        }
        Ok(granted.access)
    }
}

impl TokenProvider for OAuthTokenProvider {
    fn access_token(&self) -> Result<String> {
        let now = Utc::now();
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref()
            && cached.is_fresh_at(now)
        {
            return Ok(cached.access_token.clone());
        }

        let stored = self.refresh_token.lock().clone();
        let fresh = match stored {
            Some(token) => {
                debug!("refreshing YouTube access token");
                self.refresh(&token)?
            }
            None => self.authorize_interactively()?,
        };
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::io::Cursor;

    const SECRET: &str = r#"{
        "installed": {
            "client_id": "client-123.apps.googleusercontent.com",
            "client_secret": "shh",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    fn flow() -> InstalledAppFlow {
        InstalledAppFlow::new(ClientSecret::from_json(SECRET).unwrap(), YOUTUBE_UPLOAD_SCOPE)
    }

    #[test]
    fn client_secret_accepts_web_section() {
        let secret = ClientSecret::from_json(
            r#"{"web":{"client_id":"id","client_secret":"s","auth_uri":"https://a","token_uri":"https://t"}}"#,
        )
        .unwrap();
        assert_eq!(secret.client_id, "id");
        assert_eq!(secret.redirect_uri(), DEFAULT_REDIRECT_URI);
    }

    #[test]
    fn client_secret_without_sections_is_rejected() {
        let err = ClientSecret::from_json(r#"{"other":{}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn missing_client_secret_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientSecret::from_file(&dir.path().join("client_secret.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn authorization_url_carries_pkce_and_scope() {
        let request = flow().authorization_request().unwrap();
        let url = Url::parse(&request.url).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "client-123.apps.googleusercontent.com");
        assert_eq!(pairs["scope"], YOUTUBE_UPLOAD_SCOPE);
        assert_eq!(pairs["redirect_uri"], "http://localhost");
        assert_eq!(pairs["state"], request.state);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], code_challenge(&request.code_verifier));
        assert_eq!(pairs["access_type"], "offline");
    }

    #[test]
    fn each_request_gets_a_new_state() {
        let flow = flow();
        let first = flow.authorization_request().unwrap();
        let second = flow.authorization_request().unwrap();
        assert_ne!(first.state, second.state);
    }

    #[test]
    fn code_challenge_matches_rfc7636_example() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn bare_code_is_accepted() {
        assert_eq!(parse_authorization_response("  4/abc-def \n", "s").unwrap(), "4/abc-def");
    }

    #[test]
    fn redirect_url_code_is_extracted_and_state_checked() {
        let code =
            parse_authorization_response("http://localhost/?state=xyz&code=4%2Fabc&scope=s", "xyz")
                .unwrap();
        assert_eq!(code, "4/abc");

        let err = parse_authorization_response("http://localhost/?state=evil&code=4%2Fabc", "xyz")
            .unwrap_err();
        assert!(err.to_string().contains("state mismatch"));
    }

    #[test]
    fn refused_consent_and_empty_input_fail() {
        assert!(parse_authorization_response("http://localhost/?error=access_denied", "s").is_err());
        assert!(parse_authorization_response("\n", "s").is_err());
        assert!(parse_authorization_response("http://localhost/?state=s", "s").is_err());
    }

    #[test]
    fn run_console_prints_consent_url_before_reading() {
        let mut input = Cursor::new(b"\n".to_vec());
        let mut output = Vec::new();
        let err = flow().run_console(&mut input, &mut output).unwrap_err();
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("https://accounts.google.com/o/oauth2/auth?response_type=code"));
        assert!(err.to_string().contains("no authorization code"));
    }

    #[test]
    fn non_interactive_provider_without_refresh_token_fails() {
        let provider = OAuthTokenProvider::new(flow(), None, false);
        let err = provider.access_token().unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
        assert!(provider.new_refresh_token().is_none());
    }

    #[test]
    fn client_secret_file_is_read_on_first_token_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret.json");
        let provider = OAuthTokenProvider::from_client_secrets_file(
            &path,
            YOUTUBE_UPLOAD_SCOPE,
            Some("stored-refresh".into()),
            false,
        );

        let err = provider.access_token().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("reading client secret"));

        fs::write(
            &path,
            r#"{"installed":{"client_id":"id","client_secret":"s","auth_uri":"https://a","token_uri":"http://127.0.0.1:9/token"}}"#,
        )
        .unwrap();
        let err = provider.access_token().unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }

    #[test]
    fn refresh_token_grant_is_cached() {
        let mut server = mockito::Server::new();
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "stored-refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "id".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.fresh","expires_in":3599}"#)
            .expect(1)
            .create();
        let secret = ClientSecret::from_json(&format!(
            r#"{{"installed":{{"client_id":"id","client_secret":"s","auth_uri":"https://a","token_uri":"{}/token"}}}}"#,
            server.url()
        ))
        .unwrap();
        let provider = OAuthTokenProvider::new(
            InstalledAppFlow::new(secret, YOUTUBE_UPLOAD_SCOPE),
            Some("stored-refresh".into()),
            false,
        );

        assert_eq!(provider.access_token().unwrap(), "ya29.fresh");
        assert_eq!(provider.access_token().unwrap(), "ya29.fresh");
        token.assert();
        assert!(provider.new_refresh_token().is_none());
    }
}
