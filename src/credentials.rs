#![forbid(unsafe_code)]

//! Bearer-token providers for both remote services.
//!
//! The pipeline never sees how a token was obtained: Drive uses a service
//! account (JWT bearer grant), YouTube uses the installed-app OAuth flow from
//! [`crate::oauth`], and tests hand in a [`StaticTokenProvider`].

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result, describe_http_error};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this many seconds before the server says they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token valid for at least the next request.
    fn access_token(&self) -> Result<String>;
}

/// Always returns the same token. Handy for tests and for running against a
/// token minted elsewhere.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedToken {
    pub(crate) access_token: String,
    pub(crate) expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub(crate) fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Body returned by Google's token endpoint for every grant type we use.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<i64>,
    #[serde(default)]
    pub(crate) refresh_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_cached(self, now: DateTime<Utc>) -> CachedToken {
        // Google issues one-hour tokens; assume that when the field is absent.
        let ttl = self.expires_in.unwrap_or(3600).max(0);
        CachedToken {
            access_token: self.access_token,
            expires_at: now + Duration::seconds(ttl),
        }
    }
}

/// POSTs a form to a token endpoint and decodes the standard response.
pub(crate) fn request_token(token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let response = ureq::post(token_uri)
        .send_form(form)
        .map_err(|err| PipelineError::auth(format!("{token_uri}: {}", describe_http_error(err))))?;
    response
        .into_json::<TokenResponse>()
        .map_err(|err| PipelineError::auth(format!("decoding token response: {err}")))
}

/// The subset of a service-account key file we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Parses the service-account JSON document (`GDRIVE_JSON` by default).
    pub fn from_json(raw: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(raw).map_err(|err| {
            PipelineError::config(format!("service account credentials are malformed: {err}"))
        })?;
        if key.client_email.trim().is_empty() {
            return Err(PipelineError::config(
                "service account credentials have an empty client_email",
            ));
        }
        if key.private_key.trim().is_empty() {
            return Err(PipelineError::config(
                "service account credentials have an empty private_key",
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges signed JWT assertions for Drive access tokens and caches them.
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenProvider")
            .field("client_email", &self.key.client_email)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenProvider {
    /// Builds a provider with the full Drive scope.
    pub fn from_json(raw: &str) -> Result<Self> {
        Self::new(ServiceAccountKey::from_json(raw)?, DRIVE_SCOPE)
    }

    pub fn new(key: ServiceAccountKey, scope: &str) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|err| {
            PipelineError::config(format!("service account private_key is not a valid RSA PEM: {err}"))
        })?;
        Ok(Self {
            key,
            signing_key,
            scope: scope.to_string(),
            cache: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|err| PipelineError::auth(format!("signing service account assertion: {err}")))
    }
}

impl TokenProvider for ServiceAccountTokenProvider {
    fn access_token(&self) -> Result<String> {
        let now = Utc::now();
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref()
            && cached.is_fresh_at(now)
        {
            return Ok(cached.access_token.clone());
        }

        let assertion = self.sign_assertion(now)?;
        let response = request_token(
            &self.key.token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)],
        )?;
        let fresh = response.into_cached(now);
        debug!(
            client_email = %self.key.client_email,
            expires_at = %fresh.expires_at,
            "obtained service account token"
        );
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
