//! Google Sheets mirror of the attendance ledger.
//!
//! Authenticates as a service account (OAuth2 JWT-bearer grant) and appends
//! rows with `spreadsheets.values.append`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the access token actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("cannot read credentials {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed service account key: {0}")]
    KeyFormat(#[from] serde_json::Error),
    #[error("cannot sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("append failed: {0}")]
    Append(String),
    #[error("bad spreadsheet URL: {0}")]
    Url(String),
}

/// A destination for mirrored ledger rows.
pub trait RowSink {
    fn append_row(&mut self, row: &[&str]) -> Result<(), SheetError>;
}

/// The fields of a service-account key file we need.
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
    pub fn from_file(path: &Path) -> Result<Self, SheetError> {
        let text = std::fs::read_to_string(path).map_err(|source| SheetError::Credentials {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl<'a> Claims<'a> {
    fn new(key: &'a ServiceAccountKey, now: DateTime<Utc>) -> Self {
        Self {
            iss: &key.client_email,
            scope: SHEETS_SCOPE,
            aud: &key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// One worksheet of one spreadsheet, written as a service account.
pub struct GoogleSheet {
    key: ServiceAccountKey,
    append_url: Url,
    agent: ureq::Agent,
    token: Option<AccessToken>,
}

impl GoogleSheet {
    /// Load the key and authenticate once, so bad credentials surface at startup.
    pub fn connect(
        credentials: &Path,
        spreadsheet_id: &str,
        worksheet: &str,
        timeout: Duration,
    ) -> Result<Self, SheetError> {
        let key = ServiceAccountKey::from_file(credentials)?;
        let mut sheet = Self {
            append_url: append_url(SHEETS_API_BASE, spreadsheet_id, worksheet)?,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            key,
            token: None,
        };
        sheet.access_token()?;
        tracing::info!(
            account = %sheet.key.client_email,
            spreadsheet = spreadsheet_id,
            worksheet,
            "spreadsheet mirror authenticated"
        );
        Ok(sheet)
    }

    /// Cached bearer token, refreshed shortly before it expires.
    fn access_token(&mut self) -> Result<String, SheetError> {
        let now = Utc::now();
        if let Some(token) = self.token.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &Claims::new(&self.key, now),
            &EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?,
        )?;

        let response: TokenResponse = self
            .agent
            .post(&self.key.token_uri)
            .send_form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .map_err(|e| SheetError::Auth(e.to_string()))?
            .into_json()
            .map_err(|e| SheetError::Auth(format!("token response: {e}")))?;

        let lifetime = response.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        tracing::debug!(expires_in = lifetime, "obtained spreadsheet access token");

        let token = AccessToken {
            value: response.access_token,
            expires_at: now + ChronoDuration::seconds(lifetime),
        };
        let value = token.value.clone();
        self.token = Some(token);
        Ok(value)
    }
}

impl RowSink for GoogleSheet {
    fn append_row(&mut self, row: &[&str]) -> Result<(), SheetError> {
        let token = self.access_token()?;
        self.agent
            .request_url("POST", &self.append_url)
            .set("Authorization", &format!("Bearer {token}"))
            .send_json(serde_json::json!({ "values": [row] }))
            .map_err(|e| SheetError::Append(e.to_string()))?;
        Ok(())
    }
}

/// `{base}/{id}/values/'{worksheet}':append?valueInputOption=RAW`, path-encoded.
fn append_url(base: &str, spreadsheet_id: &str, worksheet: &str) -> Result<Url, SheetError> {
    let mut url = Url::parse(base).map_err(|e| SheetError::Url(e.to_string()))?;
    let range = format!("'{}':append", worksheet.replace('\'', "''"));
    url.path_segments_mut()
        .map_err(|_| SheetError::Url(format!("{base} cannot take path segments")))?
        .push(spreadsheet_id)
        .push("values")
        .push(&range);
    url.query_pairs_mut().append_pair("valueInputOption", "RAW");
    Ok(url)
}
