use std::fmt;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::parse_base_url;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("credentials rejected with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("token response has no access_token")]
    MissingAccessToken,
}

/// Bearer credential returned by the password grant.
///
/// Never refreshed; the value is kept for the whole process lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: parse_base_url(base_url)?,
        })
    }

    /// Exchanges a username/password pair for a bearer token.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthToken, AuthError> {
        let url = self.base_url.join("token")?;
        let form = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        let payload = response.json::<TokenResponse>().await?;
        match payload.access_token {
            Some(token) if !token.is_empty() => Ok(AuthToken(token)),
            _ => Err(AuthError::MissingAccessToken),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_token_value() {
        let token = AuthToken::new("secret-value");
        assert_eq!(format!("{token:?}"), "AuthToken(<redacted>)");
        assert_eq!(token.bearer_header(), "Bearer secret-value");
    }
}
