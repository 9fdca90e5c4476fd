// src/credentials/oauth.rs
//! Refresh-token grant against the upstream OAuth endpoint.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{Credential, CredentialIssuer};
use crate::config::ApiConfig;
use crate::errors::IssueError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct OAuthIssuer {
    client: Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthIssuer {
    pub fn new(api: &ApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(api.user_agent.clone())
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            auth_url: api.auth_url.clone(),
            client_id: api.client_id.clone(),
            client_secret: api.client_secret.clone(),
        })
    }
}

/// Map a token endpoint reply onto a credential or an issue error.
pub(crate) fn classify_token_response(
    status: StatusCode,
    body: &str,
    old_refresh: &str,
) -> Result<Credential, IssueError> {
    // Only a refused grant condemns the refresh token.
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
        return Err(IssueError::Rejected(format!(
            "token endpoint returned {status}: {}",
            body.trim()
        )));
    }
    if !status.is_success() {
        return Err(IssueError::Unavailable(format!("token endpoint returned {status}")));
    }
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| IssueError::Unavailable(format!("unreadable token response: {e}")))?;
    if parsed.access_token.is_empty() {
        return Err(IssueError::Unavailable("token response without access_token".into()));
    }
    Ok(Credential {
        access_token: parsed.access_token,
        refresh_token: parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| old_refresh.to_string()),
    })
}

#[async_trait]
impl CredentialIssuer for OAuthIssuer {
    async fn exchange(&self, refresh_token: &str) -> Result<Credential, IssueError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("include_policy", "true"),
            ("refresh_token", refresh_token),
        ];
        let resp = self
            .client
            .post(&self.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| IssueError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| IssueError::Unavailable(e.to_string()))?;
        classify_token_response(status, &body, refresh_token)
    }
}
