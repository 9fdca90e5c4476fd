// src/source/app_api.rs
//! Content source backed by the upstream mobile app API.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use metrics::histogram;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::ContentSource;
use crate::config::ApiConfig;
use crate::credentials::CredentialSlot;
use crate::errors::ApiError;
use crate::model::{Item, Owner, OwnerId, Tag};

#[derive(Debug, Deserialize)]
struct IllustsResponse {
    #[serde(default)]
    illusts: Vec<WireIllust>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    user_message: String,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: OwnerId,
    name: String,
    account: String,
}

impl From<WireUser> for Owner {
    fn from(u: WireUser) -> Self {
        Owner {
            id: u.id,
            name: u.name,
            handle: u.account,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserDetailResponse {
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireTag {
    name: String,
    #[serde(default)]
    translated_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireIllust {
    id: u64,
    title: String,
    #[serde(default)]
    caption: String,
    create_date: String,
    #[serde(default)]
    page_count: u32,
    user: WireUser,
    #[serde(default)]
    tags: Vec<WireTag>,
    #[serde(default)]
    x_restrict: u8,
}

impl WireIllust {
    fn into_item(self) -> anyhow::Result<Item> {
        let create_timestamp: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(&self.create_date)
            .with_context(|| format!("bad create_date {:?} on #{}", self.create_date, self.id))?;
        Ok(Item {
            id: self.id,
            title: self.title,
            caption: self.caption,
            create_timestamp,
            page_count: self.page_count,
            owner: self.user.into(),
            tags: self
                .tags
                .into_iter()
                .map(|t| Tag {
                    name: t.name,
                    translated_name: t.translated_name,
                })
                .collect(),
            is_sensitive: self.x_restrict > 0,
        })
    }
}

/// Classify an API reply and parse its payload. Network level failures are
/// handled by the caller.
fn check_reply<T: DeserializeOwned>(status: StatusCode, body: &str, what: &str) -> Result<T, ApiError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited);
    }
    if status.is_server_error() {
        return Err(ApiError::Transient(format!("upstream returned {status}")));
    }

    if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(body) {
        let msg = format!("{} {}", env.error.message, env.error.user_message);
        if msg.contains("invalid_grant") {
            return Err(ApiError::AuthExpired);
        }
        if msg.contains("Rate Limit") {
            return Err(ApiError::RateLimited);
        }
        return Err(ApiError::Malformed(msg.trim().to_string()));
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::AuthExpired);
    }
    if !status.is_success() {
        return Err(ApiError::Malformed(format!("unexpected status {status}")));
    }

    serde_json::from_str(body).map_err(|e| ApiError::Malformed(format!("unreadable {what}: {e}")))
}

pub(crate) fn classify_response(status: StatusCode, body: &str) -> Result<Vec<Item>, ApiError> {
    check_reply::<IllustsResponse>(status, body, "item list")?
        .illusts
        .into_iter()
        .map(|w| w.into_item().map_err(|e| ApiError::Malformed(format!("{e:#}"))))
        .collect()
}

pub(crate) fn classify_user_detail(status: StatusCode, body: &str) -> Result<Owner, ApiError> {
    let UserDetailResponse { user } = check_reply(status, body, "user detail")?;
    Ok(user.into())
}

pub struct AppApiSource {
    client: Client,
    base_url: String,
}

impl AppApiSource {
    pub fn new(api: &ApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(api.user_agent.clone())
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET `path` with the app headers; returns status and body text.
    async fn get(
        &self,
        path: &str,
        credential: &CredentialSlot,
        query: &[(&str, &str)],
    ) -> Result<(StatusCode, String), ApiError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(credential.access_token())
            .header("App-OS", "android")
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::Transient(format!("reading body: {e}")))?;
        Ok((status, body))
    }

    /// Profile of one owner, used to check the configured owner list.
    pub async fn user_detail(
        &self,
        owner: OwnerId,
        credential: &CredentialSlot,
    ) -> Result<Owner, ApiError> {
        let owner_param = owner.to_string();
        let (status, body) = self
            .get(
                "/v1/user/detail",
                credential,
                &[("user_id", owner_param.as_str()), ("filter", "for_ios")],
            )
            .await?;
        classify_user_detail(status, &body)
    }
}

#[async_trait]
impl ContentSource for AppApiSource {
    async fn fetch(
        &self,
        owner: OwnerId,
        credential: &CredentialSlot,
    ) -> Result<Vec<Item>, ApiError> {
        let t0 = Instant::now();
        let owner_param = owner.to_string();
        let (status, body) = self
            .get(
                "/v1/user/illusts",
                credential,
                &[
                    ("user_id", owner_param.as_str()),
                    ("type", "illust"),
                    ("filter", "for_ios"),
                ],
            )
            .await?;

        histogram!("artwatch_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        classify_response(status, &body)
    }

    fn name(&self) -> &'static str {
        "app-api"
    }
}
