//! VK API client used for long polling, history replay and outbound messages.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use beet_events::{ChatMember, HistoryMessage, Messenger, FRIEND_REQUESTS_PAGE_SIZE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::{
    deserialize_lenient_optional_u64, HistoryPage, LongPollServer, LongPollTransport,
};
use crate::vk_api_helpers::{
    body_excerpt, is_transient_status, is_transient_transport_error, long_poll_url, retry_after,
    RetryCause, RetryPolicy,
};

pub const DEFAULT_VK_API_BASE: &str = "https://api.vk.com/method";
pub const DEFAULT_VK_API_VERSION: &str = "5.69";
const LONG_POLL_VERSION: u8 = 2;
/// Attachments (2) plus pts in every batch (32).
const LONG_POLL_MODE: u8 = 34;
const LONG_POLL_TIMEOUT_MARGIN_SECS: u64 = 65;
const CHAT_MEMBER_FIELDS: &str = "nickname,screen_name,sex,bdate,city,online";

#[derive(Debug, Clone)]
pub struct VkApiConfig {
    pub api_base: String,
    pub api_version: String,
    pub access_token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub history_page_size: u64,
}

impl Default for VkApiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_VK_API_BASE.to_string(),
            api_version: DEFAULT_VK_API_VERSION.to_string(),
            access_token: String::new(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 5,
            retry_base_delay_ms: 1_000,
            history_page_size: 1_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum VkApiError {
    #[error("vk api {method} failed with error {code}: {message}")]
    Api {
        method: String,
        code: i64,
        message: String,
    },
    #[error("vk api {method} returned neither response nor error")]
    EmptyResponse { method: String },
}

#[derive(Debug, Deserialize)]
struct VkEnvelope<T> {
    response: Option<T>,
    error: Option<VkErrorBody>,
}

#[derive(Debug, Deserialize)]
struct VkErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct VkHistoryResponse {
    messages: VkHistoryItems,
    #[serde(default, deserialize_with = "deserialize_lenient_optional_u64")]
    new_pts: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VkHistoryItems {
    #[serde(default)]
    items: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct VkFriendRequests {
    #[serde(default)]
    items: Vec<i64>,
}

#[derive(Clone)]
pub struct VkApiClient {
    http: reqwest::Client,
    api_base: String,
    api_version: String,
    access_token: String,
    retry: RetryPolicy,
    history_page_size: u64,
}

impl VkApiClient {
    pub fn new(config: VkApiConfig) -> Result<Self> {
        if config.access_token.trim().is_empty() {
            bail!("vk api client requires a non-empty access token");
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("beet-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create vk api client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_version: config.api_version.trim().to_string(),
            access_token: config.access_token.trim().to_string(),
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
            history_page_size: config.history_page_size.max(1),
        })
    }

    async fn call_method<T>(&self, method: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.api_base);
        let mut form = params.to_vec();
        form.push(("access_token", self.access_token.clone()));
        form.push(("v", self.api_version.clone()));

        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = self
                .http
                .post(&url)
                .header("x-beet-retry-attempt", attempt.saturating_sub(1).to_string())
                .form(&form)
                .send()
                .await;
            let (cause, failure) = match response {
                Ok(response) if response.status().is_success() => {
                    let envelope = response
                        .json::<VkEnvelope<T>>()
                        .await
                        .with_context(|| format!("failed to decode vk {method}"))?;
                    match (envelope.response, envelope.error) {
                        (_, Some(error)) => (
                            RetryCause::ApiError {
                                code: error.error_code,
                            },
                            anyhow::Error::from(VkApiError::Api {
                                method: method.to_string(),
                                code: error.error_code,
                                message: error.error_msg,
                            }),
                        ),
                        (Some(response), None) => return Ok(response),
                        (None, None) => {
                            return Err(VkApiError::EmptyResponse {
                                method: method.to_string(),
                            }
                            .into())
                        }
                    }
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let requested = retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    let failure = anyhow!(
                        "vk api {method} failed with status {status}: {}",
                        body_excerpt(&body, 800)
                    );
                    if !is_transient_status(status) {
                        return Err(failure);
                    }
                    (
                        RetryCause::HttpStatus {
                            retry_after: requested,
                        },
                        failure,
                    )
                }
                Err(error) => {
                    let transient = is_transient_transport_error(&error);
                    let failure =
                        anyhow::Error::from(error).context(format!("vk api {method} request failed"));
                    if !transient {
                        return Err(failure);
                    }
                    (RetryCause::Transport, failure)
                }
            };

            let Some(pause) = self.retry.next_pause(attempt, cause) else {
                return Err(failure);
            };
            tracing::debug!(
                method,
                attempt,
                ?cause,
                pause_ms = pause.as_millis() as u64,
                "retrying vk api call"
            );
            tokio::time::sleep(pause).await;
        }
    }
}

#[async_trait]
impl LongPollTransport for VkApiClient {
    async fn acquire_server(&self) -> Result<LongPollServer> {
        self.call_method(
            "messages.getLongPollServer",
            &[
                ("lp_version", LONG_POLL_VERSION.to_string()),
                ("need_pts", "1".to_string()),
            ],
        )
        .await
    }

    async fn poll(&self, server: &LongPollServer, wait_secs: u64) -> Result<String> {
        let query = [
            ("act", "a_check".to_string()),
            ("key", server.key.clone()),
            ("ts", server.ts.to_string()),
            ("wait", wait_secs.to_string()),
            ("mode", LONG_POLL_MODE.to_string()),
            ("version", LONG_POLL_VERSION.to_string()),
        ];
        let response = self
            .http
            .get(long_poll_url(&server.server))
            .query(&query)
            .timeout(Duration::from_secs(
                wait_secs.saturating_add(LONG_POLL_TIMEOUT_MARGIN_SECS),
            ))
            .send()
            .await
            .context("long-poll request failed")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read long-poll response")?;
        if !status.is_success() {
            bail!(
                "long-poll request failed with status {}: {}",
                status.as_u16(),
                body_excerpt(&body, 320)
            );
        }
        Ok(body)
    }

    async fn fetch_history(&self, ts: u64, pts: u64) -> Result<HistoryPage> {
        let response: VkHistoryResponse = self
            .call_method(
                "messages.getLongPollHistory",
                &[
                    ("ts", ts.to_string()),
                    ("pts", pts.to_string()),
                    ("fields", String::new()),
                    ("events_limit", self.history_page_size.to_string()),
                    ("msgs_limit", self.history_page_size.to_string()),
                    ("lp_version", LONG_POLL_VERSION.to_string()),
                ],
            )
            .await?;
        Ok(HistoryPage {
            messages: response.messages.items,
            new_pts: response.new_pts,
        })
    }
}

#[async_trait]
impl Messenger for VkApiClient {
    async fn send_message(&self, peer_id: i64, text: &str, forward_ids: &[i64]) -> Result<i64> {
        let mut params = vec![("peer_id", peer_id.to_string()), ("message", text.to_string())];
        if !forward_ids.is_empty() {
            let joined = forward_ids
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            params.push(("forward_messages", joined));
        }
        self.call_method("messages.send", &params).await
    }

    async fn fetch_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>> {
        self.call_method(
            "messages.getChatUsers",
            &[
                ("chat_id", chat_id.to_string()),
                ("fields", CHAT_MEMBER_FIELDS.to_string()),
                ("name_case", "nom".to_string()),
            ],
        )
        .await
    }

    async fn fetch_friend_requests(&self, offset: usize) -> Result<Vec<i64>> {
        let requests: VkFriendRequests = self
            .call_method(
                "friends.getRequests",
                &[
                    ("offset", offset.to_string()),
                    ("count", FRIEND_REQUESTS_PAGE_SIZE.to_string()),
                    ("out", "0".to_string()),
                ],
            )
            .await?;
        Ok(requests.items)
    }

    async fn approve_friend_request(&self, user_id: i64) -> Result<()> {
        let status: i64 = self
            .call_method("friends.add", &[("user_id", user_id.to_string())])
            .await?;
        tracing::debug!(user_id, status, "friend request approved");
        Ok(())
    }
}
