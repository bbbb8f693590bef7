//! Slack Web API client backing the workspace directory.

pub mod socket;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::SlackConfig;
use crate::directory::{ConversationInfo, Directory, UserInfo};

/// Error codes Slack uses when a token is unusable
const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Slack answered with `"ok": false`
#[derive(Error, Debug)]
#[error("slack {method} failed: {code}")]
pub struct SlackApiError {
    pub method: &'static str,
    pub code: String,
}

impl SlackApiError {
    pub fn is_auth_error(&self) -> bool {
        AUTH_ERROR_CODES.contains(&self.code.as_str())
    }
}

/// True if the error chain carries a Slack authentication failure
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<SlackApiError>())
        .any(SlackApiError::is_auth_error)
}

#[derive(Debug, Deserialize)]
struct ConversationInfoResponse {
    channel: SlackConversation,
}

#[derive(Debug, Deserialize)]
struct SlackConversation {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_channel: bool,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    is_im: bool,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
    user: String,
}

#[derive(Debug, Deserialize)]
struct OpenSocketResponse {
    url: String,
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("Failed to create Slack API client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            app_token: config.app_token.clone(),
        })
    }

    /// Ask Slack for a fresh socket mode WebSocket URL
    pub async fn open_socket_url(&self) -> Result<String> {
        let request = self
            .http
            .post(format!("{}/apps.connections.open", self.api_base))
            .bearer_auth(&self.app_token);
        let response: OpenSocketResponse = send("apps.connections.open", request).await?;
        Ok(response.url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        debug!("Calling Slack {} {:?}", method, params);
        let request = self
            .http
            .get(format!("{}/{}", self.api_base, method))
            .query(params)
            .bearer_auth(&self.bot_token);
        send(method, request).await
    }
}

async fn send<T: DeserializeOwned>(
    method: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to send Slack {} request", method))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Slack {} HTTP error ({}): {}", method, status, body);
    }

    let body: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse Slack {} response", method))?;

    if !body["ok"].as_bool().unwrap_or(false) {
        let code = body["error"].as_str().unwrap_or("unknown_error").to_string();
        return Err(SlackApiError { method, code }.into());
    }

    serde_json::from_value(body).with_context(|| format!("Unexpected Slack {} response", method))
}

#[async_trait]
impl Directory for SlackClient {
    async fn conversation_info(&self, id: &str) -> Result<ConversationInfo> {
        let response: ConversationInfoResponse = self
            .get("conversations.info", &[("channel", id)])
            .await?;
        let channel = response.channel;

        Ok(ConversationInfo {
            id: channel.id,
            name: channel.name.unwrap_or_default(),
            is_channel: channel.is_channel,
            is_group: channel.is_group,
            is_mpim: channel.is_mpim,
            is_im: channel.is_im,
        })
    }

    async fn conversation_members(&self, id: &str) -> Result<Vec<String>> {
        let mut members = Vec::new();
        let mut cursor = String::new();

        loop {
            let page: MembersResponse = self
                .get(
                    "conversations.members",
                    &[("channel", id), ("cursor", cursor.as_str()), ("limit", "200")],
                )
                .await
                .with_context(|| format!("Failed to list members of {} (cursor: {:?})", id, cursor))?;

            members.extend(page.members);

            cursor = page
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }

        Ok(members)
    }

    async fn user_info(&self, id: &str) -> Result<UserInfo> {
        let response: UserInfoResponse = self.get("users.info", &[("user", id)]).await?;
        Ok(UserInfo {
            id: response.user.id,
            name: response.user.name,
        })
    }

    async fn self_identity(&self) -> Result<UserInfo> {
        let response: AuthTestResponse = self.get("auth.test", &[]).await?;
        Ok(UserInfo {
            id: response.user_id,
            name: response.user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> SlackClient {
        SlackClient::new(&SlackConfig {
            bot_token: "xoxb-test".to_string(),
            app_token: "xapp-test".to_string(),
            api_base: server.base_url(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_conversation_members_follows_cursor() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.members")
                .query_param("channel", "D1")
                .query_param("cursor", "");
            then.status(200).json_body(json!({
                "ok": true,
                "members": ["U1", "U2"],
                "response_metadata": {"next_cursor": "page2"}
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.members")
                .query_param("cursor", "page2");
            then.status(200).json_body(json!({
                "ok": true,
                "members": ["U3"],
                "response_metadata": {"next_cursor": ""}
            }));
        });

        let members = client(&server).conversation_members("D1").await.unwrap();

        assert_eq!(members, vec!["U1", "U2", "U3"]);
        first.assert_calls(1);
        second.assert_calls(1);
    }

    #[tokio::test]
    async fn test_conversation_info_without_name() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.info")
                .query_param("channel", "D1");
            then.status(200).json_body(json!({
                "ok": true,
                "channel": {"id": "D1", "is_im": true, "user": "U1"}
            }));
        });

        let info = client(&server).conversation_info("D1").await.unwrap();

        assert_eq!(info.id, "D1");
        assert!(info.name.is_empty());
        assert!(info.is_im);
        assert!(!info.is_channel);
    }

    #[tokio::test]
    async fn test_self_identity_uses_auth_test() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/auth.test");
            then.status(200).json_body(json!({
                "ok": true,
                "user_id": "UBOT",
                "user": "wfhbot"
            }));
        });

        let me = client(&server).self_identity().await.unwrap();
        assert_eq!(me.id, "UBOT");
        assert_eq!(me.name, "wfhbot");
    }

    #[tokio::test]
    async fn test_not_ok_response_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.info");
            then.status(200)
                .json_body(json!({"ok": false, "error": "user_not_found"}));
        });

        let err = client(&server).user_info("U404").await.unwrap_err();
        assert!(err.to_string().contains("user_not_found"));
        assert!(!is_auth_error(&err));
    }

    #[tokio::test]
    async fn test_open_socket_auth_failure_is_detected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/apps.connections.open");
            then.status(200)
                .json_body(json!({"ok": false, "error": "invalid_auth"}));
        });

        let err = client(&server).open_socket_url().await.unwrap_err();
        assert!(is_auth_error(&err));
    }
}
