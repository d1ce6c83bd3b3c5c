//! HTTP transport for REST calls.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    dbhq_common::{Error, Method, RestClient, RestRequest, RestResponse, Result},
    dbhq_config::DiscordConfig,
    reqwest::header::{AUTHORIZATION, HeaderValue},
    secrecy::{ExposeSecret, Secret},
    serde_json::Value,
    tracing::debug,
};

const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

/// Executes [`RestRequest`]s against the Discord API with a bot token.
///
/// Every response is returned as-is, whatever its status; only failures to
/// reach the API are errors.
pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
    token: Secret<String>,
}

impl std::fmt::Debug for HttpRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRestClient {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let token = config
            .token()
            .ok_or_else(|| Error::auth("no bot token configured"))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!(
                "DiscordBot (https://github.com/dbhq/dbhq-bot, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()
            .map_err(|e| Error::message(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: Secret::new(token.to_string()),
        })
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut auth = HeaderValue::from_str(&format!("Bot {}", self.token.expose_secret()))
            .map_err(|_| Error::auth("bot token is not a valid header value"))?;
        auth.set_sensitive(true);

        let mut builder = self
            .client
            .request(Self::method(request.method), &url)
            .header(AUTHORIZATION, auth);
        if let Some(reason) = &request.reason {
            builder = builder.header(AUDIT_LOG_REASON, urlencoding::encode(reason).into_owned());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(Error::transient)?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(Error::transient)?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        debug!(method = request.method.as_str(), path = %request.path, status, "rest call");
        Ok(RestResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        dbhq_common::{ErrorKind, RouteKey},
        serde_json::json,
    };

    fn config(url: &str) -> DiscordConfig {
        DiscordConfig {
            token: Some(Secret::new("tkn".into())),
            api_url: url.to_string(),
            ..DiscordConfig::default()
        }
    }

    #[tokio::test]
    async fn sends_auth_reason_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/channels/7/messages")
            .match_header("authorization", "Bot tkn")
            .match_header("x-audit-log-reason", "spam%20cleanup")
            .match_body(mockito::Matcher::Json(json!({ "content": "hi" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("X-RateLimit-Remaining", "4")
            .with_body(r#"{"id":"1"}"#)
            .create_async()
            .await;

        let client = HttpRestClient::new(&config(&server.url())).unwrap();
        let request = RestRequest::new(
            Method::Post,
            "/channels/7/messages",
            RouteKey::new(Method::Post, "/channels/{channel_id}/messages"),
        )
        .with_body(json!({ "content": "hi" }))
        .with_reason(Some("spam cleanup".into()));
        let response = client.execute(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({ "id": "1" }));
        assert_eq!(response.header("x-ratelimit-remaining"), Some("4"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_statuses_are_responses() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("DELETE", "/channels/7/messages/9")
            .with_status(404)
            .with_body(r#"{"message":"Unknown Message","code":10008}"#)
            .create_async()
            .await;

        let client = HttpRestClient::new(&config(&server.url())).unwrap();
        let request = RestRequest::new(
            Method::Delete,
            "/channels/7/messages/9",
            RouteKey::new(Method::Delete, "/channels/{channel_id}/messages/{message_id}"),
        );
        let response = client.execute(&request).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.error_for_status().unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/guilds/1/members/2/roles/3")
            .with_status(204)
            .create_async()
            .await;

        let client = HttpRestClient::new(&config(&server.url())).unwrap();
        let request = RestRequest::new(
            Method::Put,
            "/guilds/1/members/2/roles/3",
            RouteKey::new(Method::Put, "/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
        );
        assert_eq!(client.execute(&request).await.unwrap().body, Value::Null);
    }

    #[tokio::test]
    async fn unreachable_api_is_transient() {
        let client = HttpRestClient::new(&config("http://127.0.0.1:1")).unwrap();
        let request = RestRequest::new(
            Method::Get,
            "/users/@me",
            RouteKey::new(Method::Get, "/users/@me"),
        );
        assert_eq!(
            client.execute(&request).await.unwrap_err().kind(),
            ErrorKind::TransientNetwork
        );
    }

    #[test]
    fn missing_token_is_an_auth_failure() {
        let err = HttpRestClient::new(&DiscordConfig::default()).unwrap_err();
        assert!(err.is_fatal());
    }
}
