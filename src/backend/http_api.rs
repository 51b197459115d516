use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    domain::{
        conversation::ConversationSummary,
        session::{AuthTokens, CurrentUser},
    },
    infra::{config::BackendConfig, error::AppError, secrets::sanitize_error_code},
    usecases::contracts::{ApiError, ChatApi},
};

const API_REQUEST_FAILED: &str = "API_REQUEST_FAILED";

/// JSON-over-HTTP client for the chat backend.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(config: &BackendConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|error| AppError::BackendInit(error.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    async fn send(&self, route: &'static str, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_request_error)?;

        if !(200..300).contains(&status) {
            let error = map_http_status(status, &body);
            tracing::warn!(
                code = API_REQUEST_FAILED,
                route,
                status,
                backend_code = %sanitize_error_code(&body_code(&body).unwrap_or_default()),
                error = error.code(),
                "backend request failed"
            );
            return Err(error);
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|error| ApiError::InvalidPayload(error.to_string()))
    }
}

#[async_trait(?Send)]
impl ChatApi for HttpChatApi {
    async fn login(&self, username: &str, password: &str) -> Result<AuthTokens, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }));

        decode(self.send("auth.login", request).await?, &[])
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&json!({ "refreshToken": refresh_token }));

        decode(self.send("auth.refresh", request).await?, &[])
    }

    async fn get_current_user(&self, access_token: &str) -> Result<CurrentUser, ApiError> {
        let request = self
            .client
            .get(self.url("/users/me"))
            .bearer_auth(access_token);

        decode(self.send("users.me", request).await?, &["user"])
    }

    async fn list_chats(&self, access_token: &str) -> Result<Vec<ConversationSummary>, ApiError> {
        let request = self.client.get(self.url("/chats")).bearer_auth(access_token);

        decode(self.send("chats.list", request).await?, &["chats"])
    }

    async fn delete_chat(&self, access_token: &str, chat_id: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .delete(self.url(&format!("/chats/{chat_id}")))
            .bearer_auth(access_token);

        self.send("chats.delete", request).await.map(|_| ())
    }

    async fn register_push_token(
        &self,
        access_token: &str,
        push_token: &str,
    ) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url("/notifications/push-token"))
            .bearer_auth(access_token)
            .json(&json!({ "token": push_token }));

        self.send("notifications.push_token", request)
            .await
            .map(|_| ())
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn map_request_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else if error.is_decode() {
        ApiError::InvalidPayload(error.to_string())
    } else {
        ApiError::Network(error.without_url().to_string())
    }
}

fn body_code(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["code", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

fn map_http_status(status: u16, body: &str) -> ApiError {
    let code = body_code(body);

    match (status, code.as_deref()) {
        (400 | 401 | 403, Some("TOKEN_EXPIRED")) => ApiError::TokenExpired,
        (400 | 401 | 403, Some("INVALID_TOKEN")) => ApiError::InvalidToken,
        (401, _) => ApiError::Unauthorized,
        (404, _) => ApiError::NotFound,
        (408, _) => ApiError::Timeout,
        (409, code) => ApiError::Conflict(code.unwrap_or("conflict").to_owned()),
        (429 | 500..=599, _) => ApiError::Server { status },
        _ => ApiError::Rejected { status },
    }
}

/// Decodes a payload that may be bare or wrapped in `data` or one of
/// `envelope_keys`.
fn decode<T: DeserializeOwned>(payload: Value, envelope_keys: &[&str]) -> Result<T, ApiError> {
    let inner = unwrap_envelope(payload, envelope_keys);
    serde_json::from_value(inner).map_err(|error| ApiError::InvalidPayload(error.to_string()))
}

fn unwrap_envelope(mut payload: Value, envelope_keys: &[&str]) -> Value {
    if let Some(data) = payload.get_mut("data").map(Value::take) {
        payload = data;
    }

    for key in envelope_keys {
        if let Some(inner) = payload.get_mut(*key).map(Value::take) {
            return inner;
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::contracts::FailureClass;

    #[test]
    fn unauthorized_statuses_are_refined_by_body_code() {
        assert_eq!(
            map_http_status(401, r#"{"code": "TOKEN_EXPIRED"}"#),
            ApiError::TokenExpired
        );
        assert_eq!(
            map_http_status(403, r#"{"error": "INVALID_TOKEN"}"#),
            ApiError::InvalidToken
        );
        assert_eq!(map_http_status(401, "not json"), ApiError::Unauthorized);
    }

    #[test]
    fn availability_failures_stay_transient() {
        for status in [429, 500, 502, 503] {
            assert_eq!(
                map_http_status(status, "").classify(),
                FailureClass::Transient,
                "{status}"
            );
        }
        assert_eq!(map_http_status(408, ""), ApiError::Timeout);
    }

    #[test]
    fn forbidden_without_token_code_is_not_an_expiry() {
        let error = map_http_status(403, r#"{"code": "NOT_A_MEMBER"}"#);

        assert_eq!(error, ApiError::Rejected { status: 403 });
        assert_eq!(error.classify(), FailureClass::Conflict);
    }

    #[test]
    fn conflict_carries_backend_code() {
        assert_eq!(
            map_http_status(409, r#"{"code": "ALREADY_MEMBER"}"#),
            ApiError::Conflict("ALREADY_MEMBER".to_owned())
        );
        assert_eq!(map_http_status(404, ""), ApiError::NotFound);
    }

    #[test]
    fn decodes_bare_and_wrapped_payloads() {
        let bare: CurrentUser = decode(json!({"_id": "u1"}), &["user"]).expect("bare");
        let wrapped: CurrentUser =
            decode(json!({"data": {"user": {"id": "u2", "username": "bob"}}}), &["user"])
                .expect("wrapped");

        assert_eq!(bare.id, "u1");
        assert_eq!(wrapped.id, "u2");
        assert_eq!(wrapped.username.as_deref(), Some("bob"));
    }

    #[test]
    fn decodes_chat_list_envelope() {
        let chats: Vec<ConversationSummary> = decode(
            json!({"chats": [{
                "id": "c1",
                "type": "group",
                "participants": [],
                "unreadCount": 2,
                "updatedAt": "2024-03-01T10:00:00Z"
            }]}),
            &["chats"],
        )
        .expect("chats");

        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].unread_count, 2);
    }

    #[test]
    fn malformed_payload_is_a_validation_failure() {
        let result: Result<AuthTokens, ApiError> = decode(json!({"unexpected": true}), &[]);

        assert_eq!(
            result.map_err(|error| error.classify()),
            Err(FailureClass::Validation)
        );
    }

    #[test]
    fn joins_urls_without_double_slashes() {
        assert_eq!(
            join_url("http://host/api/", "/chats"),
            "http://host/api/chats"
        );
    }
}
