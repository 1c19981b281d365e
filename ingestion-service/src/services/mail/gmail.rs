use super::{
    decode_base64url, MailError, MailMessage, MailService, MailServiceFactory,
    RetryingMailService, CONCURRENT_REQUESTS_ERROR,
};
use crate::config::GoogleConfig;
use crate::models::Account;
use crate::services::classifier::InstitutionProfile;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use service_core::retry::RetryPolicy;
use std::collections::HashSet;
use std::sync::Arc;

/// Gmail REST client bound to one account's access token.
pub struct GmailClient {
    http: Client,
    base_url: String,
    access_token: Secret<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageAdded {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListHistoryResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: String,
}

impl GmailClient {
    pub fn new(http: Client, base_url: impl Into<String>, access_token: Secret<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        resource: &str,
    ) -> Result<T, MailError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.access_token.expose_secret())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, resource));
        }

        Ok(response.json::<T>().await?)
    }
}

/// Maps a Gmail error response onto [`MailError`]. The per-user concurrency
/// limit surfaces as a 403 or 429 depending on the endpoint.
pub(crate) fn classify_error(status: StatusCode, body: &str, resource: &str) -> MailError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (body.contains(CONCURRENT_REQUESTS_ERROR) || body.contains("rateLimitExceeded")));

    if rate_limited {
        MailError::RateLimited(body.to_string())
    } else if status == StatusCode::NOT_FOUND {
        MailError::NotFound(resource.to_string())
    } else if status == StatusCode::UNAUTHORIZED {
        MailError::Authentication(body.to_string())
    } else {
        MailError::Api {
            status: status.as_u16(),
            message: body.to_string(),
        }
    }
}

#[async_trait]
impl MailService for GmailClient {
    async fn get_message_by_id(&self, id: &str) -> Result<MailMessage, MailError> {
        tracing::debug!(message_id = %id, "Fetching message");
        self.get_json(&format!("messages/{}", id), &[("format", "full")], id)
            .await
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError> {
        let attachment: AttachmentResponse = self
            .get_json(
                &format!("messages/{}/attachments/{}", message_id, attachment_id),
                &[],
                message_id,
            )
            .await?;
        decode_base64url(&attachment.data)
    }

    async fn list_statement_messages(
        &self,
        institution: &InstitutionProfile,
    ) -> Result<Vec<String>, MailError> {
        let query = institution.statement_query();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("q", query.as_str()), ("labelIds", "INBOX")];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: ListMessagesResponse = self.get_json("messages", &params, "messages").await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::info!(
            institution = %institution.institution_id,
            count = ids.len(),
            "Listed statement messages"
        );
        Ok(ids)
    }

    async fn list_history_message_ids(
        &self,
        start_history_id: &str,
    ) -> Result<Vec<String>, MailError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("startHistoryId", start_history_id),
                ("historyTypes", "messageAdded"),
                ("labelId", "INBOX"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: ListHistoryResponse = self.get_json("history", &params, "history").await?;
            for record in page.history {
                for added in record.messages_added {
                    if seen.insert(added.message.id.clone()) {
                        ids.push(added.message.id);
                    }
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(ids)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Builds [`GmailClient`]s, refreshing access tokens that are about to expire,
/// and wraps them with the message-fetch retry policy.
pub struct GoogleMailServiceFactory {
    http: Client,
    config: GoogleConfig,
    retry: RetryPolicy,
}

impl GoogleMailServiceFactory {
    pub fn new(http: Client, config: GoogleConfig, retry: RetryPolicy) -> Self {
        Self {
            http,
            config,
            retry,
        }
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &Secret<String>,
    ) -> Result<TokenResponse, MailError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("refresh_token", refresh_token.expose_secret().as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Failed to refresh token");
            return Err(MailError::Authentication(format!(
                "failed to refresh token: {}",
                body
            )));
        }

        Ok(response.json::<TokenResponse>().await?)
    }
}

#[async_trait]
impl MailServiceFactory for GoogleMailServiceFactory {
    async fn for_account(&self, account: &Account) -> Result<Arc<dyn MailService>, MailError> {
        let credential = account.credential.as_ref().ok_or_else(|| {
            MailError::Authentication(format!("account {} has no mail credential", account.id))
        })?;

        let access_token = if credential.needs_refresh(Utc::now()) {
            let refresh_token = credential.refresh_token.as_ref().ok_or_else(|| {
                MailError::Authentication("token was not found".to_string())
            })?;
            let token = self.refresh_access_token(refresh_token).await?;
            tracing::info!(
                account_id = %account.id,
                expires_at = ?token.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
                "Refreshed mail access token"
            );
            Secret::new(token.access_token)
        } else {
            credential.access_token.clone()
        };

        let client = GmailClient::new(self.http.clone(), &self.config.api_base_url, access_token);
        Ok(Arc::new(RetryingMailService::new(client, self.retry.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_limit_is_rate_limited() {
        let body = r#"{"error":{"code":403,"message":"Too many concurrent requests for user"}}"#;
        assert!(classify_error(StatusCode::FORBIDDEN, body, "m1").is_rate_limited());
        assert!(classify_error(StatusCode::TOO_MANY_REQUESTS, "", "m1").is_rate_limited());
    }

    #[test]
    fn test_other_errors() {
        assert!(matches!(
            classify_error(StatusCode::NOT_FOUND, "", "m1"),
            MailError::NotFound(id) if id == "m1"
        ));
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, "insufficient permissions", "m1"),
            MailError::Api { status: 403, .. }
        ));
        assert!(matches!(
            classify_error(StatusCode::UNAUTHORIZED, "", "m1"),
            MailError::Authentication(_)
        ));
    }
}
