use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;

/// Thin client for the platform Graph API. Only the two send surfaces the
/// reply service needs: direct messages and comment replies. Access tokens
/// are passed per call because each managed account has its own token.
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    recipient: Recipient<'a>,
    message: MessageBody<'a>,
}

#[derive(Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct CommentReplyRequest<'a> {
    message: &'a str,
}

impl GraphClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send a direct message from a managed account to a user.
    pub async fn send_message(
        &self,
        access_token: &str,
        account_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<()> {
        let url = format!("{}/{}/messages", self.base_url, account_id);
        let body = SendMessageRequest {
            recipient: Recipient { id: recipient_id },
            message: MessageBody { text },
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "message send failed: {} {}",
                status,
                excerpt(&detail)
            ));
        }
        tracing::debug!(account_id, recipient_id, "direct message sent");
        Ok(())
    }

    /// Post a reply under an existing comment.
    pub async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        message: &str,
    ) -> Result<()> {
        let url = format!("{}/{}/replies", self.base_url, comment_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&CommentReplyRequest { message })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "comment reply failed: {} {}",
                status,
                excerpt(&detail)
            ));
        }
        tracing::debug!(comment_id, "comment reply sent");
        Ok(())
    }
}

/// Trim API error bodies so log lines stay readable.
fn excerpt(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    body[..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = GraphClient::new("https://graph.example.com/v21.0/").unwrap();
        assert_eq!(client.base_url, "https://graph.example.com/v21.0");
    }

    #[test]
    fn test_excerpt_short_body() {
        assert_eq!(excerpt("  oops  "), "oops");
    }

    #[test]
    fn test_excerpt_truncates_long_body() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).len(), 200);
    }

    #[test]
    fn test_send_message_request_shape() {
        let body = SendMessageRequest {
            recipient: Recipient { id: "123" },
            message: MessageBody { text: "hello" },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["recipient"]["id"], "123");
        assert_eq!(json["message"]["text"], "hello");
    }
}
