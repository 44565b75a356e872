use crate::errors::NotificationError;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotificationError>;
}

pub fn success_message(run_tag: &str) -> String {
    format!("{} crawling Done", run_tag)
}

pub fn failure_message(run_tag: &str, error: &str) -> String {
    format!("{} {}", run_tag, error)
}

/// Posts run results to one Telegram chat.
pub struct TelegramNotifier {
    http: Client,
    token: String,
    chat_id: String,
}

#[derive(Deserialize)]
struct BotReply {
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotificationError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let reply: BotReply = self
            .http
            .post(url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?
            .json()
            .await?;

        if !reply.ok {
            return Err(NotificationError::Rejected(
                reply.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        debug!("Sent notification to chat {}", self.chat_id);
        Ok(())
    }
}
