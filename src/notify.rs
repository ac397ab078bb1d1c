//! Chat notification sinks for error alerts.
use crate::config::Notify;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("no notification sink configured")]
    NotConfigured,
}

/// Accepts preformatted text for a chat channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Slack incoming webhook.
pub struct SlackWebhook {
    http: reqwest::Client,
    url: String,
}

impl SlackWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackWebhook {
    #[instrument(skip_all)]
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.http
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        info!("slack notification sent");
        Ok(())
    }
}

pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(bot_token),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip_all)]
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.bot.send_message(self.chat_id, text).await?;
        info!("telegram notification sent");
        Ok(())
    }
}

/// Pick the configured sink. Slack wins when both are set.
pub fn from_config(cfg: &Notify) -> Result<Arc<dyn Notifier>, NotifyError> {
    if let Some(url) = cfg.slack_webhook_url.as_deref().filter(|u| !u.is_empty()) {
        return Ok(Arc::new(SlackWebhook::new(url)));
    }
    if let Some(tg) = &cfg.telegram {
        return Ok(Arc::new(TelegramNotifier::new(&tg.bot_token, tg.chat_id)));
    }
    Err(NotifyError::NotConfigured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramSink;

    #[test]
    fn sink_selection() {
        let mut cfg = Notify::default();
        assert!(matches!(from_config(&cfg), Err(NotifyError::NotConfigured)));

        cfg.telegram = Some(TelegramSink {
            bot_token: "123:abc".into(),
            chat_id: -100,
        });
        assert!(from_config(&cfg).is_ok());

        cfg.slack_webhook_url = Some(String::new());
        assert!(from_config(&cfg).is_ok());
    }
}
