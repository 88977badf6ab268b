use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::ai::{AiClient, AiRequest};
use crate::config::{Config, MessagesConfig};
use crate::dispatch::dispatch;
use crate::eligibility::{Classifier, IncomingMessage};
use crate::platform::ReplySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Message did not ask anything of the bot.
    Ignored,
    Answered,
    /// The answer could not be delivered; the user got the generic error text.
    SendFailed,
}

/// Everything needed to answer one message. Holds no mutable state, so one
/// instance is shared by all concurrent handlers.
pub struct Relay {
    classifier: Classifier,
    ai: AiClient,
    messages: MessagesConfig,
}

impl Relay {
    pub fn new(classifier: Classifier, ai: AiClient, messages: MessagesConfig) -> Self {
        Self {
            classifier,
            ai,
            messages,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let ai = AiClient::new(&config.ai, &config.proxy)?;
        Ok(Self::new(
            Classifier::new(config.mention),
            ai,
            config.messages.clone(),
        ))
    }

    pub async fn handle<S>(&self, msg: &IncomingMessage, bot_handle: &str, sink: &S) -> Outcome
    where
        S: ReplySink + ?Sized,
    {
        let Some(question) = self.classifier.classify(msg, bot_handle) else {
            return Outcome::Ignored;
        };

        info!(
            "Question from {} ({}): {}",
            msg.sender_name, msg.sender_id, question
        );

        let request = AiRequest {
            user_id: msg.sender_id.clone(),
            user_name: msg.sender_name.clone(),
            question,
        };

        let result = with_placeholder(sink, &self.messages.thinking, async {
            let response = self
                .ai
                .ask_or_fallback(&request, &self.messages.service_error)
                .await;
            dispatch(&response, sink, &self.messages.no_answer).await
        })
        .await;

        match result {
            Ok(()) => Outcome::Answered,
            Err(e) => {
                error!("Failed to deliver answer to {}: {:#}", msg.sender_id, e);
                let notice = format!("{}{}", self.messages.send_failed, e);
                if let Err(e) = sink.send_plain(&notice).await {
                    warn!("Failed to send error notice: {:#}", e);
                }
                Outcome::SendFailed
            }
        }
    }
}

/// Runs `work` while a placeholder message is shown. The placeholder is
/// removed on every exit path, including a panic inside `work`, which is
/// reported as an error. When the placeholder cannot be sent the work still
/// runs and there is nothing to delete.
pub async fn with_placeholder<S, F, T>(sink: &S, text: &str, work: F) -> Result<T>
where
    S: ReplySink + ?Sized,
    F: Future<Output = Result<T>>,
{
    let placeholder = match sink.send_placeholder(text).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Failed to send placeholder: {:#}", e);
            None
        }
    };

    let result = AssertUnwindSafe(work)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(anyhow!("handler panicked: {}", panic_message(&*panic))));

    if let Some(id) = placeholder {
        if let Err(e) = sink.delete_placeholder(id).await {
            warn!("Failed to delete placeholder: {:#}", e);
        }
    }

    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
