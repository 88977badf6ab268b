//! Decides whether an incoming message should be answered and extracts the
//! question to forward.
//!
//! Private chats are always answered. Groups and supergroups are answered
//! only when the bot is mentioned, either literally (`@handle` in the text)
//! or through a `mention` entity attached by the platform.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// `@username` recognised by the platform.
    Mention,
    /// Mention of a user without a username.
    TextMention,
    BotCommand,
    Other,
}

/// Entity annotation on the message text. Offsets are platform units
/// (UTF-16 code units on Telegram) and only compared against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionSpan {
    pub offset: usize,
    pub length: usize,
    pub kind: SpanKind,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_kind: ChatKind,
    pub text: String,
    pub mention_spans: Vec<MentionSpan>,
    pub sender_id: String,
    pub sender_name: String,
}

/// Where a literal `@handle` has to appear to count as a mention.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlePosition {
    #[default]
    Anywhere,
    Leading,
}

impl FromStr for HandlePosition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anywhere" => Ok(HandlePosition::Anywhere),
            "leading" | "start" => Ok(HandlePosition::Leading),
            other => bail!("Unknown mention position: {}", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct MentionPolicy {
    #[serde(default)]
    pub handle_position: HandlePosition,
    /// Only count `mention` entities that start the message.
    #[serde(default)]
    pub entity_at_start_only: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    policy: MentionPolicy,
}

impl Classifier {
    pub fn new(policy: MentionPolicy) -> Self {
        Self { policy }
    }

    /// Returns the question to forward, or `None` when the message should be
    /// ignored.
    pub fn classify(&self, msg: &IncomingMessage, bot_handle: &str) -> Option<String> {
        if msg.text.is_empty() {
            return None;
        }

        match msg.chat_kind {
            ChatKind::Private => Some(msg.text.clone()),
            ChatKind::Group | ChatKind::Supergroup => {
                let tag = handle_tag(bot_handle);
                let mentioned = self.mentions_literally(&msg.text, tag.as_deref())
                    || self.has_mention_entity(&msg.mention_spans);
                if !mentioned {
                    return None;
                }
                Some(extract_question(&msg.text, tag.as_deref()))
            }
            ChatKind::Other => None,
        }
    }

    fn mentions_literally(&self, text: &str, tag: Option<&str>) -> bool {
        let Some(tag) = tag else {
            return false;
        };
        match self.policy.handle_position {
            HandlePosition::Anywhere => text.contains(tag),
            HandlePosition::Leading => text.starts_with(tag),
        }
    }

    fn has_mention_entity(&self, spans: &[MentionSpan]) -> bool {
        spans.iter().any(|span| {
            span.kind == SpanKind::Mention && (!self.policy.entity_at_start_only || span.offset == 0)
        })
    }
}

/// `@handle`, tolerating a handle that already carries the `@`.
fn handle_tag(bot_handle: &str) -> Option<String> {
    let handle = bot_handle.trim().trim_start_matches('@');
    if handle.is_empty() {
        None
    } else {
        Some(format!("@{}", handle))
    }
}

/// Removes the first `@handle` and trims surrounding whitespace.
fn extract_question(text: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) => text.replacen(tag, "", 1).trim().to_string(),
        None => text.trim().to_string(),
    }
}
