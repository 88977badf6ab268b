use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InputFile, MessageEntityKind, MessageId, ParseMode, ReplyParameters,
};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::eligibility::{ChatKind, IncomingMessage, MentionSpan, SpanKind};
use crate::platform::{PlaceholderId, ReplySink};
use crate::relay::Relay;

const TELEGRAM_API: &str = "https://api.telegram.org";
const MAX_MESSAGE_BYTES: usize = 4000;

/// The bot's own username, without the leading `@`.
#[derive(Debug, Clone)]
struct BotHandle(Arc<str>);

/// Builds the bot with the configured proxy applied to its HTTP client.
pub fn build_bot(config: &Config) -> Result<Bot> {
    let mut builder = teloxide::net::default_reqwest_settings();
    if let Some(proxy) = config.proxy.to_reqwest()? {
        builder = builder.proxy(proxy);
    }
    let client = builder
        .build()
        .context("Failed to build Telegram HTTP client")?;
    Ok(Bot::with_client(&config.telegram.bot_token, client))
}

/// Checks that the Telegram API is reachable through the configured proxy.
/// Only logs; a failed probe does not stop the bot.
pub async fn probe_api(config: &Config) {
    let client = match config.proxy.to_reqwest() {
        Ok(proxy) => {
            let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
            if let Some(proxy) = proxy {
                builder = builder.proxy(proxy);
            }
            builder.build()
        }
        Err(e) => {
            warn!("Skipping connectivity check: {:#}", e);
            return;
        }
    };

    let result = match client {
        Ok(client) => client.get(TELEGRAM_API).send().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(response) => info!("Telegram API reachable ({})", response.status()),
        Err(e) => warn!("Telegram API connectivity check failed: {}", e),
    }
}

/// Run the Telegram platform until interrupted.
pub async fn run(bot: Bot, relay: Arc<Relay>) -> Result<()> {
    let me = bot.get_me().await.context("Failed to fetch bot identity")?;
    let username = me.user.username.clone().unwrap_or_default();
    info!("Starting Telegram platform as @{}...", username);

    if let Err(e) = bot.delete_webhook().drop_pending_updates(true).await {
        warn!("Failed to drop pending updates: {}", e);
    }

    let handle = BotHandle(Arc::from(username.as_str()));

    let handler = Update::filter_message()
        .filter_map(|msg: Message| to_incoming(&msg))
        .endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay, handle])
        .default_handler(|upd| async move {
            debug!("Ignoring update {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    incoming: IncomingMessage,
    relay: Arc<Relay>,
    handle: BotHandle,
) -> ResponseResult<()> {
    let sink = TelegramSink::new(bot, &msg);
    let outcome = relay.handle(&incoming, &handle.0, &sink).await;
    debug!(
        "Message {} in chat {} handled: {:?}",
        msg.id, msg.chat.id, outcome
    );
    Ok(())
}

/// Builds the platform-neutral view of a text message. Commands, messages
/// without text and messages without a sender are dropped here.
fn to_incoming(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text()?;
    let user = msg.from.as_ref()?;

    let entities = msg.entities().unwrap_or_default();
    let is_command = entities
        .iter()
        .any(|e| e.offset == 0 && matches!(e.kind, MessageEntityKind::BotCommand));
    if is_command {
        return None;
    }

    let chat_kind = if msg.chat.is_private() {
        ChatKind::Private
    } else if msg.chat.is_group() {
        ChatKind::Group
    } else if msg.chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Other
    };

    let mention_spans = entities
        .iter()
        .map(|e| MentionSpan {
            offset: e.offset,
            length: e.length,
            kind: match e.kind {
                MessageEntityKind::Mention => SpanKind::Mention,
                MessageEntityKind::TextMention { .. } => SpanKind::TextMention,
                MessageEntityKind::BotCommand => SpanKind::BotCommand,
                _ => SpanKind::Other,
            },
        })
        .collect();

    Some(IncomingMessage {
        chat_kind,
        text: text.to_string(),
        mention_spans,
        sender_id: user.id.0.to_string(),
        sender_name: user.first_name.clone(),
    })
}

/// Replies into the chat of one incoming message, threaded to that message.
struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
    reply_to: MessageId,
}

impl TelegramSink {
    fn new(bot: Bot, msg: &Message) -> Self {
        Self {
            bot,
            chat_id: msg.chat.id,
            reply_to: msg.id,
        }
    }

    fn reply_parameters(&self) -> ReplyParameters {
        ReplyParameters::new(self.reply_to).allow_sending_without_reply()
    }
}

/// URLs are fetched by Telegram; anything else is taken as a file id.
fn photo_input(photo: &str) -> InputFile {
    match reqwest::Url::parse(photo) {
        Ok(url) => InputFile::url(url),
        Err(_) => InputFile::file_id(FileId(photo.to_string())),
    }
}

fn is_markdown_error(error: &ApiError) -> bool {
    error
        .to_string()
        .to_lowercase()
        .contains("can't parse entities")
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

impl TelegramSink {
    #[allow(deprecated)]
    async fn send_markdown_chunk(&self, chunk: &str) -> Result<()> {
        let sent = self
            .bot
            .send_message(self.chat_id, chunk)
            .parse_mode(ParseMode::Markdown)
            .reply_parameters(self.reply_parameters())
            .await;

        match sent {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ref api)) if is_markdown_error(api) => {
                warn!("Markdown rejected ({}), resending as plain text", api);
                self.send_plain_chunk(chunk).await
            }
            Err(e) => Err(e).context("Failed to send answer"),
        }
    }

    async fn send_plain_chunk(&self, chunk: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, chunk)
            .reply_parameters(self.reply_parameters())
            .await
            .context("Failed to send message")?;
        Ok(())
    }
}

#[async_trait]
impl ReplySink for TelegramSink {
    /// Byte length bounds the UTF-16 length Telegram counts, so a 4000 byte
    /// chunk always fits.
    async fn send_text(&self, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_BYTES) {
            self.send_markdown_chunk(&chunk).await?;
        }
        Ok(())
    }

    async fn send_plain(&self, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_BYTES) {
            self.send_plain_chunk(&chunk).await?;
        }
        Ok(())
    }

    async fn send_photo(&self, photo: &str) -> Result<()> {
        self.bot
            .send_photo(self.chat_id, photo_input(photo))
            .reply_parameters(self.reply_parameters())
            .await
            .with_context(|| format!("Failed to send photo {}", photo))?;
        Ok(())
    }

    async fn send_placeholder(&self, text: &str) -> Result<PlaceholderId> {
        let sent = self
            .bot
            .send_message(self.chat_id, text)
            .reply_parameters(self.reply_parameters())
            .await
            .context("Failed to send placeholder")?;
        Ok(PlaceholderId(sent.id.0))
    }

    async fn delete_placeholder(&self, id: PlaceholderId) -> Result<()> {
        self.bot
            .delete_message(self.chat_id, MessageId(id.0))
            .await
            .context("Failed to delete placeholder")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn parse(chat: serde_json::Value, text: &str, entities: serde_json::Value) -> Message {
        serde_json::from_value(json!({
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": chat,
            "from": { "id": 42, "is_bot": false, "first_name": "Alice" },
            "text": text,
            "entities": entities,
        }))
        .unwrap()
    }

    fn private_chat() -> serde_json::Value {
        json!({ "id": 42, "type": "private", "first_name": "Alice" })
    }

    fn supergroup_chat() -> serde_json::Value {
        json!({ "id": -1001, "type": "supergroup", "title": "Rustaceans" })
    }

    #[test]
    fn test_private_message_conversion() {
        let msg = parse(private_chat(), "hello", json!([]));
        let incoming = to_incoming(&msg).unwrap();
        assert_eq!(incoming.chat_kind, ChatKind::Private);
        assert_eq!(incoming.text, "hello");
        assert_eq!(incoming.sender_id, "42");
        assert_eq!(incoming.sender_name, "Alice");
        assert!(incoming.mention_spans.is_empty());
    }

    #[test]
    fn test_supergroup_mention_entities_are_kept() {
        let msg = parse(
            supergroup_chat(),
            "@relay_bot what's up",
            json!([{ "type": "mention", "offset": 0, "length": 10 }]),
        );
        let incoming = to_incoming(&msg).unwrap();
        assert_eq!(incoming.chat_kind, ChatKind::Supergroup);
        assert_eq!(
            incoming.mention_spans,
            vec![MentionSpan {
                offset: 0,
                length: 10,
                kind: SpanKind::Mention
            }]
        );
    }

    #[test]
    fn test_group_chat_kind() {
        let msg = parse(
            json!({ "id": -5, "type": "group", "title": "Friends" }),
            "hi",
            json!([]),
        );
        assert_eq!(to_incoming(&msg).unwrap().chat_kind, ChatKind::Group);
    }

    #[test]
    fn test_commands_are_dropped() {
        let msg = parse(
            private_chat(),
            "/start",
            json!([{ "type": "bot_command", "offset": 0, "length": 6 }]),
        );
        assert!(to_incoming(&msg).is_none());
    }

    #[test]
    fn test_markdown_errors_are_recognised() {
        let rejected = ApiError::Unknown(
            "Bad Request: can't parse entities: Can't find end of the entity".to_string(),
        );
        assert!(is_markdown_error(&rejected));
        assert!(!is_markdown_error(&ApiError::BotBlocked));
    }

    #[test]
    fn test_split_message_short_text_untouched() {
        assert_eq!(split_message("hello", 4000), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_message_prefers_line_breaks() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks, vec![format!("{}\n", "a".repeat(30)), "b".repeat(30)]);
    }

    #[test]
    fn test_split_message_respects_char_boundaries() {
        let text = "é".repeat(3000);
        let chunks = split_message(&text, 4000);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 4000));
        assert_eq!(chunks.concat(), text);
    }

    fn sink_for(server: &mockito::Server) -> TelegramSink {
        let api_url = reqwest::Url::parse(&server.url()).unwrap();
        TelegramSink {
            bot: Bot::new("123:abc").set_api_url(api_url),
            chat_id: ChatId(42),
            reply_to: MessageId(10),
        }
    }

    fn sent_message_body() -> String {
        json!({
            "ok": true,
            "result": {
                "message_id": 11,
                "date": 1_700_000_000,
                "chat": { "id": 42, "type": "private", "first_name": "Alice" },
                "text": "*broken"
            }
        })
        .to_string()
    }

    fn send_message_path() -> Matcher {
        Matcher::Regex(r"(?i)/bot123:abc/sendmessage$".to_string())
    }

    #[tokio::test]
    async fn test_rejected_markdown_is_resent_as_plain_text() {
        let mut server = mockito::Server::new_async().await;
        let markdown = server
            .mock("POST", send_message_path())
            .match_body(Matcher::PartialJson(json!({ "parse_mode": "Markdown" })))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": false,
                    "error_code": 400,
                    "description": "Bad Request: can't parse entities: Can't find end of the entity starting at byte offset 0"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let plain = server
            .mock("POST", send_message_path())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sent_message_body())
            .expect(1)
            .create_async()
            .await;

        let result = sink_for(&server).send_text("*broken").await;

        assert!(result.is_ok(), "{:?}", result);
        markdown.assert_async().await;
        plain.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_send_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("POST", send_message_path())
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": false,
                    "error_code": 400,
                    "description": "Bad Request: chat not found"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let result = sink_for(&server).send_text("hello").await;

        assert!(result.is_err());
        rejected.assert_async().await;
    }
}
