pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Identifies a placeholder message so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderId(pub i32);

/// Outbound side of a chat, bound to the message being answered.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Sends answer text with markdown formatting. Implementations must not
    /// fail just because the markdown is malformed.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Sends text without any formatting.
    async fn send_plain(&self, text: &str) -> Result<()>;

    /// Sends a photo given by URL or platform file reference.
    async fn send_photo(&self, photo: &str) -> Result<()>;

    async fn send_placeholder(&self, text: &str) -> Result<PlaceholderId>;

    async fn delete_placeholder(&self, id: PlaceholderId) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text(String),
        Plain(String),
        Photo(String),
        Placeholder(String),
        Deleted(PlaceholderId),
    }

    /// Records every outbound call; individual operations can be made to fail.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Sent>>,
        pub fail_text: bool,
        pub fail_photo_at: Option<usize>,
        pub fail_placeholder: bool,
        pub fail_delete: bool,
    }

    impl RecordingSink {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn push(&self, item: Sent) {
            self.sent.lock().unwrap().push(item);
        }

        fn photos_sent(&self) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|s| matches!(s, Sent::Photo(_)))
                .count()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send_text(&self, text: &str) -> Result<()> {
            if self.fail_text {
                anyhow::bail!("text rejected");
            }
            self.push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn send_plain(&self, text: &str) -> Result<()> {
            self.push(Sent::Plain(text.to_string()));
            Ok(())
        }

        async fn send_photo(&self, photo: &str) -> Result<()> {
            if self.fail_photo_at == Some(self.photos_sent()) {
                anyhow::bail!("photo rejected: {}", photo);
            }
            self.push(Sent::Photo(photo.to_string()));
            Ok(())
        }

        async fn send_placeholder(&self, text: &str) -> Result<PlaceholderId> {
            if self.fail_placeholder {
                anyhow::bail!("placeholder rejected");
            }
            self.push(Sent::Placeholder(text.to_string()));
            Ok(PlaceholderId(7))
        }

        async fn delete_placeholder(&self, id: PlaceholderId) -> Result<()> {
            if self.fail_delete {
                anyhow::bail!("delete rejected");
            }
            self.push(Sent::Deleted(id));
            Ok(())
        }
    }
}
