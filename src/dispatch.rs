use anyhow::Result;
use tracing::debug;

use crate::ai::AiResponse;
use crate::platform::ReplySink;

/// Separates photo references in a multi-image answer.
pub const IMAGE_DELIMITER: &str = "|||||";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Photo(String),
}

/// Decides how an answer is rendered. Empty segments between delimiters are
/// kept and sent as-is.
pub fn plan(response: &AiResponse, no_answer: &str) -> Vec<Reply> {
    let answer = response.answer.as_deref().unwrap_or(no_answer);

    if response.is_image() {
        answer
            .split(IMAGE_DELIMITER)
            .map(|url| Reply::Photo(url.to_string()))
            .collect()
    } else {
        vec![Reply::Text(answer.to_string())]
    }
}

/// Sends the answer in order, stopping at the first failed send.
pub async fn dispatch<S>(response: &AiResponse, sink: &S, no_answer: &str) -> Result<()>
where
    S: ReplySink + ?Sized,
{
    let replies = plan(response, no_answer);
    debug!("Dispatching {} reply message(s)", replies.len());

    for reply in replies {
        match reply {
            Reply::Text(text) => sink.send_text(&text).await?,
            Reply::Photo(photo) => sink.send_photo(&photo).await?,
        }
    }
    Ok(())
}
