//! Conversation folding and attachment shaping.
//!
//! Everything the council reads is assembled here: prior turns folded to a
//! bounded window, attached files inlined behind named fences, images
//! carried as data URLs for multimodal delivery. `AttachmentSource` is the
//! seam that turns file references into resolved content.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::ChatMessage;

pub const MAX_HISTORY_MESSAGES: usize = 10;
pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_ATTACHMENT_CHARS: usize = 15000;

/// One uploaded file, already decoded by the transport. Image content is a
/// `data:` URL; pdf content is the extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Pdf,
    Text,
}

/// Question text with any attachments folded in.
#[derive(Debug, Clone, Default)]
pub struct ShapedContent {
    pub text: String,
    pub images: Vec<String>,
}

impl ShapedContent {
    pub fn into_user_message(self) -> ChatMessage {
        ChatMessage::user(self.text).with_images(self.images)
    }
}

/// Fold prior turns to the default window.
pub fn fold_history(history: &[ChatMessage]) -> Vec<ChatMessage> {
    fold_history_with(history, MAX_HISTORY_MESSAGES, MAX_MESSAGE_CHARS)
}

/// Keep the newest `max_messages`, truncating every message but the final
/// one to `max_chars`. The final message is always carried in full.
pub fn fold_history_with(
    history: &[ChatMessage],
    max_messages: usize,
    max_chars: usize,
) -> Vec<ChatMessage> {
    if history.is_empty() {
        return Vec::new();
    }
    let start = history.len().saturating_sub(max_messages);
    let window = &history[start..];
    if start > 0 {
        debug!(dropped = start, kept = window.len(), "folding conversation history");
    }

    window
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let is_last = index == window.len() - 1;
            if is_last {
                message.clone()
            } else {
                let mut folded = message.clone();
                folded.content = truncate_sentence(&message.content, max_chars);
                folded
            }
        })
        .collect()
}

/// Inline attachments into the question content. Text and pdf files land
/// between named fences so models can tell the file apart from the
/// question; images ride alongside as data URLs.
pub fn shape_attachments(content: &str, attachments: &[Attachment]) -> ShapedContent {
    let mut shaped = ShapedContent {
        text: content.to_string(),
        images: Vec::new(),
    };

    for attachment in attachments {
        match attachment.kind {
            AttachmentKind::Image => {
                shaped.images.push(attachment.content.clone());
            }
            AttachmentKind::Pdf => {
                let body = truncate_sentence(&attachment.content, MAX_ATTACHMENT_CHARS);
                shaped.text.push_str(&format!(
                    "\n\n--- Attached PDF: {} ---\n{}\n--- End of PDF ---",
                    attachment.name, body
                ));
            }
            AttachmentKind::Text => {
                let body = truncate_sentence(&attachment.content, MAX_ATTACHMENT_CHARS);
                shaped.text.push_str(&format!(
                    "\n\n--- Attached File: {} ---\n{}\n--- End of File ---",
                    attachment.name, body
                ));
            }
        }
    }
    shaped
}

/// Resolves an attachment reference into content the pipeline can consume.
/// The shipped implementation reads the local filesystem; a service
/// transport would resolve uploads instead.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn resolve(&self, reference: &str) -> anyhow::Result<Attachment>;
}

/// Disk-backed resolver. Known image extensions become `data:` URLs;
/// anything readable as UTF-8 is attached as text. Binary files without
/// pre-extracted text are rejected.
#[derive(Debug, Default)]
pub struct FileAttachments;

#[async_trait]
impl AttachmentSource for FileAttachments {
    async fn resolve(&self, reference: &str) -> anyhow::Result<Attachment> {
        let path = Path::new(reference);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(reference)
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading attachment {reference}"))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if let Some(mime) = image_mime(&ext) {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
            return Ok(Attachment {
                name,
                kind: AttachmentKind::Image,
                content: format!("data:{mime};base64,{encoded}"),
            });
        }

        let content = String::from_utf8(data)
            .map_err(|_| anyhow::anyhow!("attachment {reference} is binary, not utf-8 text"))?;
        Ok(Attachment {
            name,
            kind: AttachmentKind::Text,
            content,
        })
    }
}

fn image_mime(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Cut `text` to at most `max_chars` characters, preferring the last
/// sentence end past the halfway mark so the cut does not land mid-thought.
pub fn truncate_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    if let Some(boundary) = last_sentence_end(&cut) {
        if boundary + 1 >= max_chars / 2 {
            return cut.chars().take(boundary + 1).collect();
        }
    }
    cut
}

/// Char index of the last `.`, `!`, or `?` that is followed by whitespace.
fn last_sentence_end(text: &str) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    (0..chars.len().saturating_sub(1))
        .rev()
        .find(|&i| matches!(chars[i], '.' | '!' | '?') && chars[i + 1].is_whitespace())
}
