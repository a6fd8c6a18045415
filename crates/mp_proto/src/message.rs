//! Message types.
//!
//! Only `MessageMetadata` is anchored on the ledger. The payload
//! (`MessageContent`) travels encrypted through the content store and is
//! only ever held decrypted in the local `Message` projection.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mp_crypto::AccountId;

use crate::error::ProtoError;
use crate::session::SessionId;

/// Upper bound for a content reference (a CID is usually 46–59 bytes).
pub const MAX_CONTENT_REF_LEN: usize = 128;

const PREVIEW_CHARS: usize = 64;

// ── Kind ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Media,
    System,
}

impl MessageKind {
    /// Ledger type code.
    pub fn code(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Media => 1,
            Self::System => 4,
        }
    }

    /// Image (1), file (2) and voice (3) all collapse to `Media`.
    /// Unknown codes read as `Text`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1..=3 => Self::Media,
            4 => Self::System,
            _ => Self::Text,
        }
    }
}

// ── Content (decrypted payload) ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media {
        /// Content reference of the (separately encrypted) media blob.
        reference: String,
        mime_type: String,
        size_bytes: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    /// Structured metadata, e.g. an order status notice.
    Metadata {
        text: String,
        #[serde(default)]
        fields: BTreeMap<String, serde_json::Value>,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Media { .. } => MessageKind::Media,
            Self::Metadata { .. } => MessageKind::System,
        }
    }

    /// Deterministic serialised form (field order fixed by the type,
    /// metadata map ordered by key).
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Short single-line preview for session lists.
    pub fn preview(&self) -> String {
        let raw = match self {
            Self::Text { body } => body.clone(),
            Self::Media { caption: Some(c), .. } if !c.is_empty() => format!("[media] {c}"),
            Self::Media { mime_type, .. } => format!("[media] {mime_type}"),
            Self::Metadata { text, .. } => text.clone(),
        };
        let line = raw.lines().next().unwrap_or_default();
        if line.chars().count() > PREVIEW_CHARS {
            let cut: String = line.chars().take(PREVIEW_CHARS - 1).collect();
            format!("{cut}…")
        } else {
            line.to_string()
        }
    }
}

// ── Content reference ────────────────────────────────────────────────────────

/// Opaque content-addressed handle. Never interpreted beyond validation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(reference: impl Into<String>) -> Result<Self, ProtoError> {
        let reference = reference.into();
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(ProtoError::InvalidContentRef("empty".into()));
        }
        if trimmed.len() > MAX_CONTENT_REF_LEN {
            return Err(ProtoError::InvalidContentRef(format!(
                "{} bytes exceeds {MAX_CONTENT_REF_LEN}",
                trimmed.len()
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ProtoError::InvalidContentRef(format!("illegal character in {trimmed}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentRef {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentRef> for String {
    fn from(r: ContentRef) -> Self {
        r.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentRef({})", self.0)
    }
}

// ── Ledger ordering ──────────────────────────────────────────────────────────

/// Ledger-native position: block number, then index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct LedgerPosition {
    pub block: u64,
    pub index: u32,
}

impl LedgerPosition {
    pub fn new(block: u64, index: u32) -> Self {
        Self { block, index }
    }
}

impl fmt::Display for LedgerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.block, self.index)
    }
}

// ── Anchored metadata ────────────────────────────────────────────────────────

/// The metadata record anchored on the ledger. Immutable once anchored; the
/// ledger is the only source of truth for its existence and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub msg_id: u64,
    pub session_id: SessionId,
    pub sender: AccountId,
    pub receiver: AccountId,
    pub content_ref: ContentRef,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
    pub position: LedgerPosition,
}

impl MessageMetadata {
    /// The other participant, from `me`'s point of view.
    pub fn peer_of(&self, me: &AccountId) -> &AccountId {
        if &self.sender == me {
            &self.receiver
        } else {
            &self.sender
        }
    }

    pub fn is_outgoing(&self, me: &AccountId) -> bool {
        &self.sender == me
    }
}

// ── Local projection ─────────────────────────────────────────────────────────

/// Display projection of an anchored message. `content` is `None` until the
/// envelope has been fetched and decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub metadata: MessageMetadata,
    pub content: Option<MessageContent>,
    pub read: bool,
}

impl Message {
    pub fn pending(metadata: MessageMetadata) -> Self {
        Self { metadata, content: None, read: false }
    }

    pub fn decrypted(metadata: MessageMetadata, content: MessageContent) -> Self {
        Self { metadata, content: Some(content), read: false }
    }

    pub fn id(&self) -> u64 {
        self.metadata.msg_id
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.metadata.sent_at
    }

    pub fn position(&self) -> LedgerPosition {
        self.metadata.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes() {
        assert_eq!(MessageKind::from_code(0), MessageKind::Text);
        assert_eq!(MessageKind::from_code(2), MessageKind::Media);
        assert_eq!(MessageKind::from_code(4), MessageKind::System);
        assert_eq!(MessageKind::from_code(99), MessageKind::Text);
        for kind in [MessageKind::Text, MessageKind::Media, MessageKind::System] {
            assert_eq!(MessageKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn content_ref_validation() {
        assert!(ContentRef::new("bafkreiabc").is_ok());
        assert!(ContentRef::new("  ").is_err());
        assert!(ContentRef::new("a/b").is_err());
        assert!(ContentRef::new("x".repeat(MAX_CONTENT_REF_LEN + 1)).is_err());
        assert_eq!(ContentRef::new(" Qmabc ").unwrap().as_str(), "Qmabc");
    }

    #[test]
    fn content_is_tagged() {
        let json = serde_json::to_value(MessageContent::text("hi")).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["body"], "hi");
    }

    #[test]
    fn preview_truncates_and_takes_first_line() {
        let long = MessageContent::text("x".repeat(200));
        let p = long.preview();
        assert_eq!(p.chars().count(), PREVIEW_CHARS);
        assert!(p.ends_with('…'));

        let multi = MessageContent::text("first\nsecond");
        assert_eq!(multi.preview(), "first");

        let media = MessageContent::Media {
            reference: "bafk1".into(),
            mime_type: "image/png".into(),
            size_bytes: 10,
            caption: None,
        };
        assert_eq!(media.preview(), "[media] image/png");
        assert_eq!(media.kind(), MessageKind::Media);
    }

    #[test]
    fn positions_order_by_block_then_index() {
        assert!(LedgerPosition::new(1, 9) < LedgerPosition::new(2, 0));
        assert!(LedgerPosition::new(2, 0) < LedgerPosition::new(2, 1));
    }
}
