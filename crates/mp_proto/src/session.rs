//! Sessions and drafts.
//!
//! A session is the conversation between exactly two accounts. Its id is
//! derived from the unordered participant pair, so both sides compute the
//! same id without coordination.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mp_crypto::{session_digest, AccountId};

use crate::error::ProtoError;

// ── Participants ─────────────────────────────────────────────────────────────

/// Unordered participant pair, stored sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participants {
    low: AccountId,
    high: AccountId,
}

impl Participants {
    pub fn new(a: AccountId, b: AccountId) -> Result<Self, ProtoError> {
        if a == b {
            return Err(ProtoError::InvalidParticipants(format!(
                "a session needs two distinct accounts, got {} twice",
                a.short()
            )));
        }
        let (low, high) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn session_id(&self) -> SessionId {
        SessionId::for_pair(&self.low, &self.high)
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        &self.low == account || &self.high == account
    }

    /// The other participant, or `None` when `me` is not in the pair.
    pub fn peer_of(&self, me: &AccountId) -> Option<&AccountId> {
        if &self.low == me {
            Some(&self.high)
        } else if &self.high == me {
            Some(&self.low)
        } else {
            None
        }
    }

    pub fn accounts(&self) -> (&AccountId, &AccountId) {
        (&self.low, &self.high)
    }
}

// ── Session id ───────────────────────────────────────────────────────────────

/// 64 hex chars: BLAKE3 of the sorted participant pair.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn for_pair(a: &AccountId, b: &AccountId) -> Self {
        Self(session_digest(a.as_str(), b.as_str()).to_hex())
    }

    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        let s = s.trim();
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtoError::InvalidSessionId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for SessionId {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.short())
    }
}

// ── Persistent records ───────────────────────────────────────────────────────

/// Inbound ids remembered individually before the oldest read ones are folded
/// into `seen_floor`.
pub const SEEN_CAP: usize = 2048;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub participants: Participants,
    pub last_activity_at: DateTime<Utc>,
    /// Inbound message ids not yet read. Always a subset of `seen`.
    #[serde(default)]
    pub unread: BTreeSet<u64>,
    /// Inbound message ids already counted, in any arrival order.
    #[serde(default)]
    pub seen: BTreeSet<u64>,
    /// Every inbound id at or below this was seen and read.
    #[serde(default)]
    pub seen_floor: Option<u64>,
    /// Messages hidden on this side only.
    #[serde(default)]
    pub hidden: BTreeSet<u64>,
    #[serde(default)]
    pub last_preview: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

impl SessionRecord {
    pub fn new(participants: Participants, now: DateTime<Utc>) -> Self {
        Self {
            id: participants.session_id(),
            participants,
            last_activity_at: now,
            unread: BTreeSet::new(),
            seen: BTreeSet::new(),
            seen_floor: None,
            hidden: BTreeSet::new(),
            last_preview: None,
            archived: false,
        }
    }

    pub fn unread_count(&self) -> u32 {
        self.unread.len() as u32
    }

    pub fn has_seen(&self, msg_id: u64) -> bool {
        self.seen_floor.map_or(false, |floor| msg_id <= floor) || self.seen.contains(&msg_id)
    }

    fn is_read(&self, msg_id: u64) -> bool {
        self.has_seen(msg_id) && !self.unread.contains(&msg_id)
    }

    /// Count an inbound message once. Returns `false` when it was already
    /// seen, whatever its ledger position relative to earlier arrivals.
    pub fn record_inbound(&mut self, msg_id: u64, unread: bool) -> bool {
        if self.has_seen(msg_id) {
            return false;
        }
        self.seen.insert(msg_id);
        if unread {
            self.unread.insert(msg_id);
        }
        self.prune();
        true
    }

    /// Returns `true` when the message was unread.
    pub fn mark_read(&mut self, msg_id: u64) -> bool {
        if !self.has_seen(msg_id) {
            self.seen.insert(msg_id);
        }
        let was_unread = self.unread.remove(&msg_id);
        self.prune();
        was_unread
    }

    /// Hide a message locally. A hidden message is also read.
    pub fn hide(&mut self, msg_id: u64) -> bool {
        self.mark_read(msg_id);
        self.hidden.insert(msg_id)
    }

    pub fn is_hidden(&self, msg_id: u64) -> bool {
        self.hidden.contains(&msg_id)
    }

    pub fn mark_all_read(&mut self) -> usize {
        let n = self.unread.len();
        self.unread.clear();
        self.prune();
        n
    }

    /// Additive merge with a concurrently written copy of the same record.
    ///
    /// Seen and hidden ids are the union of both. An id stays unread only
    /// while neither side has read it. Activity is the max; the preview follows the side
    /// with newer activity; `archived` sticks once set by either writer.
    pub fn merge(&mut self, other: &SessionRecord) {
        if other.id != self.id {
            return;
        }
        let unread: BTreeSet<u64> = self
            .unread
            .union(&other.unread)
            .copied()
            .filter(|id| !self.is_read(*id) && !other.is_read(*id))
            .collect();
        self.seen.extend(other.seen.iter().copied());
        self.seen_floor = self.seen_floor.max(other.seen_floor);
        self.unread = unread;
        self.hidden.extend(other.hidden.iter().copied());

        if other.last_activity_at > self.last_activity_at {
            self.last_activity_at = other.last_activity_at;
            if other.last_preview.is_some() {
                self.last_preview = other.last_preview.clone();
            }
        } else if self.last_preview.is_none() {
            self.last_preview = other.last_preview.clone();
        }
        self.archived |= other.archived;
        self.prune();
    }

    fn prune(&mut self) {
        if let Some(floor) = self.seen_floor {
            self.seen.retain(|id| *id > floor);
        }
        while self.seen.len() > SEEN_CAP {
            let Some(oldest_read) = self.seen.iter().copied().find(|id| !self.unread.contains(id))
            else {
                break;
            };
            self.seen.remove(&oldest_read);
            self.seen_floor = self.seen_floor.max(Some(oldest_read));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub session_id: SessionId,
    pub text: String,
    pub saved_at: DateTime<Utc>,
}

impl DraftRecord {
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.saved_at > ttl
    }
}
