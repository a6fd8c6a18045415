//! Per-session message timeline.
//!
//! Messages are kept in ledger order whatever order they arrive in: the
//! inbound stream, history backfill and our own finalized sends can all
//! interleave, and content decrypts in whatever order downloads finish.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use mp_proto::{LedgerPosition, Message, MessageContent, MessageMetadata};

use crate::group::{group_by_gap, TimeGroup, DEFAULT_GROUP_GAP};
use crate::window::VirtualWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub group_gap: Duration,
    pub viewport: usize,
    pub overscan: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self { group_gap: DEFAULT_GROUP_GAP, viewport: 20, overscan: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    positions: HashMap<u64, LedgerPosition>,
    window: VirtualWindow,
    group_gap: chrono::Duration,
}

impl Timeline {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            messages: Vec::new(),
            positions: HashMap::new(),
            window: VirtualWindow::new(config.viewport, config.overscan),
            group_gap: chrono::Duration::from_std(config.group_gap)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, msg_id: u64) -> Option<&Message> {
        self.index_of(msg_id).map(|i| &self.messages[i])
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn index_of(&self, msg_id: u64) -> Option<usize> {
        let position = self.positions.get(&msg_id)?;
        self.messages.binary_search_by_key(position, Message::position).ok()
    }

    /// Insert or update one message. Returns `true` if it was new.
    ///
    /// An existing entry keeps its place; it only gains content it did not
    /// have yet.
    pub fn upsert(&mut self, message: Message) -> bool {
        if let Some(i) = self.index_of(message.id()) {
            let existing = &mut self.messages[i];
            if existing.content.is_none() && message.content.is_some() {
                existing.content = message.content;
            }
            existing.read |= message.read;
            return false;
        }

        let position = message.position();
        let at = match self.messages.binary_search_by_key(&position, Message::position) {
            Ok(i) | Err(i) => i,
        };
        self.positions.insert(message.id(), position);
        let appended = at == self.messages.len();
        trace!(msg_id = message.id(), %position, appended, "timeline insert");
        self.messages.insert(at, message);

        if appended {
            self.window.on_append(1);
        } else {
            self.window.set_len(self.messages.len());
        }
        true
    }

    pub fn insert_pending(&mut self, metadata: MessageMetadata) -> bool {
        self.upsert(Message::pending(metadata))
    }

    /// Attach decrypted content to a message already on the timeline.
    pub fn set_content(&mut self, msg_id: u64, content: MessageContent) -> bool {
        match self.index_of(msg_id) {
            Some(i) => {
                self.messages[i].content = Some(content);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, msg_id: u64) -> Option<Message> {
        let i = self.index_of(msg_id)?;
        self.positions.remove(&msg_id);
        let removed = self.messages.remove(i);
        self.window.set_len(self.messages.len());
        Some(removed)
    }

    pub fn mark_read(&mut self, msg_id: u64) -> bool {
        match self.index_of(msg_id) {
            Some(i) => {
                self.messages[i].read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for m in &mut self.messages {
            m.read = true;
        }
    }

    /// Position of the newest message; the resume point for history paging.
    pub fn last_position(&self) -> Option<LedgerPosition> {
        self.messages.last().map(Message::position)
    }

    pub fn groups(&self) -> Vec<TimeGroup> {
        group_by_gap(&self.messages, self.group_gap, Message::sent_at)
    }

    pub fn window(&self) -> &VirtualWindow {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut VirtualWindow {
        &mut self.window
    }

    /// The slice the presentation layer should render right now.
    pub fn rendered(&self) -> &[Message] {
        self.window.slice(&self.messages)
    }
}
