//! Compose state machine for one session.
//!
//! - `edit` moves Idle/Composing to Composing, or to Idle when the text is empty
//! - `begin_send` moves Composing to Sending
//! - `send_succeeded` moves Sending to Idle and clears the draft
//! - `send_failed` / `cancel_send` move Sending back to Composing
//!
//! The draft is the source of truth for the text: it is flushed before a
//! send starts and restored whenever a send does not complete.

use tracing::debug;

use mp_proto::SessionId;

use crate::draft::DraftManager;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeState {
    Idle,
    Composing,
    Sending,
}

impl ComposeState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Composing => "composing",
            Self::Sending => "sending",
        }
    }
}

pub struct Composer {
    session: SessionId,
    drafts: DraftManager,
    state: ComposeState,
    in_flight: Option<String>,
}

impl Composer {
    /// Starts in `Composing` if the session has a live draft.
    pub async fn open(session: SessionId, drafts: DraftManager) -> Result<Self, StoreError> {
        let state = match drafts.current(&session).await? {
            Some(_) => ComposeState::Composing,
            None => ComposeState::Idle,
        };
        Ok(Self { session, drafts, state, in_flight: None })
    }

    pub fn state(&self) -> ComposeState {
        self.state
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn edit(&mut self, text: &str) -> Result<(), StoreError> {
        if self.state == ComposeState::Sending {
            return Err(self.invalid("edit"));
        }
        self.drafts.edit(&self.session, text);
        self.state = if text.is_empty() { ComposeState::Idle } else { ComposeState::Composing };
        Ok(())
    }

    /// Move to `Sending` and hand back the text to send.
    pub async fn begin_send(&mut self) -> Result<String, StoreError> {
        if self.state != ComposeState::Composing {
            return Err(self.invalid("send"));
        }
        self.drafts.flush(&self.session).await?;
        let text = match self.drafts.current(&self.session).await? {
            Some(t) => t,
            None => {
                self.state = ComposeState::Idle;
                return Err(self.invalid("send"));
            }
        };
        self.state = ComposeState::Sending;
        self.in_flight = Some(text.clone());
        debug!(session_id = %self.session.short(), "send started");
        Ok(text)
    }

    pub async fn send_succeeded(&mut self) -> Result<(), StoreError> {
        if self.state != ComposeState::Sending {
            return Err(self.invalid("complete a send"));
        }
        self.in_flight = None;
        self.state = ComposeState::Idle;
        self.drafts.clear(&self.session).await
    }

    pub async fn send_failed(&mut self) -> Result<(), StoreError> {
        self.return_to_composing("fail a send").await
    }

    pub async fn cancel_send(&mut self) -> Result<(), StoreError> {
        self.return_to_composing("cancel a send").await
    }

    async fn return_to_composing(&mut self, action: &'static str) -> Result<(), StoreError> {
        if self.state != ComposeState::Sending {
            return Err(self.invalid(action));
        }
        self.state = ComposeState::Composing;
        match self.in_flight.take() {
            Some(text) => self.drafts.restore(&self.session, &text).await,
            None => Ok(()),
        }
    }

    fn invalid(&self, action: &'static str) -> StoreError {
        StoreError::InvalidTransition { state: self.state.name(), action }
    }
}
