//! Inbound metadata stream.
//!
//! A background task polls the transport for records addressed to the local
//! account and forwards them through a bounded channel. It keeps the last
//! delivered `LedgerPosition` and only ever forwards records strictly after
//! it, so reconnects replay nothing. Transport failures are logged as
//! dropped subscriptions and retried with backoff; the consumer never sees
//! them. Dropping the subscription stops the task.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use mp_crypto::AccountId;
use mp_proto::ledger::MetadataWire;
use mp_proto::{LedgerPosition, MessageMetadata};

use crate::adapter::{decode, LedgerAdapterConfig};
use crate::error::LedgerError;
use crate::transport::LedgerTransport;

const CHANNEL_CAPACITY: usize = 256;

pub struct InboundSubscription {
    rx: ReceiverStream<MessageMetadata>,
    last_delivered: Arc<Mutex<Option<LedgerPosition>>>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

struct Poller {
    transport: Arc<dyn LedgerTransport>,
    me: AccountId,
    cursor: Option<LedgerPosition>,
    last_delivered: Arc<Mutex<Option<LedgerPosition>>>,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<MessageMetadata>,
    poll_interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    page_size: u32,
}

impl InboundSubscription {
    pub(crate) fn spawn(
        transport: Arc<dyn LedgerTransport>,
        me: AccountId,
        cursor: Option<LedgerPosition>,
        config: &LedgerAdapterConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let last_delivered = Arc::new(Mutex::new(cursor));
        let stop = Arc::new(AtomicBool::new(false));

        let poller = Poller {
            transport,
            me,
            cursor,
            last_delivered: last_delivered.clone(),
            stop: stop.clone(),
            tx,
            poll_interval: config.subscription_poll_interval,
            initial_backoff: config.reconnect.initial_backoff,
            max_backoff: config.reconnect.max_backoff,
            page_size: config.page_size.max(1),
        };
        let task = tokio::spawn(poller.run());

        Self { rx: ReceiverStream::new(rx), last_delivered, stop, task }
    }

    /// Position of the newest record handed to the consumer (or the
    /// starting cursor if nothing has been delivered yet).
    pub fn last_delivered(&self) -> Option<LedgerPosition> {
        *self.last_delivered.lock()
    }

    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.task.abort();
        self.rx.close();
    }
}

impl Stream for InboundSubscription {
    type Item = MessageMetadata;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for InboundSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Poller {
    async fn run(mut self) {
        info!(account = %self.me.short(), after = ?self.cursor, "inbound subscription started");
        let mut backoff = self.initial_backoff;

        while !self.stop.load(Ordering::SeqCst) && !self.tx.is_closed() {
            match self.poll_once().await {
                Ok(full_page) => {
                    backoff = self.initial_backoff;
                    if !full_page {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                Err(PollError::Closed) => break,
                Err(PollError::Transport(e)) => {
                    let dropped = LedgerError::SubscriptionDropped(e.to_string());
                    warn!(error = %dropped, retry_in = ?backoff, "reconnecting inbound subscription");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
        debug!(account = %self.me.short(), "inbound subscription stopped");
    }

    /// Returns whether a full page of new records arrived (more may be
    /// waiting). Records at or before the cursor do not count.
    async fn poll_once(&mut self) -> Result<bool, PollError> {
        let value = self
            .transport
            .inbound(&self.me, self.cursor, self.page_size)
            .await
            .map_err(PollError::Transport)?;
        let mut page: Vec<MetadataWire> =
            decode(value, "inbound").map_err(PollError::Transport)?;
        page.sort_by_key(|w| (w.block, w.index));

        let mut advanced = 0u32;
        for wire in page {
            let position = LedgerPosition::new(wire.block, wire.index);
            if self.cursor.map_or(false, |c| position <= c) {
                continue;
            }
            advanced += 1;
            // Advance past malformed records too, or they would be refetched forever.
            self.cursor = Some(position);
            let msg_id = wire.msg_id;
            match MessageMetadata::try_from(wire) {
                Ok(m) if m.receiver == self.me => {
                    self.tx.send(m).await.map_err(|_| PollError::Closed)?;
                    *self.last_delivered.lock() = Some(position);
                }
                Ok(_) => warn!(msg_id, "inbound record for another account skipped"),
                Err(e) => warn!(msg_id, error = %e, "malformed inbound record skipped"),
            }
        }
        Ok(advanced >= self.page_size)
    }
}

enum PollError {
    Closed,
    Transport(LedgerError),
}
