use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mp_chat::{ChatConfig, ChatError, Messenger, SendTicket};
use mp_crypto::{public_key_from_identity, AccountId, AccountKeyPair};
use mp_ipfs::{ContentStore, ContentStoreConfig, MemoryBackend};
use mp_ledger::{LedgerAdapter, LedgerAdapterConfig, LedgerError, MemoryLedger};
use mp_proto::{encrypt_content, MessageContent, PaddingMode, SessionId};
use mp_resilience::RetryConfig;
use mp_store::{ComposeState, LocalStore, MemoryStore, StoreError};

struct Network {
    content: Arc<MemoryBackend>,
    ledger: Arc<MemoryLedger>,
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    }
}

impl Network {
    fn new() -> Self {
        Self { content: Arc::new(MemoryBackend::new()), ledger: Arc::new(MemoryLedger::new()) }
    }

    fn join(&self, account: AccountKeyPair) -> Messenger {
        self.join_with_store(account, Arc::new(MemoryStore::new()))
    }

    fn join_with_store(&self, account: AccountKeyPair, store: Arc<dyn LocalStore>) -> Messenger {
        self.join_with(account, store, ChatConfig::default())
    }

    fn join_with(
        &self,
        account: AccountKeyPair,
        store: Arc<dyn LocalStore>,
        config: ChatConfig,
    ) -> Messenger {
        let content = ContentStore::new(
            self.content.clone(),
            ContentStoreConfig { retry: fast_retry(), ..Default::default() },
        );
        let ledger = LedgerAdapter::new(
            self.ledger.clone(),
            LedgerAdapterConfig {
                finality_poll_interval: Duration::from_millis(50),
                finality_timeout: Duration::from_secs(5),
                subscription_poll_interval: Duration::from_millis(100),
                reconnect: fast_retry(),
                retry: fast_retry(),
                ..Default::default()
            },
        );
        Messenger::new(account, content, ledger, store, &config)
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    refuse_writes: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(StoreError::VaultLocked);
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_with_expiry(key, value, expires_at).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn expire(&self, key: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.expire(key, at).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.sweep_expired(now).await
    }
}

fn text_of(content: &Option<MessageContent>) -> Option<&str> {
    match content {
        Some(MessageContent::Text { body }) => Some(body),
        _ => None,
    }
}

fn session_of(a: &Messenger, b: &Messenger) -> SessionId {
    SessionId::for_pair(a.me(), b.me())
}

#[tokio::test(start_paused = true)]
async fn hello_reaches_bob_and_counts_once_until_read() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());
    let session = session_of(&alice, &bob);

    let mut inbound = bob.subscribe_from(None);
    let sent = alice.send(bob.me(), MessageContent::text("hello")).await?;
    assert_eq!(sent.metadata.sender, *alice.me());
    assert_eq!(sent.metadata.receiver, *bob.me());
    assert!(sent.pin_warning().is_none());
    // Only ciphertext ever reaches the content store.
    assert_eq!(net.content.len(), 1);

    let received = tokio::time::timeout(Duration::from_secs(5), bob.receive_next(&mut inbound))
        .await?
        .expect("stream open")?;
    assert_eq!(text_of(&received.content), Some("hello"));
    assert_eq!(received.metadata.msg_id, sent.metadata.msg_id);
    assert_eq!(bob.unread_count(&session).await?, 1);

    // Seeing the same record again does not count it twice.
    bob.receive(received.metadata.clone()).await?;
    assert_eq!(bob.unread_count(&session).await?, 1);

    let record = bob.open_session(alice.me()).await?;
    assert_eq!(record.unread_count(), 0);
    assert_eq!(record.last_preview.as_deref(), Some("hello"));
    assert!(bob.with_timeline(&session, |tl| tl.messages().iter().all(|m| m.read)).unwrap_or(false));

    // The sender's own timeline has the decrypted message too.
    let mine = alice.with_timeline(&session, |tl| tl.newest().cloned()).flatten();
    assert_eq!(mine.as_ref().and_then(|m| text_of(&m.content)), Some("hello"));
    assert_eq!(alice.unread_count(&session).await?, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn message_sealed_for_someone_else_fails_authentication() -> anyhow::Result<()> {
    let net = Network::new();
    let alice_key = AccountKeyPair::generate();
    let alice_secret = alice_key.box_secret();
    let alice = net.join(alice_key);
    let bob = net.join(AccountKeyPair::generate());
    let carol: AccountId = AccountKeyPair::generate().account_id().clone();
    let session = session_of(&alice, &bob);

    let sent = alice.send(bob.me(), MessageContent::text("for bob")).await?;

    // Swap the body for one sealed to carol.
    let foreign = encrypt_content(
        &MessageContent::text("for carol"),
        &alice_secret,
        &public_key_from_identity(&carol)?,
        PaddingMode::Buckets,
    )?;
    net.content.corrupt(&sent.metadata.content_ref, foreign.to_wire());

    let err = bob.receive(sent.metadata.clone()).await.unwrap_err();
    assert!(err.is_decryption_failure(), "{err}");
    assert!(!err.is_transient());

    // Still listed, still unread, shown as undecrypted.
    assert_eq!(bob.unread_count(&session).await?, 1);
    let pending = bob.with_timeline(&session, |tl| tl.get(sent.metadata.msg_id).cloned()).flatten();
    assert!(pending.map_or(false, |m| m.content.is_none()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unavailable_network_fails_fast_without_side_effects() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());

    net.content.set_offline(true);
    let err = alice.send(bob.me(), MessageContent::text("anyone?")).await.unwrap_err();
    assert!(matches!(err, ChatError::ContentUnavailable));
    assert!(err.is_transient());
    assert_eq!(net.content.add_calls(), 0);
    assert_eq!(net.ledger.submit_calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn draft_send_clears_on_success_and_survives_failure() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());
    let session = alice.open_session(bob.me()).await?.id;

    alice.edit_draft(&session, "see you").await?;
    assert_eq!(alice.compose_state(&session).await, Some(ComposeState::Composing));
    let sent = alice.send_draft(&session, &SendTicket::new()).await?;
    assert_eq!(sent.metadata.session_id, session);
    assert_eq!(alice.compose_state(&session).await, Some(ComposeState::Idle));
    assert_eq!(alice.drafts().current(&session).await?, None);

    // Ledger rejection: terminal, draft preserved.
    alice.edit_draft(&session, "retry me").await?;
    net.ledger.reject_next("fee", "Inability to pay some fees");
    let err = alice.send_draft(&session, &SendTicket::new()).await.unwrap_err();
    assert!(matches!(err, ChatError::Ledger(_)));
    assert_eq!(alice.compose_state(&session).await, Some(ComposeState::Composing));
    assert_eq!(alice.drafts().current(&session).await?.as_deref(), Some("retry me"));
    assert_eq!(alice.drafts().load(&session).await?.as_deref(), Some("retry me"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_after_finality_timeout_anchors_once() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());
    let session = alice.open_session(bob.me()).await?.id;

    net.ledger.set_auto_finalize(false);
    alice.edit_draft(&session, "did it go through?").await?;
    let err = alice.send_draft(&session, &SendTicket::new()).await.unwrap_err();
    assert!(matches!(err, ChatError::Ledger(LedgerError::FinalityTimeout(_))), "{err}");
    assert!(err.is_transient());
    assert_eq!(alice.compose_state(&session).await, Some(ComposeState::Composing));

    net.ledger.finalize_all();
    let sent = alice.send_draft(&session, &SendTicket::new()).await?;
    assert_eq!(sent.metadata.session_id, session);
    assert_eq!(net.ledger.anchored_count(), 1);
    assert_eq!(net.ledger.submit_calls(), 1);
    assert_eq!(net.content.add_calls(), 1);
    assert_eq!(alice.drafts().current(&session).await?, None);

    // New content after a resolved send takes the normal path.
    alice.send(bob.me(), MessageContent::text("next")).await?;
    assert_eq!(net.ledger.anchored_count(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_draft_restore_does_not_mask_the_send_error() -> anyhow::Result<()> {
    let net = Network::new();
    let store = Arc::new(FlakyStore::default());
    let alice = net.join_with_store(AccountKeyPair::generate(), store.clone());
    let bob = net.join(AccountKeyPair::generate());
    let session = alice.open_session(bob.me()).await?.id;

    alice.edit_draft(&session, "offline words").await?;
    alice.drafts().flush(&session).await?;

    store.refuse_writes.store(true, Ordering::SeqCst);
    net.content.set_offline(true);
    let err = alice.send_draft(&session, &SendTicket::new()).await.unwrap_err();
    assert!(matches!(err, ChatError::ContentUnavailable), "{err}");
    assert_eq!(alice.compose_state(&session).await, Some(ComposeState::Composing));
    assert_eq!(alice.drafts().current(&session).await?.as_deref(), Some("offline words"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_send_never_reaches_the_ledger() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());
    let session = alice.open_session(bob.me()).await?.id;

    alice.edit_draft(&session, "never mind").await?;
    let ticket = SendTicket::new();
    assert!(ticket.cancel());
    let err = alice.send_draft(&session, &ticket).await.unwrap_err();
    assert!(matches!(err, ChatError::Cancelled));
    assert_eq!(net.ledger.submit_calls(), 0);
    assert_eq!(alice.compose_state(&session).await, Some(ComposeState::Composing));
    assert_eq!(alice.drafts().current(&session).await?.as_deref(), Some("never mind"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn backfill_then_live_stream_has_no_gap_or_replay() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());
    let session = session_of(&alice, &bob);

    for word in ["one", "two", "three"] {
        alice.send(bob.me(), MessageContent::text(word)).await?;
    }
    let history = bob.backfill(alice.me()).await?;
    assert_eq!(history.items.len(), 3);
    assert_eq!(history.cursor, history.items.last().map(|m| m.position));
    assert_eq!(bob.unread_count(&session).await?, 3);

    for m in &history.items {
        bob.receive(m.clone()).await?;
    }
    let texts: Vec<String> = bob
        .with_timeline(&session, |tl| {
            tl.messages().iter().filter_map(|m| text_of(&m.content).map(String::from)).collect()
        })
        .unwrap_or_default();
    assert_eq!(texts, vec!["one", "two", "three"]);

    let mut inbound = bob.subscribe_from(history.cursor);
    alice.send(bob.me(), MessageContent::text("four")).await?;
    let next = tokio::time::timeout(Duration::from_secs(5), bob.receive_next(&mut inbound))
        .await?
        .expect("stream open")?;
    assert_eq!(text_of(&next.content), Some("four"));
    assert_eq!(bob.unread_count(&session).await?, 4);

    let replay = tokio::time::timeout(Duration::from_secs(1), bob.receive_next(&mut inbound)).await;
    assert!(replay.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cached_history_survives_a_restart_without_hidden_messages() -> anyhow::Result<()> {
    let net = Network::new();
    let mut config = ChatConfig::default();
    config.store.cache.enabled = true;
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let bob_seed = [7u8; 32];

    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join_with(AccountKeyPair::from_bytes(&bob_seed)?, store.clone(), config.clone());
    let session = session_of(&alice, &bob);

    let mut ids = Vec::new();
    for word in ["one", "two", "three"] {
        ids.push(alice.send(bob.me(), MessageContent::text(word)).await?.metadata.msg_id);
    }
    assert!(bob.needs_sync(&session).await?);
    let history = bob.backfill(alice.me()).await?;
    assert!(!bob.needs_sync(&session).await?);
    for m in &history.items {
        bob.receive(m.clone()).await?;
    }
    assert_eq!(bob.unread_count(&session).await?, 3);

    assert_eq!(bob.mark_batch_read(&session, &ids[..2]).await?, 2);
    assert_eq!(bob.unread_count(&session).await?, 1);
    assert!(matches!(
        bob.mark_batch_read(&session, &[]).await,
        Err(ChatError::Store(StoreError::EmptyBatch))
    ));

    bob.hide_message(&session, ids[1]).await?;
    assert!(bob.with_timeline(&session, |tl| tl.get(ids[1]).is_none()).unwrap_or(false));
    bob.receive(history.items[1].clone()).await?;
    assert!(bob.with_timeline(&session, |tl| tl.get(ids[1]).is_none()).unwrap_or(false));
    assert_eq!(bob.search_cached(None, "THREE").await?.len(), 1);

    drop(bob);
    let bob = net.join_with(AccountKeyPair::from_bytes(&bob_seed)?, store, config);
    assert_eq!(bob.restore_cached(&session).await?, 2);
    let texts: Vec<String> = bob
        .with_timeline(&session, |tl| {
            tl.messages().iter().filter_map(|m| text_of(&m.content).map(String::from)).collect()
        })
        .unwrap_or_default();
    assert_eq!(texts, vec!["one", "three"]);
    assert_eq!(bob.unread_count(&session).await?, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn blocked_accounts_cannot_reach_us_and_we_cannot_reach_them() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());
    let session = session_of(&alice, &bob);

    let sent = alice.send(bob.me(), MessageContent::text("spam")).await?;
    bob.block(alice.me()).await?;
    assert!(bob.is_blocked(alice.me()).await?);
    assert!(matches!(bob.receive(sent.metadata.clone()).await, Err(ChatError::Blocked(_))));
    assert_eq!(bob.unread_count(&session).await?, 0);
    assert!(bob.with_timeline(&session, |tl| tl.len()).is_none());

    let submits = net.ledger.submit_calls();
    assert!(matches!(
        bob.send(alice.me(), MessageContent::text("go away")).await,
        Err(ChatError::Blocked(_))
    ));
    assert_eq!(net.ledger.submit_calls(), submits);
    assert!(matches!(bob.block(bob.me()).await, Err(ChatError::Store(StoreError::CannotBlockSelf))));

    assert!(bob.unblock(alice.me()).await?);
    bob.receive(sent.metadata).await?;
    assert_eq!(bob.unread_count(&session).await?, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sign_out_drops_the_key() -> anyhow::Result<()> {
    let net = Network::new();
    let alice = net.join(AccountKeyPair::generate());
    let bob = net.join(AccountKeyPair::generate());

    let sent = alice.send(bob.me(), MessageContent::text("bye")).await?;
    bob.sign_out().await?;
    assert!(!bob.is_signed_in());
    assert!(matches!(bob.receive(sent.metadata).await, Err(ChatError::SignedOut)));
    assert!(matches!(
        bob.send(alice.me(), MessageContent::text("x")).await,
        Err(ChatError::SignedOut)
    ));
    Ok(())
}

#[tokio::test]
async fn connected_store_is_locked_after_sign_out() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = ChatConfig::default();
    config.store.db_path = dir.path().join("chat.db");
    config.ipfs.gateways = vec!["http://127.0.0.1:9".into()];

    let messenger = Messenger::connect(&config, AccountKeyPair::generate()).await?;
    let peer = AccountKeyPair::generate().account_id().clone();
    let session = SessionId::for_pair(messenger.me(), &peer);

    messenger.drafts().restore(&session, "typed offline").await?;
    assert_eq!(messenger.drafts().load(&session).await?.as_deref(), Some("typed offline"));

    messenger.sign_out().await?;
    let err = messenger.drafts().load(&session).await.unwrap_err();
    assert!(matches!(err, StoreError::VaultLocked));
    Ok(())
}
