use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use mp_crypto::{AccountId, AccountKeyPair};
use mp_proto::{
    ContentRef, DraftRecord, LedgerPosition, Message, MessageContent, MessageKind, MessageMetadata,
    Participants, SessionId,
};
use mp_store::draft::draft_key;
use mp_store::{
    BlockList, CacheConfig, ComposeState, Composer, DraftConfig, DraftManager, ExpirySweeper,
    LocalStore, MemoryStore, MessageCache, SessionManager, SqliteStore, StoreError, Vault,
};

fn pair() -> (AccountId, AccountId, SessionId) {
    let a = AccountKeyPair::generate().account_id().clone();
    let b = AccountKeyPair::generate().account_id().clone();
    let id = SessionId::for_pair(&a, &b);
    (a, b, id)
}

fn drafts(store: Arc<MemoryStore>) -> DraftManager {
    DraftManager::new(store, DraftConfig::default())
}

fn metadata(
    msg_id: u64,
    from: &AccountId,
    to: &AccountId,
    sent_at: DateTime<Utc>,
    block: u64,
) -> MessageMetadata {
    MessageMetadata {
        msg_id,
        session_id: SessionId::for_pair(from, to),
        sender: from.clone(),
        receiver: to.clone(),
        content_ref: ContentRef::new(format!("bafkreistore{msg_id}")).unwrap(),
        kind: MessageKind::Text,
        sent_at,
        position: LedgerPosition::new(block, 0),
    }
}

// ── Drafts ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn edits_are_debounced() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, session) = pair();

    drafts.edit(&session, "h");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.get(&draft_key(&session)).await?.is_none());

    // A second edit restarts the quiet period.
    drafts.edit(&session, "hello");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.get(&draft_key(&session)).await?.is_none());
    assert_eq!(drafts.current(&session).await?.as_deref(), Some("hello"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!drafts.has_pending(&session));
    assert_eq!(drafts.load(&session).await?.as_deref(), Some("hello"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn flush_writes_immediately() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, s1) = pair();
    let (_, _, s2) = pair();

    drafts.edit(&s1, "one");
    drafts.edit(&s2, "two");
    drafts.flush(&s1).await?;
    assert_eq!(drafts.load(&s1).await?.as_deref(), Some("one"));
    assert!(drafts.has_pending(&s2));

    drafts.flush_all().await?;
    assert_eq!(drafts.load(&s2).await?.as_deref(), Some("two"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_edit_removes_draft() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, session) = pair();

    drafts.restore(&session, "keep me").await?;
    assert!(store.get(&draft_key(&session)).await?.is_some());
    drafts.edit(&session, "");
    drafts.flush(&session).await?;
    assert!(store.get(&draft_key(&session)).await?.is_none());
    assert_eq!(drafts.current(&session).await?, None);
    Ok(())
}

#[tokio::test]
async fn draft_within_ttl_round_trips_and_expired_is_removed() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, session) = pair();

    let fresh = DraftRecord {
        session_id: session.clone(),
        text: "see you at 8".into(),
        saved_at: Utc::now() - chrono::Duration::hours(23),
    };
    store.set(&draft_key(&session), &serde_json::to_string(&fresh)?).await?;
    assert_eq!(drafts.load(&session).await?.as_deref(), Some("see you at 8"));

    let stale = DraftRecord { saved_at: Utc::now() - chrono::Duration::hours(25), ..fresh };
    store.set(&draft_key(&session), &serde_json::to_string(&stale)?).await?;
    assert_eq!(drafts.load(&session).await?, None);
    assert!(store.get(&draft_key(&session)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn store_expired_draft_is_removed_on_load() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = DraftManager::new(
        store.clone(),
        DraftConfig { ttl: Duration::from_millis(50), ..Default::default() },
    );
    let (_, _, session) = pair();

    drafts.edit(&session, "gone soon");
    drafts.flush(&session).await?;
    assert_eq!(store.len(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(drafts.load(&session).await?, None);
    assert_eq!(store.len(), 0);
    Ok(())
}

#[tokio::test]
async fn corrupt_draft_is_dropped() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, session) = pair();

    store.set(&draft_key(&session), "{not json").await?;
    assert_eq!(drafts.load(&session).await?, None);
    assert!(store.is_empty());
    Ok(())
}

#[tokio::test]
async fn drafts_survive_reopen_of_sqlite_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("local.db");
    let account = AccountKeyPair::generate();
    let (_, _, session) = pair();

    {
        let vault = Vault::new();
        vault.unlock_for(&account).await?;
        let store = Arc::new(SqliteStore::open(&path, vault).await?);
        let drafts = DraftManager::new(store.clone(), DraftConfig::default());
        drafts.restore(&session, "unsent thought").await?;
        store.close().await;
    }

    let vault = Vault::new();
    vault.unlock_for(&account).await?;
    let store = Arc::new(SqliteStore::open(&path, vault).await?);
    let drafts = DraftManager::new(store, DraftConfig::default());
    assert_eq!(drafts.current(&session).await?.as_deref(), Some("unsent thought"));
    Ok(())
}

#[tokio::test]
async fn draft_under_another_key_is_treated_as_corrupt() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("local.db");
    let (_, _, session) = pair();

    {
        let vault = Vault::new();
        vault.unlock_for(&AccountKeyPair::generate()).await?;
        let store = Arc::new(SqliteStore::open(&path, vault).await?);
        DraftManager::new(store.clone(), DraftConfig::default())
            .restore(&session, "theirs")
            .await?;
        store.close().await;
    }

    let vault = Vault::new();
    vault.unlock_for(&AccountKeyPair::generate()).await?;
    let store = Arc::new(SqliteStore::open(&path, vault).await?);
    let drafts = DraftManager::new(store.clone(), DraftConfig::default());
    assert_eq!(drafts.load(&session).await?, None);
    assert!(store.keys_with_prefix("draft:").await?.is_empty());
    Ok(())
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unread_counts_inbound_once_until_read() -> anyhow::Result<()> {
    let sessions = SessionManager::new(Arc::new(MemoryStore::new()));
    let (alice, bob, id) = pair();
    let t0 = Utc::now();

    let inbound = metadata(1, &alice, &bob, t0, 10);
    let record = sessions.incorporate(&inbound, &bob, Some("hello")).await?;
    assert_eq!(record.unread_count(), 1);
    assert_eq!(record.last_preview.as_deref(), Some("hello"));

    // Replays change nothing.
    sessions.incorporate(&inbound, &bob, Some("hello")).await?;
    assert_eq!(sessions.unread_count(&id).await?, 1);

    // Outgoing messages never count.
    let reply = metadata(2, &bob, &alice, t0 + chrono::Duration::seconds(5), 11);
    sessions.incorporate(&reply, &bob, Some("hi back")).await?;
    assert_eq!(sessions.unread_count(&id).await?, 1);

    sessions.mark_read(&id, 1).await?;
    assert_eq!(sessions.unread_count(&id).await?, 0);

    let record = sessions.get(&id).await?.unwrap();
    assert_eq!(record.last_preview.as_deref(), Some("hi back"));
    assert_eq!(record.last_activity_at, t0 + chrono::Duration::seconds(5));
    Ok(())
}

#[tokio::test]
async fn viewing_a_session_keeps_it_read() -> anyhow::Result<()> {
    let sessions = SessionManager::new(Arc::new(MemoryStore::new()));
    let (alice, bob, id) = pair();
    let t0 = Utc::now();

    sessions.incorporate(&metadata(1, &alice, &bob, t0, 1), &bob, None).await?;
    sessions.incorporate(&metadata(2, &alice, &bob, t0, 2), &bob, None).await?;
    assert_eq!(sessions.unread_count(&id).await?, 2);

    sessions.enter_timeline(&id).await?;
    assert_eq!(sessions.unread_count(&id).await?, 0);
    sessions.incorporate(&metadata(3, &alice, &bob, t0, 3), &bob, None).await?;
    assert_eq!(sessions.unread_count(&id).await?, 0);

    sessions.leave_timeline(&id);
    assert_eq!(sessions.viewing(), None);
    sessions.incorporate(&metadata(4, &alice, &bob, t0, 4), &bob, None).await?;
    assert_eq!(sessions.unread_count(&id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn out_of_order_inbound_is_counted_once() -> anyhow::Result<()> {
    let sessions = SessionManager::new(Arc::new(MemoryStore::new()));
    let (alice, bob, id) = pair();
    let t0 = Utc::now();

    let later = metadata(2, &alice, &bob, t0, 20);
    let earlier = metadata(1, &alice, &bob, t0 - chrono::Duration::seconds(5), 10);
    sessions.incorporate(&later, &bob, None).await?;
    sessions.incorporate(&earlier, &bob, None).await?;
    assert_eq!(sessions.unread_count(&id).await?, 2);

    sessions.incorporate(&later, &bob, None).await?;
    sessions.incorporate(&earlier, &bob, None).await?;
    assert_eq!(sessions.unread_count(&id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn read_state_survives_a_restart() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob, id) = pair();
    let t0 = Utc::now();
    let first = metadata(1, &alice, &bob, t0, 1);
    let second = metadata(2, &alice, &bob, t0, 2);

    let sessions = SessionManager::new(store.clone());
    sessions.incorporate(&first, &bob, None).await?;
    sessions.incorporate(&second, &bob, None).await?;
    sessions.mark_read(&id, 1).await?;
    // Read before it ever arrived.
    sessions.mark_read(&id, 3).await?;
    drop(sessions);

    let restarted = SessionManager::new(store);
    restarted.incorporate(&first, &bob, None).await?;
    restarted.incorporate(&second, &bob, None).await?;
    restarted.incorporate(&metadata(3, &alice, &bob, t0, 3), &bob, None).await?;
    assert_eq!(restarted.unread_count(&id).await?, 1);

    assert_eq!(restarted.mark_batch_read(&id, &[2, 3]).await?, 1);
    assert_eq!(restarted.unread_count(&id).await?, 0);
    assert!(matches!(restarted.mark_batch_read(&id, &[]).await, Err(StoreError::EmptyBatch)));
    Ok(())
}

#[tokio::test]
async fn older_message_does_not_roll_back_activity() -> anyhow::Result<()> {
    let sessions = SessionManager::new(Arc::new(MemoryStore::new()));
    let (alice, bob, id) = pair();
    let t0 = Utc::now();

    sessions.incorporate(&metadata(2, &alice, &bob, t0, 5), &bob, Some("newer")).await?;
    sessions
        .incorporate(&metadata(1, &bob, &alice, t0 - chrono::Duration::minutes(3), 4), &bob, Some("older"))
        .await?;
    let record = sessions.get(&id).await?.unwrap();
    assert_eq!(record.last_activity_at, t0);
    assert_eq!(record.last_preview.as_deref(), Some("newer"));
    Ok(())
}

#[tokio::test]
async fn list_is_recent_first_and_hides_archived() -> anyhow::Result<()> {
    let sessions = SessionManager::new(Arc::new(MemoryStore::new()));
    let me = AccountKeyPair::generate().account_id().clone();
    let peers: Vec<AccountId> =
        (0..3).map(|_| AccountKeyPair::generate().account_id().clone()).collect();
    let t0 = Utc::now();

    for (i, peer) in peers.iter().enumerate() {
        let at = t0 + chrono::Duration::minutes(i as i64);
        sessions.incorporate(&metadata(i as u64, peer, &me, at, i as u64), &me, None).await?;
    }
    let listed: Vec<SessionId> = sessions.list().await?.into_iter().map(|r| r.id).collect();
    let expected: Vec<SessionId> =
        peers.iter().rev().map(|p| SessionId::for_pair(&me, p)).collect();
    assert_eq!(listed, expected);

    sessions.archive(&expected[0]).await?;
    let listed = sessions.list().await?;
    assert_eq!(listed.len(), 2);
    assert!(sessions.get(&expected[0]).await?.is_some());

    let (_, _, unknown) = pair();
    assert!(matches!(sessions.archive(&unknown).await, Err(StoreError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn open_or_create_is_lazy_and_stable() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionManager::new(store.clone());
    let (alice, bob, id) = pair();
    let participants = Participants::new(alice, bob)?;

    assert!(sessions.get(&id).await?.is_none());
    let first = sessions.open_or_create(&participants).await?;
    let second = sessions.open_or_create(&participants).await?;
    assert_eq!(first.id, id);
    assert_eq!(first, second);
    assert_eq!(store.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stranger_metadata_is_refused() {
    let sessions = SessionManager::new(Arc::new(MemoryStore::new()));
    let (alice, bob, _) = pair();
    let carol = AccountKeyPair::generate().account_id().clone();
    let err = sessions
        .incorporate(&metadata(1, &alice, &bob, Utc::now(), 1), &carol, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotParticipant(_)));
}

// ── Compose state ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn compose_happy_path_clears_draft() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, session) = pair();
    let mut composer = Composer::open(session.clone(), drafts.clone()).await?;
    assert_eq!(composer.state(), ComposeState::Idle);
    assert!(composer.begin_send().await.is_err());

    composer.edit("hel")?;
    composer.edit("hello")?;
    assert_eq!(composer.state(), ComposeState::Composing);

    let text = composer.begin_send().await?;
    assert_eq!(text, "hello");
    assert_eq!(composer.state(), ComposeState::Sending);
    assert!(matches!(composer.edit("x"), Err(StoreError::InvalidTransition { .. })));
    // Persisted before the network is touched.
    assert!(store.get(&draft_key(&session)).await?.is_some());

    composer.send_succeeded().await?;
    assert_eq!(composer.state(), ComposeState::Idle);
    assert_eq!(drafts.current(&session).await?, None);
    assert!(store.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_or_cancelled_send_restores_draft() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let drafts = drafts(store.clone());
    let (_, _, session) = pair();
    let mut composer = Composer::open(session.clone(), drafts.clone()).await?;

    composer.edit("try again")?;
    composer.begin_send().await?;
    composer.send_failed().await?;
    assert_eq!(composer.state(), ComposeState::Composing);
    assert_eq!(drafts.load(&session).await?.as_deref(), Some("try again"));

    composer.begin_send().await?;
    composer.cancel_send().await?;
    assert_eq!(composer.state(), ComposeState::Composing);
    assert_eq!(drafts.current(&session).await?.as_deref(), Some("try again"));

    // A composer reopened later picks the draft back up.
    let reopened = Composer::open(session, drafts).await?;
    assert_eq!(reopened.state(), ComposeState::Composing);
    Ok(())
}

// ── Sweeper ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sweeper_removes_expired_until_stopped() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let past = Utc::now() - chrono::Duration::seconds(1);
    store.set_with_expiry("draft:old", "{}", past).await?;
    store.set("session:keep", "{}").await?;

    let mut sweeper = ExpirySweeper::new(store.clone(), Duration::from_secs(60));
    sweeper.start();
    assert!(sweeper.is_running());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.len(), 1);

    sweeper.stop();
    assert!(!sweeper.is_running());
    store.set_with_expiry("draft:later", "{}", past).await?;
    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(store.len(), 2);
    Ok(())
}

// ── Message cache ────────────────────────────────────────────────────────────

fn cache_on(store: Arc<MemoryStore>, ttl: Duration) -> MessageCache {
    MessageCache::new(store, CacheConfig { enabled: true, ttl, ..Default::default() })
}

fn said(msg_id: u64, from: &AccountId, to: &AccountId, block: u64, body: &str) -> Message {
    Message::decrypted(metadata(msg_id, from, to, Utc::now(), block), MessageContent::text(body))
}

#[tokio::test]
async fn disabled_cache_stores_nothing() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cache = MessageCache::new(store.clone(), CacheConfig::default());
    let (alice, bob, id) = pair();

    assert_eq!(cache.cache_messages(&[said(1, &alice, &bob, 1, "hi")]).await?, 0);
    assert!(store.is_empty());
    assert!(cache.cached_messages(&id).await?.is_empty());
    assert!(cache.needs_sync(&id).await?);
    Ok(())
}

#[tokio::test]
async fn cached_messages_come_back_in_ledger_order() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_on(store.clone(), Duration::from_secs(3600));
    let (alice, bob, id) = pair();

    cache
        .cache_messages(&[
            said(3, &alice, &bob, 30, "Dinner at eight?"),
            said(1, &alice, &bob, 10, "hello"),
            said(2, &bob, &alice, 20, "hi, what's up"),
        ])
        .await?;
    let ids: Vec<u64> = cache.cached_messages(&id).await?.iter().map(Message::id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    // A pending copy does not wipe decrypted content.
    cache.cache_messages(&[Message::pending(metadata(1, &alice, &bob, Utc::now(), 10))]).await?;
    assert!(cache.cached_messages(&id).await?[0].content.is_some());

    assert!(cache.mark_read(&id, 1).await?);
    assert!(cache.hide(&id, 2).await?);
    assert!(!cache.hide(&id, 99).await?);
    let visible = cache.cached_messages(&id).await?;
    assert_eq!(visible.iter().map(Message::id).collect::<Vec<_>>(), vec![1, 3]);
    assert!(visible[0].read);

    let hits = cache.search(Some(&id), "DINNER").await?;
    assert_eq!(hits.iter().map(Message::id).collect::<Vec<_>>(), vec![3]);
    assert!(cache.search(None, "what's up").await?.is_empty());
    assert!(cache.search(None, "  ").await?.is_empty());

    assert!(cache.needs_sync(&id).await?);
    cache.mark_synced(&id).await?;
    assert!(!cache.needs_sync(&id).await?);

    assert_eq!(cache.clear_session(&id).await?, 3);
    assert!(cache.cached_messages(&id).await?.is_empty());
    assert!(cache.needs_sync(&id).await?);
    Ok(())
}

#[tokio::test]
async fn old_cache_entries_are_swept() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_on(store.clone(), Duration::from_millis(50));
    let (alice, bob, id) = pair();

    cache.cache_messages(&[said(1, &alice, &bob, 1, "short-lived")]).await?;
    assert_eq!(cache.cached_messages(&id).await?.len(), 1);

    let mut sweeper = ExpirySweeper::new(store.clone(), Duration::from_millis(20));
    sweeper.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    sweeper.stop();
    assert!(store.is_empty());
    assert!(cache.cached_messages(&id).await?.is_empty());
    Ok(())
}

// ── Block list ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn block_list_round_trip() -> anyhow::Result<()> {
    let (alice, bob, _) = pair();
    let blocks = BlockList::new(Arc::new(MemoryStore::new()), alice.clone());

    assert!(matches!(blocks.block(&alice).await, Err(StoreError::CannotBlockSelf)));
    blocks.block(&bob).await?;
    assert!(blocks.is_blocked(&bob).await?);
    let listed = blocks.list().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, bob);
    assert!(listed[0].1.is_some());

    assert!(blocks.unblock(&bob).await?);
    assert!(!blocks.unblock(&bob).await?);
    assert!(!blocks.is_blocked(&bob).await?);
    Ok(())
}

#[tokio::test]
async fn hidden_message_is_read_and_stays_hidden() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionManager::new(store.clone());
    let (alice, bob, id) = pair();
    let inbound = metadata(1, &alice, &bob, Utc::now(), 1);

    sessions.incorporate(&inbound, &bob, None).await?;
    assert!(sessions.hide_message(&id, 1).await?);
    assert!(!sessions.hide_message(&id, 1).await?);
    assert_eq!(sessions.unread_count(&id).await?, 0);

    let restarted = SessionManager::new(store);
    restarted.incorporate(&inbound, &bob, None).await?;
    assert!(restarted.is_hidden(&id, 1).await?);
    assert_eq!(restarted.unread_count(&id).await?, 0);
    Ok(())
}
