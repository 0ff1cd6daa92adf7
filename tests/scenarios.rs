//! End-to-end mailbox scenarios against a scripted remote source

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mailbox_sync::sync::db::{MutationDatabase, PersistedMutationLog};
use mailbox_sync::{
    init_logging, merge, reconcile, Folder, Mailbox, MailboxConfig, MailboxEvent,
    MemoryMutationLog, MutationKind, MutationSetStore, PersistenceAdapter, RemoteItem,
    RemoteSource, SqliteMutationLog, SyncError, ViewFilter,
};
use tokio::sync::Notify;

/// Remote that serves whatever list the test sets and fails chosen ids
#[derive(Default)]
struct FakeRemote {
    items: Mutex<Vec<RemoteItem>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(MutationKind, String)>>,
}

impl FakeRemote {
    fn with_items(items: Vec<RemoteItem>) -> Arc<Self> {
        let remote = Self::default();
        *remote.items.lock().unwrap() = items;
        Arc::new(remote)
    }

    fn set_items(&self, items: Vec<RemoteItem>) {
        *self.items.lock().unwrap() = items;
    }

    fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    fn calls(&self) -> Vec<(MutationKind, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, id: &str, kind: MutationKind) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push((kind, id.to_string()));
        if self.failing.lock().unwrap().contains(id) {
            return Err(SyncError::Network(format!("{} {} failed", kind, id)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn fetch_list(&self) -> Result<Vec<RemoteItem>, SyncError> {
        Ok(self.items.lock().unwrap().clone())
    }

    async fn mark_read(&self, id: &str) -> Result<(), SyncError> {
        self.call(id, MutationKind::MarkRead)
    }

    async fn star(&self, id: &str) -> Result<(), SyncError> {
        self.call(id, MutationKind::Star)
    }

    async fn unstar(&self, id: &str) -> Result<(), SyncError> {
        self.call(id, MutationKind::Unstar)
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.call(id, MutationKind::Delete)
    }

    async fn archive(&self, id: &str) -> Result<(), SyncError> {
        self.call(id, MutationKind::Archive)
    }
}

/// Remote whose list fetch can be held open until the test releases it
struct GatedRemote {
    items: Vec<RemoteItem>,
    gate: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedRemote {
    fn new(items: Vec<RemoteItem>) -> Arc<Self> {
        Arc::new(Self {
            items,
            gate: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl RemoteSource for GatedRemote {
    async fn fetch_list(&self) -> Result<Vec<RemoteItem>, SyncError> {
        let snapshot = self.items.clone();
        if self.gate.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(snapshot)
    }

    async fn mark_read(&self, _id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn star(&self, _id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn unstar(&self, _id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn archive(&self, _id: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

fn config() -> MailboxConfig {
    MailboxConfig {
        confirm_refresh_delay_ms: None,
        ..MailboxConfig::default()
    }
}

async fn mailbox_with(remote: Arc<FakeRemote>) -> Mailbox {
    init_logging();
    let mailbox = Mailbox::open(
        "tech@example.com",
        remote,
        Arc::new(MemoryMutationLog::new()),
        config(),
    );
    mailbox.refresh().await.expect("initial refresh");
    mailbox
}

fn ids(views: &[mailbox_sync::MergedView]) -> Vec<&str> {
    views.iter().map(|v| v.id.as_str()).collect()
}

#[tokio::test]
async fn star_then_refresh_confirms() {
    let remote = FakeRemote::with_items(vec![RemoteItem::new("e1", false, false)]);
    let mailbox = mailbox_with(remote.clone()).await;

    mailbox.apply("e1", MutationKind::Star).await.unwrap();

    assert!(mailbox.merged().await[0].starred);
    let pending = mailbox.pending().await;
    assert_eq!(pending.ids(MutationKind::Star).collect::<Vec<_>>(), vec!["e1"]);

    remote.set_items(vec![RemoteItem::new("e1", false, true)]);
    let summary = mailbox.refresh().await.unwrap();

    assert_eq!(summary.retired, 1);
    assert_eq!(mailbox.pending().await.len(MutationKind::Star), 0);
    let merged = mailbox.merged().await;
    assert!(merged[0].starred);
    assert!(!merged[0].pending);
}

#[tokio::test]
async fn delete_then_refresh() {
    let remote = FakeRemote::with_items(vec![
        RemoteItem::new("e1", true, false),
        RemoteItem::new("e2", true, false),
    ]);
    let mailbox = mailbox_with(remote.clone()).await;

    mailbox.apply("e1", MutationKind::Delete).await.unwrap();

    assert_eq!(ids(&mailbox.merged().await), vec!["e2"]);
    assert!(mailbox.is_pending("e1", MutationKind::Delete).await);

    remote.set_items(vec![RemoteItem::new("e2", true, false)]);
    mailbox.refresh().await.unwrap();

    assert_eq!(mailbox.pending().await.len(MutationKind::Delete), 0);
    assert_eq!(ids(&mailbox.merged().await), vec!["e2"]);
}

#[tokio::test]
async fn batch_mark_read_with_one_failure_reverts_all() {
    let remote = FakeRemote::with_items(vec![
        RemoteItem::new("e1", true, false),
        RemoteItem::new("e2", true, false),
    ]);
    let mailbox = mailbox_with(remote.clone()).await;
    let events = mailbox.subscribe();
    remote.fail_for("e2");

    let batch = vec!["e1".to_string(), "e2".to_string()];
    let outcome = mailbox.apply_batch(&batch, MutationKind::MarkRead).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.succeeded, vec!["e1".to_string()]);
    assert_eq!(outcome.reverted, batch);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].0, "e2");

    let merged = mailbox.merged().await;
    assert!(merged.iter().all(|v| v.unread));
    assert!(mailbox.pending().await.is_empty());

    let received: Vec<MailboxEvent> = events.try_iter().collect();
    assert!(matches!(
        received.first(),
        Some(MailboxEvent::Applied { kind: MutationKind::MarkRead, ids }) if ids.len() == 2
    ));
    assert!(received.iter().any(|e| matches!(
        e,
        MailboxEvent::Reverted { ids, .. } if ids.len() == 2
    )));
    assert_eq!(
        remote.calls(),
        vec![
            (MutationKind::MarkRead, "e1".to_string()),
            (MutationKind::MarkRead, "e2".to_string()),
        ]
    );
}

#[tokio::test]
async fn mutation_during_refresh_is_not_clobbered() {
    let remote = GatedRemote::new(vec![RemoteItem::new("e1", true, false)]);
    let mailbox = Mailbox::open(
        "tech@example.com",
        remote.clone(),
        Arc::new(MemoryMutationLog::new()),
        config(),
    );
    mailbox.refresh().await.unwrap();

    remote.gate.store(true, Ordering::SeqCst);
    let refreshing = tokio::spawn({
        let mailbox = mailbox.clone();
        async move { mailbox.refresh().await }
    });

    // The fetch is parked with the server still reporting e1 as unread
    remote.entered.notified().await;
    mailbox.apply("e1", MutationKind::MarkRead).await.unwrap();
    assert!(!mailbox.merged().await[0].unread);

    remote.release.notify_one();
    let summary = refreshing.await.unwrap().unwrap();

    assert_eq!(summary.retired, 0);
    assert!(mailbox.is_pending("e1", MutationKind::MarkRead).await);
    assert!(!mailbox.merged().await[0].unread);
    assert!(mailbox.remote_items().await[0].unread);
}

#[tokio::test]
async fn single_failure_reverts_view_immediately() {
    let remote = FakeRemote::with_items(vec![RemoteItem::new("e1", true, false)]);
    let mailbox = mailbox_with(remote.clone()).await;
    remote.fail_for("e1");

    let err = mailbox.apply("e1", MutationKind::Archive).await.unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(ids(&mailbox.merged().await), vec!["e1"]);
    assert!(mailbox.pending().await.is_empty());
}

#[tokio::test]
async fn pending_mutations_survive_restart() {
    let db = Arc::new(MutationDatabase::in_memory().unwrap());
    let remote = FakeRemote::with_items(vec![
        RemoteItem::new("e1", true, false),
        RemoteItem::new("e2", true, true),
    ]);

    {
        let log = Arc::new(SqliteMutationLog::new(db.clone(), "tech@example.com"));
        let mailbox = Mailbox::open("tech@example.com", remote.clone(), log, config());
        mailbox.refresh().await.unwrap();
        mailbox.apply("e1", MutationKind::MarkRead).await.unwrap();
        mailbox.apply("e2", MutationKind::Unstar).await.unwrap();
    }

    let log = Arc::new(SqliteMutationLog::new(db, "tech@example.com"));
    let mailbox = Mailbox::open("tech@example.com", remote, log, config());
    mailbox.refresh().await.unwrap();

    let merged = mailbox.merged().await;
    assert!(!merged[0].unread);
    assert!(!merged[1].starred);
}

#[tokio::test]
async fn view_filters_apply_to_merged_state() {
    let mut e1 = RemoteItem::new("e1", true, false);
    e1.subject = "Crew schedule".to_string();
    let mut e2 = RemoteItem::new("e2", true, false);
    e2.subject = "Parts backorder".to_string();
    e2.labels = vec!["suppliers".to_string()];

    let remote = FakeRemote::with_items(vec![e1, e2]);
    let mailbox = mailbox_with(remote).await;

    mailbox.apply("e1", MutationKind::Star).await.unwrap();
    mailbox.apply("e2", MutationKind::MarkRead).await.unwrap();

    let starred = mailbox.view(&ViewFilter::folder(Folder::Starred)).await;
    assert_eq!(ids(&starred), vec!["e1"]);

    let unread = mailbox.view(&ViewFilter::folder(Folder::Unread)).await;
    assert_eq!(ids(&unread), vec!["e1"]);

    let search = mailbox
        .view(&ViewFilter::folder(Folder::parse("suppliers")).with_search("BACKORDER"))
        .await;
    assert_eq!(ids(&search), vec!["e2"]);

    let counts = mailbox.counts().await;
    assert_eq!((counts.inbox, counts.unread, counts.starred), (2, 1, 1));
}

#[test]
fn merge_and_reconcile_properties() {
    let remote = vec![
        RemoteItem::new("a", true, false),
        RemoteItem::new("b", false, true),
        RemoteItem::new("c", true, true),
        RemoteItem::new("d", false, false),
    ];

    let mut sets = MutationSetStore::new();
    sets.apply("a", MutationKind::MarkRead);
    sets.apply("b", MutationKind::Unstar);
    sets.apply("c", MutationKind::Delete);
    sets.apply("d", MutationKind::Star);
    sets.apply("d", MutationKind::MarkRead);
    sets.apply("x", MutationKind::Archive);

    let merged = merge(&remote, &sets);

    // Hidden ids never appear; every other id appears exactly once
    assert_eq!(ids(&merged), vec!["a", "b", "d"]);
    assert!(!merged[0].unread);
    assert!(!merged[1].starred);
    assert!(merged[2].starred);

    let reconciled = reconcile(&remote, &sets);
    assert!(reconciled.is_subset_of(&sets));
    // d is already read remotely; x is gone remotely
    assert!(!reconciled.contains(MutationKind::MarkRead, "d"));
    assert!(!reconciled.contains(MutationKind::Archive, "x"));
    assert!(reconciled.contains(MutationKind::MarkRead, "a"));
    assert!(reconciled.contains(MutationKind::Delete, "c"));
}

#[test]
fn persistence_round_trip() {
    let mut store = MutationSetStore::new();
    store.apply("a", MutationKind::MarkRead);
    store.apply("b", MutationKind::Star);
    store.apply("c", MutationKind::Unstar);
    store.apply("d", MutationKind::Delete);
    store.apply("e", MutationKind::Archive);

    let log = MemoryMutationLog::new();
    let payload = PersistedMutationLog::from_store("tech@example.com", &store)
        .to_json()
        .unwrap();
    log.save(&payload).unwrap();

    let loaded = PersistedMutationLog::from_json(&log.load().unwrap().unwrap())
        .unwrap()
        .into_store();
    assert_eq!(loaded, store);
}
