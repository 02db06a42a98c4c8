//! Integration tests for incremental sync: paging, filtering, decryption
//! failures, progress reporting and watermark persistence.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fieldcase_db::crypto::{encrypt, KdfParams, MasterKey};
use fieldcase_db::storage::{
    collection, CacheEpochGuard, CacheOptions, CacheStore, CollectionSchema, ColumnType,
    DbConfig, DbHandle, MemoryBootStore,
};
use fieldcase_db::sync::{
    PageRequest, RemotePage, RemoteRecord, RemoteSource, SyncEngine, SyncManager, SyncOptions,
    SyncProgress, SyncTransportError,
};
use fieldcase_db::{Error, Session, SessionError, SyncError};
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

const KEY: [u8; 32] = [9u8; 32];

fn session() -> Arc<Session> {
    Arc::new(Session::from_master_key(MasterKey::from_bytes(KEY)))
}

fn sealed(id: &str, updated_at: i64, name: &str) -> RemoteRecord {
    let payload = encrypt(
        &json!({ "name": name }).to_string(),
        None,
        &MasterKey::from_bytes(KEY),
    )
    .unwrap();
    RemoteRecord {
        id: id.into(),
        updated_at,
        deleted: false,
        encrypted_content: Some(payload.encrypted_content),
        encrypted_entity_key: Some(payload.encrypted_entity_key),
    }
}

fn tombstone(id: &str, updated_at: i64) -> RemoteRecord {
    RemoteRecord {
        id: id.into(),
        updated_at,
        deleted: true,
        encrypted_content: None,
        encrypted_entity_key: None,
    }
}

fn people() -> CollectionSchema {
    collection("people")
        .column("name", ColumnType::Text)
        .column("updated_at", ColumnType::Integer)
        .build()
        .unwrap()
}

/// Replays canned responses in order and records every request.
struct ScriptedRemote {
    responses: Mutex<VecDeque<Result<RemotePage, SyncTransportError>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedRemote {
    fn new(responses: Vec<Result<RemotePage, SyncTransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RemotePage, SyncTransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RemotePage::ok(Vec::new())))
    }
}

/// Serves from a record set the way the remote API does.
struct ServerRemote {
    records: Mutex<Vec<RemoteRecord>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ServerRemote {
    fn new(records: Vec<RemoteRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn afters(&self) -> Vec<i64> {
        self.requests.lock().unwrap().iter().map(|r| r.after).collect()
    }

    fn put(&self, record: RemoteRecord) {
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r.id != record.id);
        records.push(record);
    }
}

#[async_trait]
impl RemoteSource for ServerRemote {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RemotePage, SyncTransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut matching: Vec<RemoteRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.updated_at > request.after && (request.with_deleted || !r.deleted))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        matching.truncate(request.batch);
        Ok(RemotePage::ok(matching))
    }
}

async fn manager(remote: Arc<dyn RemoteSource>, options: SyncOptions) -> SyncManager {
    let db = DbHandle::open(DbConfig::InMemory);
    let ready = CacheEpochGuard::default()
        .run(&db, &MemoryBootStore::new())
        .await
        .unwrap();
    let cache = CacheStore::new(db, ready, CacheOptions::default())
        .await
        .unwrap();
    let engine = SyncEngine::new(remote, session(), options);
    SyncManager::new(engine, Arc::new(cache), [people()])
}

fn names(rows: &[serde_json::Value]) -> Vec<&str> {
    rows.iter().map(|r| r["name"].as_str().unwrap()).collect()
}

// ============================================================================
// SyncEngine
// ============================================================================

#[tokio::test]
async fn only_records_newer_than_the_watermark_are_new() {
    let remote = ScriptedRemote::new(vec![Ok(RemotePage::ok(vec![
        sealed("a", 900, "old"),
        sealed("b", 1100, "new-1"),
        sealed("c", 1200, "new-2"),
    ]))]);
    let engine = SyncEngine::new(remote.clone(), session(), SyncOptions::default());

    let result = engine.sync_collection("people", 1000).await.unwrap();

    let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert_eq!(result.records[1].data["name"], json!("new-2"));
    assert_eq!(result.watermark, 1200);
    assert_eq!(
        remote.requests(),
        vec![PageRequest {
            collection: "people".into(),
            after: 1000,
            with_deleted: true,
            batch: 5000,
        }]
    );
}

#[tokio::test]
async fn first_sync_does_not_ask_for_deletions() {
    let remote = ScriptedRemote::new(Vec::new());
    let engine = SyncEngine::new(remote.clone(), session(), SyncOptions::default());

    let result = engine.sync_collection("people", 0).await.unwrap();

    assert!(result.records.is_empty());
    assert_eq!(result.watermark, 0);
    let requests = remote.requests();
    assert!(!requests[0].with_deleted);
    assert_eq!(
        requests[0].path(),
        "/people?after=0&withDeleted=false&batch=5000"
    );
}

#[tokio::test]
async fn full_pages_resume_below_their_highest_timestamp() {
    let server = ServerRemote::new(vec![
        sealed("a", 10, "a"),
        sealed("b", 20, "b"),
        sealed("c", 30, "c"),
        tombstone("e", 40),
        sealed("d", 50, "d"),
    ]);
    let options = SyncOptions {
        page_size: 2,
        ..Default::default()
    };
    let engine = SyncEngine::new(server.clone(), session(), options);

    let result = engine.sync_collection("people", 5).await.unwrap();

    assert_eq!(server.afters(), vec![5, 10, 20, 30, 40]);
    let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
    assert_eq!(result.deleted_ids, vec!["e".to_string()]);
    assert_eq!(result.watermark, 50);
}

#[tokio::test]
async fn timestamps_tied_across_a_page_boundary_are_all_fetched() {
    let server = ServerRemote::new(vec![
        sealed("a", 100, "Ada"),
        sealed("b", 200, "Bo"),
        sealed("c", 200, "Cy"),
        sealed("d", 300, "Di"),
    ]);
    let options = SyncOptions {
        page_size: 3,
        ..Default::default()
    };
    let manager = manager(server.clone(), options).await;

    let outcome = manager.refresh_collection("people").await.unwrap();

    assert_eq!(server.afters(), vec![0, 100, 200]);
    assert_eq!((outcome.persisted, outcome.watermark), (4, 300));
    let rows = manager.cache().load_all(&people()).await.unwrap();
    assert_eq!(names(&rows), vec!["Ada", "Bo", "Cy", "Di"]);
}

#[tokio::test]
async fn more_ties_than_a_page_fail_without_passing_them() {
    let server = ServerRemote::new(vec![
        sealed("a", 100, "Ada"),
        sealed("b", 200, "Bo"),
        sealed("c", 200, "Cy"),
        sealed("d", 200, "Di"),
    ]);
    let options = SyncOptions {
        page_size: 2,
        ..Default::default()
    };
    let manager = manager(server.clone(), options).await;

    let err = manager.refresh_collection("people").await.unwrap_err();

    match err {
        Error::Sync(SyncError::PageOverflow {
            updated_at,
            page_size,
            ..
        }) => assert_eq!((updated_at, page_size), (200, 2)),
        other => panic!("unexpected error: {other:?}"),
    }
    // Only the record below the tie was committed; the watermark stays under it.
    assert_eq!(manager.cache().watermark("people").await.unwrap(), 100);
    let rows = manager.cache().load_all(&people()).await.unwrap();
    assert_eq!(names(&rows), vec!["Ada"]);
}

#[tokio::test]
async fn larger_page_recovers_after_tie_overflow() {
    let records = vec![
        sealed("a", 100, "Ada"),
        sealed("b", 200, "Bo"),
        sealed("c", 200, "Cy"),
        sealed("d", 200, "Di"),
    ];
    let small = SyncEngine::new(
        ServerRemote::new(records.clone()),
        session(),
        SyncOptions {
            page_size: 2,
            ..Default::default()
        },
    );
    let err = small.sync_collection("people", 100).await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::PageOverflow { .. })));

    let large = SyncEngine::new(
        ServerRemote::new(records),
        session(),
        SyncOptions {
            page_size: 4,
            ..Default::default()
        },
    );
    let result = large.sync_collection("people", 100).await.unwrap();
    assert_eq!(result.records.len(), 3);
    assert_eq!(result.watermark, 200);
}

#[tokio::test]
async fn not_ok_response_carries_the_raw_body() {
    let remote = ScriptedRemote::new(vec![Ok(RemotePage::failed("quota exceeded"))]);
    let engine = SyncEngine::new(remote, session(), SyncOptions::default());

    let err = engine.sync_collection("people", 0).await.unwrap_err();

    match err {
        Error::Sync(SyncError::Fetch {
            collection,
            response,
        }) => {
            assert_eq!(collection, "people");
            let body: serde_json::Value = serde_json::from_str(&response).unwrap();
            assert_eq!(body["ok"], json!(false));
            assert_eq!(body["error"], json!("quota exceeded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn decryption_failure_is_fatal() {
    let mut forged = sealed("b", 1100, "x");
    forged.encrypted_entity_key = sealed("c", 1100, "y").encrypted_entity_key;
    let remote = ScriptedRemote::new(vec![Ok(RemotePage::ok(vec![
        sealed("a", 1050, "fine"),
        forged,
    ]))]);
    let engine = SyncEngine::new(remote, session(), SyncOptions::default());

    let err = engine.sync_collection("people", 1000).await.unwrap_err();

    match err {
        Error::Sync(SyncError::Decrypt { id, .. }) => assert_eq!(id, "b"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn records_from_another_master_key_do_not_decrypt() {
    let remote = ScriptedRemote::new(vec![Ok(RemotePage::ok(vec![sealed("a", 10, "a")]))]);
    let other = Arc::new(Session::from_master_key(MasterKey::from_bytes([1u8; 32])));
    let engine = SyncEngine::new(remote, other, SyncOptions::default());

    let err = engine.sync_collection("people", 0).await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::Decrypt { .. })));
}

#[tokio::test]
async fn progress_fires_after_each_page() {
    let remote = ScriptedRemote::new(vec![
        Ok(RemotePage::ok(vec![sealed("a", 10, "a"), sealed("b", 20, "b")])),
        Ok(RemotePage::ok(vec![sealed("c", 30, "c")])),
    ]);
    let seen: Arc<Mutex<Vec<SyncProgress>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let options = SyncOptions {
        page_size: 2,
        on_progress: Some(Arc::new(move |p: &SyncProgress| {
            sink.lock().unwrap().push(p.clone())
        })),
    };
    let engine = SyncEngine::new(remote, session(), options);

    engine.sync_collection("people", 0).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    // The full first page leaves its highest timestamp for the next request.
    assert_eq!((seen[0].pages, seen[0].fetched, seen[0].watermark), (1, 2, 10));
    assert_eq!((seen[1].pages, seen[1].fetched, seen[1].watermark), (2, 3, 30));
}

#[tokio::test]
async fn transport_error_is_surfaced() {
    let remote = ScriptedRemote::new(vec![Err(SyncTransportError::new("connection reset"))]);
    let engine = SyncEngine::new(remote, session(), SyncOptions::default());

    let err = engine.sync_collection("people", 0).await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::Transport { .. })));
}

// ============================================================================
// SyncManager
// ============================================================================

#[tokio::test]
async fn refresh_persists_then_advances_watermark() {
    let server = ServerRemote::new(vec![
        sealed("a", 100, "Ada"),
        sealed("b", 200, "Bo"),
        sealed("c", 300, "Cy"),
    ]);
    let manager = manager(server.clone(), SyncOptions::default()).await;

    let first = manager.refresh_collection("people").await.unwrap();
    assert_eq!((first.pages, first.persisted, first.watermark), (1, 3, 300));

    server.put(sealed("b", 400, "Bea"));
    server.put(tombstone("c", 500));
    let second = manager.refresh_collection("people").await.unwrap();
    assert_eq!((second.persisted, second.deleted, second.watermark), (1, 1, 500));

    let rows = manager.cache().load_all(&people()).await.unwrap();
    assert_eq!(names(&rows), vec!["Ada", "Bea"]);
    assert_eq!(rows[1]["updated_at"], json!(400));
    assert_eq!(manager.cache().watermark("people").await.unwrap(), 500);
}

#[tokio::test]
async fn failed_refresh_keeps_the_last_committed_watermark() {
    let remote = ScriptedRemote::new(vec![
        Ok(RemotePage::ok(vec![sealed("a", 10, "a"), sealed("b", 20, "b")])),
        Ok(RemotePage::failed("server error")),
    ]);
    let options = SyncOptions {
        page_size: 2,
        ..Default::default()
    };
    let manager = manager(remote, options).await;

    let err = manager.refresh_collection("people").await.unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::Fetch { .. })));

    // Page one was persisted up to below its highest timestamp; page two was not.
    assert_eq!(manager.cache().watermark("people").await.unwrap(), 10);
    assert_eq!(manager.cache().count("people").await.unwrap(), 1);
}

#[tokio::test]
async fn non_ok_first_page_leaves_watermark_unchanged() {
    let remote = ScriptedRemote::new(vec![Ok(RemotePage::failed("nope"))]);
    let manager = manager(remote, SyncOptions::default()).await;
    manager.cache().advance_watermark("people", 1000).await.unwrap();

    assert!(manager.refresh_collection("people").await.is_err());
    assert_eq!(manager.cache().watermark("people").await.unwrap(), 1000);
}

#[tokio::test]
async fn unknown_collection_is_rejected() {
    let manager = manager(ScriptedRemote::new(Vec::new()), SyncOptions::default()).await;
    let err = manager.refresh_collection("territories").await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}

#[tokio::test]
async fn refresh_after_logout_is_locked() {
    let manager = manager(
        ServerRemote::new(vec![sealed("a", 1, "a")]),
        SyncOptions::default(),
    )
    .await;
    manager.engine().session().lock();

    let err = manager.refresh_all().await.unwrap_err();
    assert!(matches!(err, Error::Session(SessionError::Locked)));
    assert_eq!(manager.cache().watermark("people").await.unwrap(), 0);
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn wrong_password_reports_cannot_unlock() {
    let params = KdfParams {
        ops_limit: 1,
        memory_mb: 1,
        parallelism: 1,
    };
    let (_, token) = Session::enroll("correct horse", params).await.unwrap();

    let err = Session::unlock("battery staple", &token, params)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CannotUnlock));
    assert!(Session::unlock("correct horse", &token, params).await.is_ok());
}
