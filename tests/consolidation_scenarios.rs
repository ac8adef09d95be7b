//! Scenarios exercising the consolidating reflection path: updating prior
//! facts in place, and deduplicating near-identical additions.

mod common;

use std::sync::Arc;

use common::{HashEmbedder, ScriptedConsolidatingReflector};
use turnmem::config::MemoryConfig;
use turnmem::reflector::{ConsolidationAction, ReflectorHandle};
use turnmem::session::MemorySession;
use turnmem::storage::{InMemoryStorage, StorageBackend};
use turnmem::tokens::HeuristicTokenCounter;
use turnmem::types::{ConsolidationActionType, Fact, MarkerType, Metadata};
use uuid::Uuid;

async fn seed_fact(storage: &dyn StorageBackend, session_id: &str, content: &str) -> Fact {
    let embedding_id = Uuid::new_v4();
    let embedder = HashEmbedder::default();
    let vector = {
        use turnmem::embeddings::Embedder;
        embedder.embed(&[content.to_string()]).await.unwrap().remove(0)
    };
    storage
        .save_embedding(embedding_id, vector, Metadata::new())
        .await
        .unwrap();

    let fact = Fact {
        id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        episode_id: Uuid::new_v4(),
        content: content.to_string(),
        created_at: chrono::Utc::now(),
        fact_type: MarkerType::Decision,
        confidence: 1.0,
        embedding_id: Some(embedding_id),
        token_count: 4,
        superseded_by: None,
        supersedes: Vec::new(),
        metadata: Metadata::new(),
    };
    storage.save_fact(&fact).await.unwrap();
    fact
}

#[tokio::test]
async fn consolidation_update_supersedes_and_adds() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.initialize().await.unwrap();
    let old = seed_fact(&*storage, "s1", "we use sqlite for storage").await;

    let reflector = ReflectorHandle::consolidating(Arc::new(ScriptedConsolidatingReflector::new(
        vec![vec![
            ConsolidationAction {
                action: ConsolidationActionType::Update,
                content: "we use postgres for storage".to_string(),
                fact_type: MarkerType::Decision,
                confidence: 0.9,
                source_fact_id: Some(old.id),
                reason: "storage choice changed".to_string(),
            },
            ConsolidationAction {
                action: ConsolidationActionType::Add,
                content: "we deploy on kubernetes".to_string(),
                fact_type: MarkerType::Decision,
                confidence: 0.9,
                source_fact_id: None,
                reason: "new decision".to_string(),
            },
        ]],
    )));

    let session = MemorySession::new(
        "s1",
        storage.clone(),
        Arc::new(HashEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        reflector,
        MemoryConfig::default(),
    )
    .unwrap();
    session.initialize().await.unwrap();

    session
        .ingest("user", "let's switch storage to postgres", None, None, None)
        .await
        .unwrap();
    session.close_episode("manual").await.unwrap();
    session.wait_for_background_reflection().await;

    let active = storage.get_active_facts_by_session("s1").await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|f| f.content.contains("postgres")));
    assert!(active.iter().any(|f| f.content.contains("kubernetes")));
    assert!(!active.iter().any(|f| f.id == old.id));

    let refreshed_old = storage.get_facts_by_session("s1").await.unwrap();
    let old_after = refreshed_old.iter().find(|f| f.id == old.id).unwrap();
    assert!(old_after.superseded_by.is_some());

    session.close().await.unwrap();
}

#[tokio::test]
async fn dedup_rejects_near_identical_additions() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.initialize().await.unwrap();
    let existing = seed_fact(&*storage, "s1", "the api rate limit is 100 requests per minute").await;

    let reflector = ReflectorHandle::consolidating(Arc::new(ScriptedConsolidatingReflector::new(
        vec![vec![
            ConsolidationAction {
                action: ConsolidationActionType::Keep,
                content: String::new(),
                fact_type: MarkerType::Decision,
                confidence: 1.0,
                source_fact_id: Some(existing.id),
                reason: "still true".to_string(),
            },
            ConsolidationAction {
                action: ConsolidationActionType::Add,
                content: "the api rate limit is 100 requests per minute".to_string(),
                fact_type: MarkerType::Decision,
                confidence: 0.9,
                source_fact_id: None,
                reason: "restated".to_string(),
            },
        ]],
    )));

    let mut config = MemoryConfig::default();
    config.reflection.dedup_similarity_threshold = 0.95;

    let session = MemorySession::new(
        "s1",
        storage.clone(),
        Arc::new(HashEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        reflector,
        config,
    )
    .unwrap();
    session.initialize().await.unwrap();

    session
        .ingest("user", "what's the api rate limit again?", None, None, None)
        .await
        .unwrap();
    session.close_episode("manual").await.unwrap();
    session.wait_for_background_reflection().await;

    let active = storage.get_active_facts_by_session("s1").await.unwrap();
    assert_eq!(active.len(), 1, "duplicate ADD must be rejected");
    assert_eq!(active[0].id, existing.id);

    session.close().await.unwrap();
}
