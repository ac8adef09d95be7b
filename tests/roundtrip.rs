//! Round-trip and idempotence properties that must hold regardless of
//! which reflector or embedder a session is wired with.

mod common;

use std::sync::Arc;

use common::ScriptedReflector;
use turnmem::config::MemoryConfig;
use turnmem::embeddings::NullEmbedder;
use turnmem::reflector::{ReflectedFact, ReflectorHandle};
use turnmem::session::MemorySession;
use turnmem::storage::InMemoryStorage;
use turnmem::tokens::HeuristicTokenCounter;

#[tokio::test]
async fn ingest_then_get_turn_round_trips() {
    let storage = Arc::new(InMemoryStorage::new());
    let session = MemorySession::new(
        "s1",
        storage.clone(),
        Arc::new(NullEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        ReflectorHandle::default(),
        MemoryConfig::default(),
    )
    .unwrap();
    session.initialize().await.unwrap();

    let turn_id = session
        .ingest("user", "remember this exactly", None, None, None)
        .await
        .unwrap();

    let turn = turnmem::storage::StorageBackend::get_turn(&*storage, turn_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(turn.content, "remember this exactly");
    assert_eq!(turn.id, turn_id);

    session.close().await.unwrap();
}

#[tokio::test]
async fn initialize_and_close_are_each_idempotent() {
    let session = MemorySession::new(
        "s1",
        Arc::new(InMemoryStorage::new()),
        Arc::new(NullEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        ReflectorHandle::default(),
        MemoryConfig::default(),
    )
    .unwrap();

    session.initialize().await.unwrap();
    session.initialize().await.unwrap();
    session.initialize().await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn legacy_reflector_produces_facts_independently_each_episode() {
    let mut config = MemoryConfig::default();
    config.episode_boundary.max_turns = 1;
    config.reflection.min_episode_turns = 1;

    let reflector = ReflectorHandle::legacy(Arc::new(ScriptedReflector::new(vec![
        vec![ReflectedFact::new("fact from episode one")],
        vec![ReflectedFact::new("fact from episode two")],
    ])));

    let storage = Arc::new(InMemoryStorage::new());
    let session = MemorySession::new(
        "s1",
        storage.clone(),
        Arc::new(NullEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        reflector,
        config,
    )
    .unwrap();
    session.initialize().await.unwrap();

    session.ingest("user", "first episode turn", None, None, None).await.unwrap();
    // closes episode one (max_turns = 1) before assigning this turn
    session.ingest("user", "second episode turn", None, None, None).await.unwrap();
    session.wait_for_background_reflection().await;
    // closes episode two before assigning this turn
    session.ingest("user", "third episode turn", None, None, None).await.unwrap();
    session.wait_for_background_reflection().await;

    let active = turnmem::storage::StorageBackend::get_active_facts_by_session(&*storage, "s1")
        .await
        .unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|f| f.content == "fact from episode one"));
    assert!(active.iter().any(|f| f.content == "fact from episode two"));

    session.close().await.unwrap();
}
