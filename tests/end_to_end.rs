//! End-to-end scenarios over the public facade, using a null embedder and
//! the heuristic token counter unless a scenario calls for something
//! deterministic.

mod common;

use std::sync::Arc;

use turnmem::config::MemoryConfig;
use turnmem::embeddings::NullEmbedder;
use turnmem::reflector::ReflectorHandle;
use turnmem::session::MemorySession;
use turnmem::storage::{InMemoryStorage, StorageBackend};
use turnmem::tokens::HeuristicTokenCounter;
use turnmem::types::EpisodeStatus;

fn default_session(config: MemoryConfig) -> MemorySession {
    MemorySession::new(
        "s1",
        Arc::new(InMemoryStorage::new()),
        Arc::new(NullEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        ReflectorHandle::default(),
        config,
    )
    .unwrap()
}

#[tokio::test]
async fn basic_ingest_recall() {
    let session = default_session(MemoryConfig::default());
    session.initialize().await.unwrap();

    session
        .ingest("user", "What is Python?", None, None, None)
        .await
        .unwrap();
    session
        .ingest(
            "assistant",
            "Python is a programming language.",
            None,
            None,
            None,
        )
        .await
        .unwrap();

    let items = session.recall("Python", Some(1000), true, None).await.unwrap();
    assert!(items.iter().any(|i| i.content.contains("Python")));
    let total: usize = items.iter().map(|i| i.token_count).sum();
    assert!(total <= 1000);

    session.close().await.unwrap();
}

#[tokio::test]
async fn marker_auto_detection_overridden() {
    let session = default_session(MemoryConfig::default());
    session.initialize().await.unwrap();

    session
        .ingest(
            "assistant",
            "Decision: Use Python.",
            None,
            Some(vec!["goal".to_string()]),
            None,
        )
        .await
        .unwrap();

    let items = session.recall("Python", None, true, None).await.unwrap();
    let found = items.iter().find(|i| i.content.contains("Python")).unwrap();
    assert_eq!(found.markers, vec!["goal".to_string()]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn episode_boundary_by_max_turns() {
    let mut config = MemoryConfig::default();
    config.episode_boundary.max_turns = 3;
    let session = default_session(config);
    session.initialize().await.unwrap();

    for text in ["m1", "m2", "m3", "m4"] {
        session.ingest("user", text, None, None, None).await.unwrap();
    }

    let stats = session.get_session_stats().await.unwrap();
    assert_eq!(stats.total_episodes, 2);
    assert_eq!(stats.open_episode_turn_count, 1);
    assert!(stats.open_episode_id.is_some());

    session.close().await.unwrap();
}

#[tokio::test]
async fn carry_forward_buffers_short_episodes_until_threshold() {
    let mut config = MemoryConfig::default();
    config.reflection.min_episode_turns = 3;
    let reflector = ReflectorHandle::legacy(Arc::new(common::ScriptedReflector::new(vec![vec![
        turnmem::reflector::ReflectedFact::new("distilled from four turns"),
    ]])));

    let session = MemorySession::new(
        "s1",
        Arc::new(InMemoryStorage::new()),
        Arc::new(NullEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        reflector,
        config,
    )
    .unwrap();
    session.initialize().await.unwrap();

    session.ingest("user", "first turn", None, None, None).await.unwrap();
    session.close_episode("manual").await.unwrap();
    session.wait_for_background_reflection().await;

    let stats = session.get_session_stats().await.unwrap();
    assert_eq!(stats.total_facts, 0, "reflector must not run below min_episode_turns");

    session.ingest("user", "second turn", None, None, None).await.unwrap();
    session.ingest("user", "third turn", None, None, None).await.unwrap();
    session.ingest("user", "fourth turn", None, None, None).await.unwrap();
    session.close_episode("manual").await.unwrap();
    session.wait_for_background_reflection().await;

    let stats = session.get_session_stats().await.unwrap();
    assert_eq!(stats.total_facts, 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn closed_episode_is_marked_closed_and_the_new_one_stays_open() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut config = MemoryConfig::default();
    config.episode_boundary.max_turns = 1;
    let session = MemorySession::new(
        "s1",
        storage.clone(),
        Arc::new(NullEmbedder::default()),
        Arc::new(HeuristicTokenCounter),
        ReflectorHandle::default(),
        config,
    )
    .unwrap();
    session.initialize().await.unwrap();

    session.ingest("user", "only turn", None, None, None).await.unwrap();
    let first_episode_id = session.current_episode_id().unwrap();
    session.ingest("user", "next episode", None, None, None).await.unwrap();
    let second_episode_id = session.current_episode_id().unwrap();

    assert_ne!(first_episode_id, second_episode_id);
    let first_episode = storage.get_episode(first_episode_id).await.unwrap().unwrap();
    assert_eq!(first_episode.status, EpisodeStatus::Closed);
    let second_episode = storage.get_episode(second_episode_id).await.unwrap().unwrap();
    assert_eq!(second_episode.status, EpisodeStatus::Open);

    session.close().await.unwrap();
}
