//! Deterministic test doubles shared across the integration suite. These
//! live under test support rather than the crate's public provider
//! surface: a real embedder or reflector is supplied by the caller.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use turnmem::embeddings::Embedder;
use turnmem::error::Result;
use turnmem::reflector::{ConsolidatingReflector, ConsolidationAction, ReflectedFact, Reflector};
use turnmem::types::{Episode, Fact, Turn};

/// A feature-hashed bag-of-words embedder: identical content always
/// produces an identical vector, and texts sharing words produce vectors
/// with positive cosine similarity. Good enough to exercise recall and
/// consolidation scoping without a real model.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Replays a fixed script of legacy reflection results, one call per
/// script entry. Calls past the end of the script return no facts.
pub struct ScriptedReflector {
    script: Mutex<VecDeque<Vec<ReflectedFact>>>,
}

impl ScriptedReflector {
    #[must_use]
    pub fn new(script: Vec<Vec<ReflectedFact>>) -> Self {
        Self { script: Mutex::new(script.into()) }
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    async fn reflect(&self, _episode: &Episode, _turns: &[Turn]) -> Result<Vec<ReflectedFact>> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Replays a fixed script of consolidation actions, one call per script
/// entry. `reflect` (the legacy capability every reflector carries) is
/// never exercised by this double; it always returns no facts.
pub struct ScriptedConsolidatingReflector {
    script: Mutex<VecDeque<Vec<ConsolidationAction>>>,
}

impl ScriptedConsolidatingReflector {
    #[must_use]
    pub fn new(script: Vec<Vec<ConsolidationAction>>) -> Self {
        Self { script: Mutex::new(script.into()) }
    }
}

#[async_trait]
impl Reflector for ScriptedConsolidatingReflector {
    async fn reflect(&self, _episode: &Episode, _turns: &[Turn]) -> Result<Vec<ReflectedFact>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ConsolidatingReflector for ScriptedConsolidatingReflector {
    async fn reflect_with_consolidation(
        &self,
        _episode: &Episode,
        _turns: &[Turn],
        _prior_facts: &[Fact],
    ) -> Result<Vec<ConsolidationAction>> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}
