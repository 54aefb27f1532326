//! # Conflict Resolution
//!
//! A conflict exists when the memory snapshot and an externally updated file
//! snapshot differ. Resolution runs in three steps:
//!
//! 1. Nobody is editing: take the remote version, no questions asked.
//! 2. Every node/edge id present on both sides is identical: the sides only
//!    differ by additions, so merge them as a union by id.
//! 3. Otherwise ask the host through a [`ConflictPrompt`].
//!
//! A failing or panicking prompt degrades to keep-local + cancelled. The
//! resolver never drops local edits because of its own failure.

use crate::errors::EditorError;
use canvas_model::{canonical_json, content_hash, CanvasDocument};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Divergence between the local and remote snapshots of one document
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictInfo {
    pub path: PathBuf,
    pub local: CanvasDocument,
    pub remote: CanvasDocument,
    /// None when the snapshot could not be serialized
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub has_active_editors: bool,
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    pub fn new(
        path: PathBuf,
        local: CanvasDocument,
        remote: CanvasDocument,
        has_active_editors: bool,
    ) -> Self {
        Self {
            local_hash: content_hash(&local).ok(),
            remote_hash: content_hash(&remote).ok(),
            path,
            local,
            remote,
            has_active_editors,
            detected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    KeepLocal,
    UseRemote,
    Merge,
}

/// Outcome handed back to the save engine
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    /// Merged snapshot, present for `Merge`
    pub merged: Option<CanvasDocument>,
    /// Whether the host was asked
    pub user_choice: bool,
    /// The save attempt should be abandoned
    pub cancelled: bool,
}

impl ConflictResolution {
    fn automatic(strategy: ResolutionStrategy, merged: Option<CanvasDocument>) -> Self {
        Self {
            strategy,
            merged,
            user_choice: false,
            cancelled: false,
        }
    }

    fn chosen(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            merged: None,
            user_choice: true,
            cancelled: false,
        }
    }

    fn cancelled(user_choice: bool) -> Self {
        Self {
            strategy: ResolutionStrategy::KeepLocal,
            merged: None,
            user_choice,
            cancelled: true,
        }
    }
}

/// Options offered to the host when auto-merge is not possible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictChoice {
    KeepLocal,
    UseRemote,
    Cancel,
}

/// Host hook that asks the user how to resolve a conflict
pub trait ConflictPrompt: Send + Sync {
    fn choose<'a>(&'a self, info: &'a ConflictInfo)
        -> BoxFuture<'a, Result<ConflictChoice, EditorError>>;
}

/// A fixed answer, for headless hosts and tests
impl ConflictPrompt for ConflictChoice {
    fn choose<'a>(
        &'a self,
        _info: &'a ConflictInfo,
    ) -> BoxFuture<'a, Result<ConflictChoice, EditorError>> {
        let choice = *self;
        async move { Ok(choice) }.boxed()
    }
}

/// Prompt used when the host attaches none
#[derive(Debug, Default)]
pub struct NoPrompt;

impl ConflictPrompt for NoPrompt {
    fn choose<'a>(
        &'a self,
        _info: &'a ConflictInfo,
    ) -> BoxFuture<'a, Result<ConflictChoice, EditorError>> {
        async { Err(EditorError::PromptUnavailable) }.boxed()
    }
}

#[derive(Clone)]
pub struct ConflictResolver {
    prompt: Arc<dyn ConflictPrompt>,
}

impl ConflictResolver {
    pub fn new(prompt: Arc<dyn ConflictPrompt>) -> Self {
        Self { prompt }
    }

    /// Resolver whose interactive step always cancels
    pub fn without_prompt() -> Self {
        Self::new(Arc::new(NoPrompt))
    }

    /// Canonical comparison of two snapshots. Content that cannot be
    /// serialized is a conflict.
    pub fn detect_conflict(&self, path: &Path, local: &CanvasDocument, remote: &CanvasDocument) -> bool {
        match (canonical_json(local), canonical_json(remote)) {
            (Ok(local), Ok(remote)) => local != remote,
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Could not serialize {:?}, treating as conflict: {}", path, e);
                true
            }
        }
    }

    pub async fn resolve_conflict(&self, info: &ConflictInfo) -> ConflictResolution {
        if !info.has_active_editors {
            tracing::info!("No active editors on {:?}, using remote version", info.path);
            return ConflictResolution::automatic(ResolutionStrategy::UseRemote, None);
        }

        if can_auto_merge(&info.local, &info.remote) {
            tracing::info!("Auto-merging additive changes into {:?}", info.path);
            let merged = perform_auto_merge(&info.local, &info.remote);
            return ConflictResolution::automatic(ResolutionStrategy::Merge, Some(merged));
        }

        let prompt = self.prompt.choose(info);
        match AssertUnwindSafe(prompt).catch_unwind().await {
            Ok(Ok(ConflictChoice::KeepLocal)) => {
                ConflictResolution::chosen(ResolutionStrategy::KeepLocal)
            }
            Ok(Ok(ConflictChoice::UseRemote)) => {
                ConflictResolution::chosen(ResolutionStrategy::UseRemote)
            }
            Ok(Ok(ConflictChoice::Cancel)) => {
                tracing::info!("Conflict on {:?} cancelled by user", info.path);
                ConflictResolution::cancelled(true)
            }
            Ok(Err(e)) => {
                tracing::warn!("Conflict prompt for {:?} failed: {}", info.path, e);
                ConflictResolution::cancelled(false)
            }
            Err(_) => {
                tracing::error!("Conflict prompt for {:?} panicked", info.path);
                ConflictResolution::cancelled(false)
            }
        }
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver").finish_non_exhaustive()
    }
}

/// True iff every node and edge id present on both sides is identical
pub fn can_auto_merge(local: &CanvasDocument, remote: &CanvasDocument) -> bool {
    let nodes_agree = local
        .nodes
        .iter()
        .all(|node| remote.node(&node.id).map_or(true, |other| other == node));
    let edges_agree = local
        .edges
        .iter()
        .all(|edge| remote.edge(&edge.id).map_or(true, |other| other == edge));
    nodes_agree && edges_agree
}

/// `local` plus every node and edge of `remote` whose id `local` lacks
pub fn perform_auto_merge(local: &CanvasDocument, remote: &CanvasDocument) -> CanvasDocument {
    let mut merged = local.clone();

    let node_ids: HashSet<&str> = local.node_ids().collect();
    merged.nodes.extend(
        remote
            .nodes
            .iter()
            .filter(|n| !node_ids.contains(n.id.as_str()))
            .cloned(),
    );

    let edge_ids: HashSet<&str> = local.edges.iter().map(|e| e.id.as_str()).collect();
    merged.edges.extend(
        remote
            .edges
            .iter()
            .filter(|e| !edge_ids.contains(e.id.as_str()))
            .cloned(),
    );

    merged
}
