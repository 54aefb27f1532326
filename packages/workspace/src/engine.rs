//! # Save Trigger Engine
//!
//! Decides when a document is flushed and what happens when the file on
//! disk moved underneath unsaved local work.
//!
//! ## Flush
//!
//! ```text
//! trigger ─→ policy + dirty check ─→ Flushing
//!                                      │
//!            external change pending? ─┤
//!                     no               │ yes
//!                     ↓                ↓
//!              save callbacks     Conflicted ─→ resolver
//!                                   keep-local ─→ save callbacks
//!                                   merge ──────→ replace memory, save
//!                                   use-remote ─→ adopt file, tell host
//!                                   cancelled ──→ stay dirty
//! ```
//!
//! The phase always leaves Flushing/Conflicted when a flush returns, whether
//! it succeeded or not.

use crate::callbacks::{SaveCallbacks, SaveError};
use crate::policy::{SavePolicy, SaveSettings, SaveTrigger};
use crate::scheduler::SaveScheduler;
use crate::shared::{lock_buffer, SharedBuffer};
use canvas_editor::{CanvasDocument, ConflictInfo, ConflictResolver, ResolutionStrategy};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// What a flush ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing to save, or the trigger is disabled
    Skipped,
    /// Memory version written through the callbacks
    Saved,
    /// Additive external changes merged in, then written
    Merged,
    /// Local work dropped in favour of the file version
    UsedRemote,
    /// Conflict left unresolved; the document stays dirty
    Cancelled,
}

impl SaveOutcome {
    /// Memory and file agree after this outcome
    pub fn is_synced(&self) -> bool {
        matches!(
            self,
            SaveOutcome::Saved | SaveOutcome::Merged | SaveOutcome::UsedRemote
        )
    }
}

/// Host answer when shutting down with unsaved changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownChoice {
    Save,
    Discard,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Proceed,
    Blocked,
}

/// Host integration points used by the engine
pub trait SaveHost: Send + Sync {
    /// The memory version was replaced by the file version. The host
    /// should refresh its views.
    fn on_use_remote(&self, path: &Path, remote: &CanvasDocument);

    fn confirm_shutdown<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ShutdownChoice>;
}

/// Host without UI: logs remote reloads and always saves on shutdown
#[derive(Debug, Default)]
pub struct HeadlessHost;

impl SaveHost for HeadlessHost {
    fn on_use_remote(&self, path: &Path, _remote: &CanvasDocument) {
        tracing::info!("Reloaded {:?} from disk", path);
    }

    fn confirm_shutdown<'a>(&'a self, _path: &'a Path) -> BoxFuture<'a, ShutdownChoice> {
        async { ShutdownChoice::Save }.boxed()
    }
}

pub struct SaveTriggerEngine {
    path: PathBuf,
    buffer: SharedBuffer,
    callbacks: Arc<SaveCallbacks>,
    resolver: ConflictResolver,
    host: Arc<dyn SaveHost>,
    settings: Mutex<SaveSettings>,
    scheduler: SaveScheduler,
}

impl SaveTriggerEngine {
    pub fn new(
        buffer: SharedBuffer,
        callbacks: Arc<SaveCallbacks>,
        resolver: ConflictResolver,
        host: Arc<dyn SaveHost>,
        settings: SaveSettings,
    ) -> Self {
        let path = lock_buffer(&buffer).path().to_path_buf();
        Self {
            path,
            buffer,
            callbacks,
            resolver,
            host,
            settings: Mutex::new(settings),
            scheduler: SaveScheduler::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn callbacks(&self) -> &Arc<SaveCallbacks> {
        &self.callbacks
    }

    pub fn policy(&self) -> SavePolicy {
        self.settings().policy
    }

    pub fn set_policy(&self, policy: SavePolicy) {
        self.settings().policy = policy;
        if !policy.auto_save {
            self.scheduler.cancel(&self.schedule_key());
        }
        tracing::debug!("Save policy for {:?}: {:?}", self.path, policy.enabled_triggers());
    }

    /// Dirty and the trigger is enabled
    pub fn should_trigger_save(&self, trigger: SaveTrigger) -> bool {
        lock_buffer(&self.buffer).has_unsaved_changes() && self.policy().is_enabled(trigger)
    }

    pub async fn perform_save(&self, trigger: SaveTrigger) -> Result<SaveOutcome, SaveError> {
        if !self.should_trigger_save(trigger) {
            return Ok(SaveOutcome::Skipped);
        }
        self.flush(trigger).await
    }

    /// Explicit user request; saves regardless of policy
    pub async fn on_manual_save_shortcut(&self) -> Result<SaveOutcome, SaveError> {
        if !lock_buffer(&self.buffer).has_unsaved_changes() {
            return Ok(SaveOutcome::Skipped);
        }
        self.flush(SaveTrigger::ManualSave).await
    }

    /// Flush or ask the host before the application exits.
    ///
    /// A failed save blocks the shutdown.
    pub async fn on_app_shutdown(&self) -> Result<ShutdownOutcome, SaveError> {
        self.scheduler.cancel_all();

        if !lock_buffer(&self.buffer).has_unsaved_changes() {
            return Ok(ShutdownOutcome::Proceed);
        }

        let (confirm, app_close) = {
            let settings = self.settings();
            (settings.confirm_on_shutdown, settings.policy.app_close)
        };

        let choice = if confirm {
            self.host.confirm_shutdown(&self.path).await
        } else if app_close {
            ShutdownChoice::Save
        } else {
            tracing::warn!("Shutting down with unsaved changes in {:?}", self.path);
            ShutdownChoice::Discard
        };

        match choice {
            ShutdownChoice::Block => Ok(ShutdownOutcome::Blocked),
            ShutdownChoice::Discard => {
                tracing::info!("Discarding unsaved changes in {:?}", self.path);
                Ok(ShutdownOutcome::Proceed)
            }
            ShutdownChoice::Save => match self.flush(SaveTrigger::AppClose).await {
                Ok(SaveOutcome::Cancelled) => Ok(ShutdownOutcome::Blocked),
                Ok(_) => Ok(ShutdownOutcome::Proceed),
                Err(e) => {
                    tracing::error!("Save on shutdown failed for {:?}: {}", self.path, e);
                    Ok(ShutdownOutcome::Blocked)
                }
            },
        }
    }

    /// Debounce an auto-save after an edit. Returns false when auto-save is
    /// off or there is no tokio runtime to run it on.
    pub fn schedule_auto_save(self: &Arc<Self>) -> bool {
        let (enabled, delay) = {
            let settings = self.settings();
            (settings.policy.auto_save, settings.auto_save_delay())
        };
        if !enabled {
            return false;
        }

        let engine = Arc::downgrade(self);
        self.scheduler.schedule(self.schedule_key(), delay, async move {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if let Err(e) = engine.perform_save(SaveTrigger::AutoSave).await {
                tracing::error!("Auto-save of {:?} failed: {}", engine.path, e);
            }
        })
    }

    pub fn auto_save_pending(&self) -> bool {
        self.scheduler.is_scheduled(&self.schedule_key())
    }

    pub fn cancel_auto_save(&self) -> bool {
        self.scheduler.cancel(&self.schedule_key())
    }

    async fn flush(&self, trigger: SaveTrigger) -> Result<SaveOutcome, SaveError> {
        let conflict = {
            let mut buffer = lock_buffer(&self.buffer);
            if buffer.is_closed() {
                return Err(SaveError::Closed(self.path.clone()));
            }
            buffer.begin_flush();
            if buffer.conflict_detected() && buffer.detect_conflict() {
                buffer.mark_conflicted();
                Some(buffer.conflict_info())
            } else {
                None
            }
        };

        tracing::debug!("Flushing {:?} for {}", self.path, trigger);
        let result = match conflict {
            None => self
                .callbacks
                .trigger_save(trigger)
                .await
                .map(|_| SaveOutcome::Saved),
            Some(info) => self.resolve_and_save(trigger, info).await,
        };

        lock_buffer(&self.buffer).end_flush();
        result
    }

    async fn resolve_and_save(
        &self,
        trigger: SaveTrigger,
        info: ConflictInfo,
    ) -> Result<SaveOutcome, SaveError> {
        tracing::info!("Resolving conflict on {:?} before {} save", self.path, trigger);
        let resolution = self.resolver.resolve_conflict(&info).await;
        if resolution.cancelled {
            return Ok(SaveOutcome::Cancelled);
        }

        match resolution.strategy {
            ResolutionStrategy::UseRemote => {
                let remote = {
                    let mut buffer = lock_buffer(&self.buffer);
                    buffer.accept_file_version();
                    buffer.file_version().clone()
                };
                self.host.on_use_remote(&self.path, &remote);
                Ok(SaveOutcome::UsedRemote)
            }
            ResolutionStrategy::Merge => {
                if let Some(merged) = resolution.merged {
                    lock_buffer(&self.buffer).replace_memory_version(merged);
                }
                self.callbacks.trigger_save(trigger).await?;
                Ok(SaveOutcome::Merged)
            }
            ResolutionStrategy::KeepLocal => {
                self.callbacks.trigger_save(trigger).await?;
                Ok(SaveOutcome::Saved)
            }
        }
    }

    fn schedule_key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn settings(&self) -> std::sync::MutexGuard<'_, SaveSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SaveTriggerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveTriggerEngine")
            .field("path", &self.path)
            .field("policy", &self.policy())
            .finish_non_exhaustive()
    }
}
