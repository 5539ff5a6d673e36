//! # Skirmish
//!
//! Client-side sync engine for live tabletop interactions (encounters,
//! combat rounds). It keeps the UI responsive on a flaky connection:
//!
//! - server pushes land in a [`LiveInteractionStore`] through a pure reducer,
//! - local edits are layered on top as optimistic overlays
//!   ([`OptimisticUpdates`]) and rolled back if the server refuses them,
//! - failed requests are retried with exponential backoff
//!   ([`retry_with_backoff`]) and classified for presentation,
//! - mutations made while offline wait in a durable [`OfflineActionQueue`]
//!   that the [`RecoveryCoordinator`] replays when connectivity returns.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use skirmish::{
//!     ActionPriority, FileStore, InteractionApi, InteractionMutator, LiveInteractionStore,
//!     OfflineActionQueue, OptimisticUpdates, RecoveryCoordinator, SyncConfig,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run(api: Arc<dyn InteractionApi>) -> skirmish::Result<()> {
//! let config = SyncConfig::from_env();
//! let queue = Arc::new(OfflineActionQueue::load(Arc::new(FileStore::open(&config.data_dir)?))?);
//! let store = LiveInteractionStore::new();
//! let coordinator = RecoveryCoordinator::new(config.clone(), queue, api.clone(), true);
//! let _mirror = coordinator.mirror_into(store.clone());
//!
//! let updates = Arc::new(OptimisticUpdates::new(store.clone(), config.overlay_grace));
//! let mutator = InteractionMutator::new(updates, coordinator, api);
//! mutator
//!     .update_interaction("I1", json!({"status": "INITIATIVE_ROLLED"}), ActionPriority::High)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod mutation;
pub mod notify;
pub mod optimistic;
pub mod queue;
pub mod recovery;
pub mod store;
pub mod types;

pub use api::InteractionApi;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use mutation::{InteractionMutator, MutationOutcome};
pub use notify::Subscription;
pub use optimistic::OptimisticUpdates;
pub use queue::storage::{FileStore, KeyValueStore, MemoryStore};
pub use queue::{ActionPriority, NewOfflineAction, OfflineAction, OfflineActionQueue, QueueStats};
pub use recovery::{
    classify, classify_error, retry_with_backoff, ErrorClassification, ErrorContext, ErrorKind,
    FailureOutcome, RecoveryCoordinator, RecoveryHooks, RecoveryState, RetryConfig, Severity,
};
pub use store::{
    ConflictResolution, InteractionFeeds, LiveInteractionState, LiveInteractionStore, Push,
    PushConsumer, PushUpdate, StoreAction,
};
pub use types::*;

use once_cell::sync::OnceCell;
use std::sync::Arc;

static GLOBAL_COORDINATOR: OnceCell<Arc<RecoveryCoordinator>> = OnceCell::new();

/// Register the process-wide coordinator (called once at startup). Later
/// calls are ignored.
pub fn set_global_coordinator(coordinator: Arc<RecoveryCoordinator>) {
    let _ = GLOBAL_COORDINATOR.set(coordinator);
}

/// The process-wide coordinator, if one was registered.
pub fn global_coordinator() -> Option<Arc<RecoveryCoordinator>> {
    GLOBAL_COORDINATOR.get().map(Arc::clone)
}
