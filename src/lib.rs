//! Campus courier routing server
//!
//! Location codes, courier authority and delivery task routing over sqlite.

pub mod api;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod permission;
pub mod registry;
pub mod routing;
pub mod store;
pub mod websocket;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::ConfigHandle;
use crate::hierarchy::AuthorityHierarchy;
use crate::registry::CodeRegistry;
use crate::routing::{TaskEventBus, TaskRouter};

/// Application state shared across handlers
pub struct AppState {
    pub store: store::Store,
    pub config: Arc<ConfigHandle>,
    pub registry: CodeRegistry,
    pub hierarchy: AuthorityHierarchy,
    pub router: TaskRouter,
    pub events: Arc<TaskEventBus>,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Self::with_config(pool, ConfigHandle::default())
    }

    pub fn with_config(pool: SqlitePool, config: ConfigHandle) -> Arc<Self> {
        let store = store::Store::new(pool);
        let config = Arc::new(config);
        let events = Arc::new(TaskEventBus::default());
        let registry = CodeRegistry::new(store.clone(), Arc::clone(&config));
        let router = TaskRouter::new(
            store.clone(),
            registry.clone(),
            Arc::clone(&config),
            events.clone(),
        );

        Arc::new(Self {
            hierarchy: AuthorityHierarchy::new(store.clone()),
            store,
            config,
            registry,
            router,
            events,
        })
    }
}
