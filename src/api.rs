//! HTTP surface: channel webhook and the public availability read

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::runtime::TurnRuntime;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub runtime: Arc<TurnRuntime>,
}

impl AppState {
    pub fn new(db: Database, session_ttl_minutes: i64) -> Self {
        Self {
            runtime: Arc::new(TurnRuntime::new(db.clone(), session_ttl_minutes)),
            db,
        }
    }
}
