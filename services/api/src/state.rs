//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the tutor service,
//! the runtime settings, the static curriculum and roster tables, the profile
//! store and the registry of live speaking sessions.

use crate::{config::Config, sessions::SessionRegistry};
use lingua_core::{
    curriculum::Curriculum, invoker::InvokerSettings, profile::ProfileStore, roster::Roster,
    tutor::TutorService,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub tutor: TutorService,
    /// Replaced as a whole by `PUT /settings`; handlers take a snapshot per request.
    pub settings: Arc<RwLock<InvokerSettings>>,
    pub curriculum: Arc<Curriculum>,
    pub roster: Arc<Roster>,
    pub profiles: Arc<dyn ProfileStore>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn settings_snapshot(&self) -> InvokerSettings {
        self.settings.read().await.clone()
    }
}
