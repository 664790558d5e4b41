//! In-memory registry of speaking sessions.
//!
//! Each session sits behind its own mutex so at most one call drives it at a
//! time, and carries a cancellation token that the `DELETE` hook fires.
//! Graded sessions leave the live map; only their text-only view is kept, for
//! the most recent [`GRADED_RETENTION`] of them.

use crate::models::SpeakingSessionView;
use chrono::{DateTime, Utc};
use lingua_core::session::SpeakingSession;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct SessionEntry {
    pub student: String,
    pub unit_id: u32,
    pub created_at: DateTime<Utc>,
    pub token: CancellationToken,
    pub session: Mutex<SpeakingSession>,
}

pub const GRADED_RETENTION: usize = 256;

#[derive(Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
    graded: RwLock<VecDeque<(Uuid, SpeakingSessionView)>>,
}

impl SessionRegistry {
    pub async fn insert(
        &self,
        student: String,
        unit_id: u32,
        session: SpeakingSession,
    ) -> (Uuid, Arc<SessionEntry>) {
        let id = Uuid::new_v4();
        let entry = Arc::new(SessionEntry {
            student,
            unit_id,
            created_at: Utc::now(),
            token: CancellationToken::new(),
            session: Mutex::new(session),
        });
        self.entries.write().await.insert(id, entry.clone());
        (id, entry)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<SessionEntry>> {
        self.entries.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<SessionEntry>> {
        self.entries.write().await.remove(&id)
    }

    /// Drops a graded session's live state, keeping its final view.
    pub async fn retire(&self, id: Uuid, view: SpeakingSessionView) {
        {
            let mut graded = self.graded.write().await;
            graded.retain(|(graded_id, _)| *graded_id != id);
            graded.push_back((id, view));
            while graded.len() > GRADED_RETENTION {
                graded.pop_front();
            }
        }
        self.entries.write().await.remove(&id);
    }

    pub async fn graded(&self, id: Uuid) -> Option<SpeakingSessionView> {
        self.graded
            .read()
            .await
            .iter()
            .find(|(graded_id, _)| *graded_id == id)
            .map(|(_, view)| view.clone())
    }

    pub async fn forget_graded(&self, id: Uuid) -> Option<SpeakingSessionView> {
        let mut graded = self.graded.write().await;
        let index = graded.iter().position(|(graded_id, _)| *graded_id == id)?;
        graded.remove(index).map(|(_, view)| view)
    }

    /// Live sessions only.
    pub async fn ids(&self) -> Vec<Uuid> {
        self.entries.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
