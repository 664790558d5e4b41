//! Student progress records and the key-value seam they are stored behind.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use thiserror::Error;
use tokio::sync::RwLock;

pub const PROFILE_KEY_PREFIX: &str = "lingua_stats_";

/// Derives the store key for a student: the prefix plus the display name
/// with every whitespace run replaced by `_`.
pub fn profile_key(name: &str) -> String {
    let mut key = String::from(PROFILE_KEY_PREFIX);
    let mut in_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                key.push('_');
            }
            in_space = true;
        } else {
            key.push(c);
            in_space = false;
        }
    }
    key
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Skill {
    Speaking,
    Writing,
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skill::Speaking => write!(f, "speaking"),
            Skill::Writing => write!(f, "writing"),
        }
    }
}

/// A student's cumulative progress. Always read and written as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "speakingScore", default)]
    pub speaking_scores: Vec<f64>,
    #[serde(rename = "writingScore", default)]
    pub writing_scores: Vec<f64>,
    #[serde(default)]
    pub lessons_completed: u32,
    pub streak: u32,
    pub last_practice: DateTime<Utc>,
}

impl StudentProfile {
    /// A fresh profile. The streak starts at one day.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            speaking_scores: Vec::new(),
            writing_scores: Vec::new(),
            lessons_completed: 0,
            streak: 1,
            last_practice: now,
        }
    }

    pub fn scores(&self, skill: Skill) -> &[f64] {
        match skill {
            Skill::Speaking => &self.speaking_scores,
            Skill::Writing => &self.writing_scores,
        }
    }

    pub fn average(&self, skill: Skill) -> Option<f64> {
        let scores = self.scores(skill);
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// Folds one completed unit into the profile.
    pub fn record(&mut self, skill: Skill, total: f64, now: DateTime<Utc>) {
        match skill {
            Skill::Speaking => self.speaking_scores.push(total),
            Skill::Writing => self.writing_scores.push(total),
        }
        self.lessons_completed += 1;
        self.streak = next_streak(self.streak, self.last_practice.date_naive(), now.date_naive());
        self.last_practice = now;
    }
}

/// Same day keeps the streak, the next day extends it, any longer gap resets it.
fn next_streak(streak: u32, last: NaiveDate, today: NaiveDate) -> u32 {
    match (today - last).num_days() {
        0 => streak.max(1),
        1 => streak + 1,
        _ => 1,
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stored profile '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value persistence for profiles. Writes replace the whole record.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<StudentProfile>, StoreError>;
    async fn save(&self, key: &str, profile: &StudentProfile) -> Result<(), StoreError>;
}

/// A process-local store, used in tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryProfileStore {
    records: RwLock<HashMap<String, StudentProfile>>,
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self, key: &str) -> Result<Option<StudentProfile>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, profile: &StudentProfile) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), profile.clone());
        Ok(())
    }
}

/// Loads a student's profile, creating and saving an empty one on first use.
pub async fn load_or_create(
    store: &dyn ProfileStore,
    name: &str,
    now: DateTime<Utc>,
) -> Result<StudentProfile, StoreError> {
    let key = profile_key(name);
    if let Some(profile) = store.load(&key).await? {
        return Ok(profile);
    }
    let profile = StudentProfile::new(name, now);
    store.save(&key, &profile).await?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_profile_key_collapses_whitespace() {
        assert_eq!(profile_key("Vu Thi Ha Vy"), "lingua_stats_Vu_Thi_Ha_Vy");
        assert_eq!(profile_key("Le  Kim\tPhat"), "lingua_stats_Le_Kim_Phat");
    }

    #[test]
    fn test_streak_rules() {
        let mut profile = StudentProfile::new("Pham Anh Thu", at(1, 8));
        profile.record(Skill::Speaking, 7.5, at(1, 20));
        assert_eq!(profile.streak, 1);

        profile.record(Skill::Writing, 6.0, at(2, 9));
        assert_eq!(profile.streak, 2);
        profile.record(Skill::Writing, 8.0, at(3, 23));
        assert_eq!(profile.streak, 3);

        profile.record(Skill::Speaking, 5.0, at(3, 23) + Duration::days(3));
        assert_eq!(profile.streak, 1);
        assert_eq!(profile.lessons_completed, 4);
    }

    #[test]
    fn test_averages() {
        let mut profile = StudentProfile::new("Pham Anh Thu", at(1, 8));
        assert!(profile.average(Skill::Speaking).is_none());
        profile.record(Skill::Speaking, 7.0, at(1, 9));
        profile.record(Skill::Speaking, 8.0, at(1, 10));
        assert_abs_diff_eq!(profile.average(Skill::Speaking).unwrap(), 7.5);
        assert!(profile.average(Skill::Writing).is_none());
    }

    #[test]
    fn test_profile_wire_format() {
        let profile = StudentProfile::new("Pham Anh Thu", at(1, 8));
        let value = serde_json::to_value(&profile).unwrap();
        assert!(value.get("speakingScore").is_some());
        assert!(value.get("writingScore").is_some());
        assert_eq!(value["lessonsCompleted"], 0);
        assert_eq!(value["streak"], 1);

        let stored = r#"{"speakingScore":[6.5],"writingScore":[],"lessonsCompleted":1,"streak":2,"lastPractice":"2025-03-01T08:00:00.000Z"}"#;
        let parsed: StudentProfile = serde_json::from_str(stored).unwrap();
        assert_eq!(parsed.speaking_scores, vec![6.5]);
        assert_eq!(parsed.name, "");
    }

    #[tokio::test]
    async fn test_load_or_create_persists_new_profile() {
        let store = MemoryProfileStore::default();
        let created = load_or_create(&store, "Tran Huu Quang", at(1, 8)).await.unwrap();
        assert_eq!(created.lessons_completed, 0);

        let stored = store
            .load("lingua_stats_Tran_Huu_Quang")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, created);

        let mut updated = stored.clone();
        updated.record(Skill::Speaking, 9.0, at(2, 8));
        store.save(&profile_key("Tran Huu Quang"), &updated).await.unwrap();
        let again = load_or_create(&store, "Tran Huu Quang", at(5, 8)).await.unwrap();
        assert_eq!(again.speaking_scores, vec![9.0]);
    }
}
