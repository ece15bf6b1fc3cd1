//! crates/titanfit_core/src/profile_store.rs
//!
//! The persisted profile and weigh-in series.
//!
//! Loading never fails outward: a corrupt record wipes the store and the
//! defaults are returned. Writes only happen once onboarding has produced a
//! name, and both records go out in a single batch.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{seeded_progress, ProgressEntry, UserProfile};
use crate::ports::{KeyValueStore, PortError, PortResult};

pub const PROFILE_KEY: &str = "titanfit_profile_v2";
pub const PROGRESS_KEY: &str = "titanfit_progress_v2";
pub const WATER_KEY: &str = "titanfit_water_count";

/// Everything the views need at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub profile: UserProfile,
    pub progress: Vec<ProgressEntry>,
}

impl Default for LoadedState {
    fn default() -> Self {
        Self {
            profile: UserProfile::default(),
            progress: seeded_progress(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The profile has no name yet, so onboarding is still in progress.
    Skipped,
    /// The write failed and was logged; the previous records are intact.
    Failed,
}

#[derive(Debug, thiserror::Error)]
enum CorruptRecord {
    #[error("{key} is not valid JSON: {source}")]
    Json {
        key: &'static str,
        source: serde_json::Error,
    },
    #[error("{key} has the wrong shape: {reason}")]
    Shape { key: &'static str, reason: String },
    #[error(transparent)]
    Storage(#[from] PortError),
}

pub struct ProfileStore {
    storage: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Loads the profile merged over the defaults and the progress series.
    pub fn load(&self) -> LoadedState {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Persisted state is corrupt, wiping storage: {}", e);
                if let Err(e) = self.storage.clear() {
                    warn!("Failed to wipe corrupt storage: {}", e);
                }
                LoadedState::default()
            }
        }
    }

    fn try_load(&self) -> Result<LoadedState, CorruptRecord> {
        let profile = match self.storage.get(PROFILE_KEY)? {
            None => UserProfile::default(),
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw).map_err(|source| {
                    CorruptRecord::Json {
                        key: PROFILE_KEY,
                        source,
                    }
                })?;
                let Value::Object(object) = value else {
                    return Err(CorruptRecord::Shape {
                        key: PROFILE_KEY,
                        reason: "expected an object".to_string(),
                    });
                };
                let repaired = UserProfile::repair(&object);
                if !repaired.repaired_fields.is_empty() {
                    debug!(
                        "Profile fields restored to defaults: {:?}",
                        repaired.repaired_fields
                    );
                }
                repaired.profile
            }
        };

        let progress = match self.storage.get(PROGRESS_KEY)? {
            None => seeded_progress(),
            Some(raw) => serde_json::from_str::<Vec<ProgressEntry>>(&raw).map_err(|source| {
                CorruptRecord::Json {
                    key: PROGRESS_KEY,
                    source,
                }
            })?,
        };

        Ok(LoadedState { profile, progress })
    }

    /// Persists both records together once the profile has a name.
    pub fn save(&self, profile: &UserProfile, progress: &[ProgressEntry]) -> SaveOutcome {
        if !profile.onboarding_complete() {
            debug!("Profile has no name yet; skipping save.");
            return SaveOutcome::Skipped;
        }
        match self.write(profile, progress) {
            Ok(()) => SaveOutcome::Saved,
            Err(e) => {
                warn!("Failed to persist profile and progress: {}", e);
                SaveOutcome::Failed
            }
        }
    }

    fn write(&self, profile: &UserProfile, progress: &[ProgressEntry]) -> PortResult<()> {
        let profile_json =
            serde_json::to_string(profile).map_err(|e| PortError::Storage(e.to_string()))?;
        let progress_json =
            serde_json::to_string(progress).map_err(|e| PortError::Storage(e.to_string()))?;
        self.storage
            .set_many(&[(PROFILE_KEY, profile_json), (PROGRESS_KEY, progress_json)])
    }

    /// Wipes every persisted record. The caller reloads defaults afterwards.
    pub fn reset(&self) {
        info!("Resetting all persisted state.");
        if let Err(e) = self.storage.clear() {
            warn!("Failed to clear storage: {}", e);
        }
    }
}

/// Adds a weigh-in to the end of the series.
///
/// Entries are kept in insertion order; dates are display strings and are
/// neither sorted nor de-duplicated.
pub fn append_progress(
    progress: &mut Vec<ProgressEntry>,
    entry: ProgressEntry,
) -> Result<(), InvalidEntry> {
    if !entry.is_valid() {
        return Err(InvalidEntry {
            weight: entry.weight,
            calories_burned: entry.calories_burned,
        });
    }
    progress.push(entry);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("weigh-in needs a positive weight and non-negative calories (got {weight} kg, {calories_burned} kcal)")]
pub struct InvalidEntry {
    pub weight: f64,
    pub calories_burned: f64,
}

//=========================================================================================
// Water Counter
//=========================================================================================

/// The nutrition view's glasses-of-water counter.
pub struct WaterLog {
    storage: Arc<dyn KeyValueStore>,
}

impl WaterLog {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    pub fn get(&self) -> u32 {
        match self.storage.get(WATER_KEY) {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!("Failed to read water counter: {}", e);
                0
            }
        }
    }

    /// Stores the count, clamped at zero, and returns what was stored.
    pub fn set(&self, count: i64) -> u32 {
        let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
        if let Err(e) = self.storage.set(WATER_KEY, &count.to_string()) {
            warn!("Failed to persist water counter: {}", e);
        }
        count
    }
}
