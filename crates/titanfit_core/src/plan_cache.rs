//! crates/titanfit_core/src/plan_cache.rs
//!
//! The most recently accepted workout and meal plan, persisted per device.
//!
//! Generation happens outside the cache. Callers take a [`RequestToken`]
//! before asking the generation service and hand the raw response back
//! through [`PlanCache::commit`], which validates first and then refuses any
//! response that was overtaken by a newer request for the same kind.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Plan, PlanKind};
use crate::plan::{parse_plan, PlanValidationError};
use crate::ports::{KeyValueStore, PortError, PortResult};

pub const WORKOUT_KEY: &str = "titanfit_daily_workout";
pub const MEAL_PLAN_KEY: &str = "titanfit_daily_meals";

fn storage_key(kind: PlanKind) -> &'static str {
    match kind {
        PlanKind::Workout => WORKOUT_KEY,
        PlanKind::Meal => MEAL_PLAN_KEY,
    }
}

/// Identifies one generation request for a plan kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken {
    kind: PlanKind,
    sequence: u64,
}

impl RequestToken {
    pub fn kind(&self) -> PlanKind {
        self.kind
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Invalid(#[from] PlanValidationError),
    #[error("a newer {0} request superseded this response")]
    Stale(PlanKind),
    #[error("failed to store the plan: {0}")]
    Storage(#[from] PortError),
}

pub struct PlanCache {
    storage: Arc<dyn KeyValueStore>,
    latest: HashMap<PlanKind, u64>,
}

impl PlanCache {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            latest: HashMap::new(),
        }
    }

    /// Returns the cached plan, or `None` on a miss.
    ///
    /// A stored value that no longer validates is removed and treated as a miss.
    pub fn get(&self, kind: PlanKind) -> Option<Plan> {
        let key = storage_key(kind);
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read cached {}: {}", kind.label(), e);
                return None;
            }
        };
        match parse_plan(kind, &raw) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!("Dropping unreadable cached {}: {}", kind.label(), e);
                if let Err(e) = self.storage.remove(key) {
                    warn!("Failed to remove cached {}: {}", kind.label(), e);
                }
                None
            }
        }
    }

    /// Replaces the cached plan of the plan's kind.
    pub fn put(&self, plan: &Plan) -> PortResult<()> {
        let json = match plan {
            Plan::Workout(workout) => serde_json::to_string(workout),
            Plan::Meals(meals) => serde_json::to_string(meals),
        }
        .map_err(|e| PortError::Storage(e.to_string()))?;
        self.storage.set(storage_key(plan.kind()), &json)
    }

    /// Forgets the cached plan so the next `get` misses. Requests already in
    /// flight for that kind become stale, so they cannot bring the plan back.
    pub fn invalidate(&mut self, kind: PlanKind) {
        info!("Invalidating cached {}.", kind.label());
        *self.latest.entry(kind).or_insert(0) += 1;
        if let Err(e) = self.storage.remove(storage_key(kind)) {
            warn!("Failed to invalidate cached {}: {}", kind.label(), e);
        }
    }

    /// Registers a new generation request. Any older token for the same kind
    /// becomes stale.
    pub fn begin(&mut self, kind: PlanKind) -> RequestToken {
        let sequence = self.latest.entry(kind).or_insert(0);
        *sequence += 1;
        RequestToken {
            kind,
            sequence: *sequence,
        }
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.get(&token.kind).copied() == Some(token.sequence)
    }

    /// Validates a generated response and caches it if its request is still
    /// the newest one for that kind. On any error the cache is left untouched.
    pub fn commit(&mut self, token: RequestToken, raw: &str) -> Result<Plan, PlanError> {
        let plan = parse_plan(token.kind, raw)?;
        if !self.is_current(token) {
            debug!("Discarding stale {} response.", token.kind.label());
            return Err(PlanError::Stale(token.kind));
        }
        self.put(&plan)?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Exercise, Workout};
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn workout(name: &str) -> Workout {
        Workout {
            name: name.to_string(),
            duration: "20 min".into(),
            intensity: "Medium".into(),
            exercises: vec![Exercise {
                name: "Plank".into(),
                sets: 3,
                reps: "45s".into(),
                description: "Hold".into(),
                muscle_group: "Core".into(),
            }],
        }
    }

    fn raw_workout(name: &str) -> String {
        serde_json::to_string(&workout(name)).unwrap()
    }

    #[test]
    fn empty_cache_misses() {
        let cache = PlanCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.get(PlanKind::Workout), None);
        assert_eq!(cache.get(PlanKind::Meal), None);
    }

    #[test]
    fn put_then_get_hits_and_invalidate_misses() {
        let mut cache = PlanCache::new(Arc::new(MemoryStore::new()));
        let plan = Plan::Workout(workout("Core Crusher"));
        cache.put(&plan).unwrap();
        assert_eq!(cache.get(PlanKind::Workout), Some(plan));

        cache.invalidate(PlanKind::Workout);
        assert_eq!(cache.get(PlanKind::Workout), None);
    }

    #[test]
    fn invalidate_supersedes_requests_in_flight() {
        let mut cache = PlanCache::new(Arc::new(MemoryStore::new()));
        let token = cache.begin(PlanKind::Workout);

        cache.invalidate(PlanKind::Workout);

        assert!(!cache.is_current(token));
        assert!(matches!(
            cache.commit(token, &raw_workout("Old profile")),
            Err(PlanError::Stale(PlanKind::Workout))
        ));
        assert_eq!(cache.get(PlanKind::Workout), None);
    }

    #[test]
    fn invalid_generation_keeps_the_previous_plan() {
        let mut cache = PlanCache::new(Arc::new(MemoryStore::new()));
        let previous = Plan::Workout(workout("Yesterday"));
        cache.put(&previous).unwrap();

        let token = cache.begin(PlanKind::Workout);
        let broken = json!({"name": "Half", "exercises": []}).to_string();
        let err = cache.commit(token, &broken).unwrap_err();

        assert!(matches!(err, PlanError::Invalid(_)));
        assert_eq!(cache.get(PlanKind::Workout), Some(previous));
    }

    #[test]
    fn late_response_cannot_overwrite_a_newer_one() {
        let mut cache = PlanCache::new(Arc::new(MemoryStore::new()));
        let first = cache.begin(PlanKind::Workout);
        let second = cache.begin(PlanKind::Workout);

        cache.commit(second, &raw_workout("Fresh")).unwrap();
        let err = cache.commit(first, &raw_workout("Stale")).unwrap_err();

        assert!(matches!(err, PlanError::Stale(PlanKind::Workout)));
        assert_eq!(
            cache.get(PlanKind::Workout),
            Some(Plan::Workout(workout("Fresh")))
        );
    }

    #[test]
    fn tokens_are_tracked_per_kind() {
        let mut cache = PlanCache::new(Arc::new(MemoryStore::new()));
        let workout_token = cache.begin(PlanKind::Workout);
        let _meal_token = cache.begin(PlanKind::Meal);
        assert!(cache.is_current(workout_token));
    }

    #[test]
    fn unreadable_stored_plan_is_dropped() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(MEAL_PLAN_KEY, "[{\"time\": 1}]").unwrap();
        let cache = PlanCache::new(storage.clone());

        assert_eq!(cache.get(PlanKind::Meal), None);
        assert_eq!(storage.get(MEAL_PLAN_KEY).unwrap(), None);
    }
}
