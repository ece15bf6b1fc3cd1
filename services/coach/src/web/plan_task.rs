//! services/coach/src/web/plan_task.rs
//!
//! This module contains the asynchronous "worker" function that serves a daily
//! plan: from the cache when possible, otherwise from the generation service.

use crate::web::state::AppState;
use titanfit_core::ports::PortError;
use titanfit_core::{Plan, PlanError, PlanKind};
use tracing::{info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum PlanFetchError {
    #[error("the {0} could not be generated: {1}")]
    Generation(PlanKind, PortError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Returns the plan of `kind`, generating a new one on a cache miss or when
/// `refresh` is set.
///
/// The cache lock is not held while the generation service runs. A response
/// that was overtaken by a newer request for the same kind comes back as
/// `PlanError::Stale`, and a failed generation leaves the cached plan untouched.
#[instrument(skip(app_state))]
pub async fn fetch_plan(
    app_state: &AppState,
    kind: PlanKind,
    refresh: bool,
) -> Result<Plan, PlanFetchError> {
    let token = {
        let mut cache = app_state.plan_cache.lock().await;
        if !refresh {
            if let Some(plan) = cache.get(kind) {
                info!("Serving cached {}.", kind);
                return Ok(plan);
            }
        }
        cache.begin(kind)
    };

    let profile = app_state.profile.lock().await.profile.clone();
    info!("Generating a new {}.", kind);
    let raw = match kind {
        PlanKind::Workout => app_state.generation.generate_workout(&profile).await,
        PlanKind::Meal => app_state.generation.generate_meal_plan(&profile).await,
    }
    .map_err(|e| {
        warn!("Generation failed for {}: {}", kind, e);
        PlanFetchError::Generation(kind, e)
    })?;

    let plan = app_state.plan_cache.lock().await.commit(token, &raw)?;
    Ok(plan)
}
