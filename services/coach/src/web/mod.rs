pub mod plan_task;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use rest::{
    add_progress_handler, chat_handler, delete_profile_handler, get_profile_handler,
    get_water_handler, insights_handler, meal_plan_handler, put_profile_handler,
    put_water_handler, workout_plan_handler,
};
pub use ws_handler::live_handler;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;

/// All API routes with the shared state attached.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/profile",
            get(get_profile_handler)
                .put(put_profile_handler)
                .delete(delete_profile_handler),
        )
        .route("/progress", post(add_progress_handler))
        .route("/plans/workout", get(workout_plan_handler))
        .route("/plans/meals", get(meal_plan_handler))
        .route("/chat", post(chat_handler))
        .route("/insights", get(insights_handler))
        .route("/water", get(get_water_handler).put(put_water_handler))
        .route("/live", get(live_handler))
        .with_state(app_state)
}
