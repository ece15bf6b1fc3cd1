//! services/coach/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{
    plan_task::{fetch_plan, PlanFetchError},
    state::AppState,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use titanfit_core::coach::{goal_progress_percent, parse_coach_reply, parse_fitness_tips};
use titanfit_core::domain::{MealTotals, ProgressEntry, UserProfile, Workout};
use titanfit_core::profile_store::append_progress;
use titanfit_core::{IntelItem, LoadedState, Meal, Plan, PlanError, PlanKind, SaveOutcome};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_profile_handler,
        put_profile_handler,
        delete_profile_handler,
        add_progress_handler,
        workout_plan_handler,
        meal_plan_handler,
        chat_handler,
        insights_handler,
        get_water_handler,
        put_water_handler,
    ),
    components(
        schemas(
            ProfileResponse,
            ProgressRequest,
            ProgressResponse,
            PlanQuery,
            WorkoutResponse,
            MealPlanResponse,
            ChatRequest,
            ChatResponse,
            InsightsResponse,
            WaterCount,
        )
    ),
    tags(
        (name = "TitanFit Coach API", description = "Profile, plans and coaching for the TitanFit client.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The profile and weigh-in series as the views consume them.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[schema(value_type = Object)]
    profile: UserProfile,
    #[schema(value_type = Vec<Object>)]
    progress: Vec<ProgressEntry>,
    onboarding_complete: bool,
    goal_progress_percent: f64,
    /// Fields of a submitted profile that were missing or invalid and fell back to defaults.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    repaired_fields: Vec<String>,
    /// Whether the last write reached durable storage.
    persisted: bool,
}

impl ProfileResponse {
    fn from_state(state: &LoadedState, persisted: bool) -> Self {
        Self {
            profile: state.profile.clone(),
            progress: state.progress.clone(),
            onboarding_complete: state.profile.onboarding_complete(),
            goal_progress_percent: goal_progress_percent(&state.profile, &state.progress),
            repaired_fields: Vec::new(),
            persisted,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    /// Display date; defaults to today as `dd/mm`.
    date: Option<String>,
    weight: f64,
    #[serde(default)]
    calories_burned: f64,
}

#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    #[schema(value_type = Vec<Object>)]
    progress: Vec<ProgressEntry>,
    persisted: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct PlanQuery {
    /// Generate a new plan even on a cache hit. The cached plan stays in place
    /// until the new one has been validated.
    #[serde(default)]
    refresh: bool,
}

#[derive(Serialize, ToSchema)]
pub struct WorkoutResponse {
    #[schema(value_type = Object)]
    workout: Workout,
}

#[derive(Serialize, ToSchema)]
pub struct MealPlanResponse {
    #[schema(value_type = Vec<Object>)]
    meals: Vec<Meal>,
    #[schema(value_type = Object)]
    totals: MealTotals,
}

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    text: String,
    /// A table-shaped plan extracted from the reply, if any.
    #[schema(value_type = Option<Object>)]
    plan: Option<titanfit_core::coach::PlanData>,
}

#[derive(Serialize, ToSchema)]
pub struct InsightsResponse {
    #[schema(value_type = Vec<Object>)]
    items: Vec<IntelItem>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WaterCount {
    count: i64,
}

//=========================================================================================
// Profile Handlers
//=========================================================================================

/// Get the profile, the weigh-in series and the derived dashboard figures.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "The current profile", body = ProfileResponse)
    )
)]
pub async fn get_profile_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let state = app_state.profile.lock().await;
    Ok(Json(ProfileResponse::from_state(&state, true)))
}

/// Replace the profile.
///
/// Missing or invalid fields are repaired from defaults and listed in the response.
/// Nothing is written until the profile has a name.
#[utoipa::path(
    put,
    path = "/profile",
    request_body(content_type = "application/json", description = "The profile as edited in onboarding or settings."),
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "The body is not a JSON object")
    )
)]
pub async fn put_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Value::Object(object) = body else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Profile must be a JSON object".to_string(),
        ));
    };
    let repaired = UserProfile::repair(&object);
    if !repaired.repaired_fields.is_empty() {
        warn!(fields = ?repaired.repaired_fields, "Submitted profile was repaired.");
    }

    let mut state = app_state.profile.lock().await;
    let changed = state.profile != repaired.profile;
    state.profile = repaired.profile;
    let outcome = app_state
        .profile_store
        .save(&state.profile, &state.progress);
    let mut response = ProfileResponse::from_state(&state, outcome == SaveOutcome::Saved);
    drop(state);

    // Plans were generated for the previous profile.
    if changed {
        let mut cache = app_state.plan_cache.lock().await;
        cache.invalidate(PlanKind::Workout);
        cache.invalidate(PlanKind::Meal);
    }

    response.repaired_fields = repaired
        .repaired_fields
        .iter()
        .map(|field| field.to_string())
        .collect();
    Ok(Json(response))
}

/// Erase every stored record and return to the onboarding defaults.
#[utoipa::path(
    delete,
    path = "/profile",
    responses(
        (status = 200, description = "All data erased", body = ProfileResponse)
    )
)]
pub async fn delete_profile_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut state = app_state.profile.lock().await;
    app_state.profile_store.reset();
    *state = app_state.profile_store.load();
    info!("Profile reset to defaults.");
    Ok(Json(ProfileResponse::from_state(&state, true)))
}

/// Record a weigh-in.
#[utoipa::path(
    post,
    path = "/progress",
    request_body = ProgressRequest,
    responses(
        (status = 201, description = "Weigh-in recorded", body = ProgressResponse),
        (status = 422, description = "Weight must be positive and calories non-negative")
    )
)]
pub async fn add_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ProgressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = ProgressEntry {
        date: request
            .date
            .filter(|date| !date.trim().is_empty())
            .unwrap_or_else(today_label),
        weight: request.weight,
        calories_burned: request.calories_burned,
    };

    let mut state = app_state.profile.lock().await;
    append_progress(&mut state.progress, entry)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let outcome = app_state
        .profile_store
        .save(&state.profile, &state.progress);

    let response = ProgressResponse {
        progress: state.progress.clone(),
        persisted: outcome == SaveOutcome::Saved,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

fn today_label() -> String {
    chrono::Local::now().format("%d/%m").to_string()
}

//=========================================================================================
// Plan Handlers
//=========================================================================================

/// Get today's workout, generating one on a cache miss.
#[utoipa::path(
    get,
    path = "/plans/workout",
    params(
        ("refresh" = Option<bool>, Query, description = "Generate a new workout even if one is cached.")
    ),
    responses(
        (status = 200, description = "Today's workout", body = WorkoutResponse),
        (status = 409, description = "A newer request replaced this one"),
        (status = 502, description = "The generated workout failed validation"),
        (status = 503, description = "The generation service is unavailable")
    )
)]
pub async fn workout_plan_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<PlanQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match fetch_plan(&app_state, PlanKind::Workout, query.refresh).await {
        Ok(Plan::Workout(workout)) => Ok(Json(WorkoutResponse { workout })),
        Ok(other) => Err(unexpected_plan(other)),
        Err(e) => Err(plan_error_response(e)),
    }
}

/// Get today's meal plan with its daily totals, generating one on a cache miss.
#[utoipa::path(
    get,
    path = "/plans/meals",
    params(
        ("refresh" = Option<bool>, Query, description = "Generate a new meal plan even if one is cached.")
    ),
    responses(
        (status = 200, description = "Today's meal plan", body = MealPlanResponse),
        (status = 409, description = "A newer request replaced this one"),
        (status = 502, description = "The generated meal plan failed validation"),
        (status = 503, description = "The generation service is unavailable")
    )
)]
pub async fn meal_plan_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<PlanQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match fetch_plan(&app_state, PlanKind::Meal, query.refresh).await {
        Ok(Plan::Meals(plan)) => Ok(Json(MealPlanResponse {
            totals: plan.totals(),
            meals: plan.0,
        })),
        Ok(other) => Err(unexpected_plan(other)),
        Err(e) => Err(plan_error_response(e)),
    }
}

fn unexpected_plan(plan: Plan) -> (StatusCode, String) {
    error!("Plan cache returned a {} for the wrong route.", plan.kind());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Unexpected plan kind".to_string(),
    )
}

fn plan_error_response(error: PlanFetchError) -> (StatusCode, String) {
    match error {
        PlanFetchError::Generation(kind, _) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Could not generate a {} right now. Please try again.", kind),
        ),
        PlanFetchError::Plan(PlanError::Invalid(e)) => {
            warn!("Rejected generated plan: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        }
        PlanFetchError::Plan(PlanError::Stale(kind)) => (
            StatusCode::CONFLICT,
            format!("A newer {} request replaced this one.", kind),
        ),
        PlanFetchError::Plan(PlanError::Storage(e)) => {
            error!("Failed to store plan: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store the plan".to_string(),
            )
        }
    }
}

//=========================================================================================
// Coach Handlers
//=========================================================================================

/// Ask the coach a question. A plan embedded in the reply is returned separately.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The coach's reply", body = ChatResponse),
        (status = 400, description = "Empty message"),
        (status = 503, description = "The generation service is unavailable")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message is empty".to_string()));
    }

    let profile = app_state.profile.lock().await.profile.clone();
    let response = app_state
        .generation
        .chat(message, &profile)
        .await
        .map_err(|e| {
            error!("Coach chat failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "The coach is unavailable right now. Please try again.".to_string(),
            )
        })?;

    let reply = parse_coach_reply(&response, profile.language);
    Ok(Json(ChatResponse {
        text: reply.text,
        plan: reply.plan,
    }))
}

/// Get up to three tips for the profile's goal. Failures yield an empty list.
#[utoipa::path(
    get,
    path = "/insights",
    responses(
        (status = 200, description = "Dashboard tips", body = InsightsResponse)
    )
)]
pub async fn insights_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = app_state.profile.lock().await.profile.clone();
    let items = match app_state
        .generation
        .fitness_tips(profile.goal, profile.language)
        .await
    {
        Ok(text) => parse_fitness_tips(&text, profile.goal.as_str()),
        Err(e) => {
            warn!("Intelligence failed: {}", e);
            Vec::new()
        }
    };
    Ok(Json(InsightsResponse { items }))
}

//=========================================================================================
// Water Handlers
//=========================================================================================

/// Get today's glasses-of-water count.
#[utoipa::path(
    get,
    path = "/water",
    responses(
        (status = 200, description = "The current count", body = WaterCount)
    )
)]
pub async fn get_water_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    Ok(Json(WaterCount {
        count: i64::from(app_state.water.get()),
    }))
}

/// Set the glasses-of-water count. Negative counts are stored as zero.
#[utoipa::path(
    put,
    path = "/water",
    request_body = WaterCount,
    responses(
        (status = 200, description = "The stored count", body = WaterCount)
    )
)]
pub async fn put_water_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<WaterCount>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let count = app_state.water.set(request.count);
    Ok(Json(WaterCount {
        count: i64::from(count),
    }))
}
