//! Serving daily plans through the cache with a scripted generation service.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use coach_lib::config::Config;
use coach_lib::web::plan_task::{fetch_plan, PlanFetchError};
use coach_lib::web::put_profile_handler;
use serde_json::json;
use coach_lib::web::state::AppState;
use titanfit_core::memory::MemoryStore;
use titanfit_core::ports::{
    GenerationService, KeyValueStore, PortError, PortResult, VoiceLink, VoiceTransport,
};
use titanfit_core::{Goal, Language, Plan, PlanError, PlanKind, UserProfile};
use tokio::sync::oneshot;

const WORKOUT: &str = r#"```json
{"name": "Full Body Burn", "duration": "30 min", "intensity": "High", "exercises": [
  {"name": "Burpees", "sets": 3, "reps": "12", "description": "Explosive", "muscleGroup": "Full body"}
]}
```"#;

const MEALS: &str = r#"[
  {"time": "08:00", "name": "Oats", "calories": 350, "protein": 12, "carbs": 60, "fat": 6},
  {"time": "13:00", "name": "Chicken salad", "calories": 450, "protein": 40, "carbs": 20, "fat": 18}
]"#;

//=========================================================================================
// Fakes
//=========================================================================================

enum Scripted {
    Reply(&'static str),
    Fail,
    /// Replies once the test releases the gate.
    Gated(&'static str, oneshot::Receiver<()>),
}

#[derive(Default)]
struct ScriptedGeneration {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl ScriptedGeneration {
    fn with(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    async fn next(&self) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected generation call");
        match step {
            Scripted::Reply(text) => Ok(text.to_string()),
            Scripted::Fail => Err(PortError::Unexpected("quota exceeded".to_string())),
            Scripted::Gated(text, gate) => {
                let _ = gate.await;
                Ok(text.to_string())
            }
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn generate_workout(&self, _profile: &UserProfile) -> PortResult<String> {
        self.next().await
    }

    async fn generate_meal_plan(&self, _profile: &UserProfile) -> PortResult<String> {
        self.next().await
    }

    async fn chat(&self, _message: &str, _profile: &UserProfile) -> PortResult<String> {
        self.next().await
    }

    async fn fitness_tips(&self, _goal: Goal, _language: Language) -> PortResult<String> {
        self.next().await
    }
}

struct OfflineVoice;

#[async_trait]
impl VoiceTransport for OfflineVoice {
    async fn connect(&self) -> PortResult<VoiceLink> {
        Err(PortError::Closed("offline".to_string()))
    }
}

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: tracing::Level::DEBUG,
        data_dir: std::env::temp_dir(),
        allowed_origin: "http://localhost:3000".to_string(),
        api_key: None,
        generation_api_base: "http://localhost".to_string(),
        generation_model: "test-model".to_string(),
        voice_endpoint: "ws://localhost".to_string(),
        voice_model: "test-voice".to_string(),
        voice_name: "Zephyr".to_string(),
        mic_permission_timeout: Duration::from_secs(1),
    })
}

fn app_state(
    storage: Arc<MemoryStore>,
    generation: Arc<ScriptedGeneration>,
) -> Arc<AppState> {
    Arc::new(AppState::new(
        test_config(),
        storage,
        generation,
        Arc::new(OfflineVoice),
    ))
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn cache_miss_generates_and_later_requests_hit_the_cache() {
    let generation = ScriptedGeneration::with(vec![Scripted::Reply(WORKOUT)]);
    let state = app_state(Arc::new(MemoryStore::new()), generation.clone());

    let first = fetch_plan(&state, PlanKind::Workout, false).await.unwrap();
    let second = fetch_plan(&state, PlanKind::Workout, false).await.unwrap();

    assert_eq!(first, second);
    let Plan::Workout(workout) = first else {
        panic!("expected a workout");
    };
    assert_eq!(workout.name, "Full Body Burn");
    assert_eq!(workout.exercises[0].sets, 3);
    assert_eq!(generation.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_plan_survives_a_restart() {
    let storage = Arc::new(MemoryStore::new());
    let generation = ScriptedGeneration::with(vec![Scripted::Reply(MEALS)]);
    fetch_plan(&app_state(storage.clone(), generation), PlanKind::Meal, false)
        .await
        .unwrap();

    let restarted = app_state(storage, ScriptedGeneration::with(vec![]));
    let Plan::Meals(meals) = fetch_plan(&restarted, PlanKind::Meal, false).await.unwrap() else {
        panic!("expected a meal plan");
    };
    assert_eq!(meals.meals().len(), 2);
    assert_eq!(meals.totals().calories, 800.0);
    assert_eq!(meals.totals().protein, 52.0);
}

#[tokio::test]
async fn invalid_generation_is_rejected_and_keeps_the_previous_plan() {
    let generation = ScriptedGeneration::with(vec![
        Scripted::Reply(WORKOUT),
        Scripted::Reply(r#"{"name": "Broken", "exercises": [{"name": "Squat", "sets": "three"}]}"#),
    ]);
    let state = app_state(Arc::new(MemoryStore::new()), generation);

    let original = fetch_plan(&state, PlanKind::Workout, false).await.unwrap();
    let err = fetch_plan(&state, PlanKind::Workout, true).await.unwrap_err();

    let PlanFetchError::Plan(PlanError::Invalid(validation)) = err else {
        panic!("expected a validation failure, got {err:?}");
    };
    let paths: Vec<&str> = validation.issues().iter().map(|i| i.path.as_str()).collect();
    assert!(paths.contains(&"duration"));
    assert!(paths.contains(&"exercises[0].sets"));
    assert_eq!(
        fetch_plan(&state, PlanKind::Workout, false).await.unwrap(),
        original
    );
}

#[tokio::test]
async fn failed_generation_reports_the_plan_kind() {
    let generation = ScriptedGeneration::with(vec![Scripted::Fail]);
    let state = app_state(Arc::new(MemoryStore::new()), generation);

    let err = fetch_plan(&state, PlanKind::Meal, false).await.unwrap_err();
    assert!(matches!(err, PlanFetchError::Generation(PlanKind::Meal, _)));
}

#[tokio::test]
async fn overtaken_request_is_stale_and_newest_plan_wins() {
    let (release, gate) = oneshot::channel();
    let generation = ScriptedGeneration::with(vec![
        Scripted::Gated(WORKOUT, gate),
        Scripted::Reply(
            r#"{"name": "Quick Core", "duration": "10 min", "intensity": "Low", "exercises": []}"#,
        ),
    ]);
    let storage = Arc::new(MemoryStore::new());
    let state = app_state(storage.clone(), generation.clone());

    let slow_state = state.clone();
    let slow = tokio::spawn(async move { fetch_plan(&slow_state, PlanKind::Workout, true).await });
    while generation.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let newest = fetch_plan(&state, PlanKind::Workout, true).await.unwrap();
    release.send(()).unwrap();
    let overtaken = slow.await.unwrap();

    assert!(matches!(
        overtaken,
        Err(PlanFetchError::Plan(PlanError::Stale(PlanKind::Workout)))
    ));
    assert_eq!(
        fetch_plan(&state, PlanKind::Workout, false).await.unwrap(),
        newest
    );
    assert!(storage
        .get("titanfit_daily_workout")
        .unwrap()
        .is_some_and(|raw| raw.contains("Quick Core")));
}

#[tokio::test]
async fn reset_wipes_cached_plans() {
    let storage = Arc::new(MemoryStore::new());
    let generation = ScriptedGeneration::with(vec![Scripted::Reply(WORKOUT), Scripted::Fail]);
    let state = app_state(storage.clone(), generation);

    fetch_plan(&state, PlanKind::Workout, false).await.unwrap();
    state.profile_store.reset();

    assert!(storage.is_empty());
    assert!(matches!(
        fetch_plan(&state, PlanKind::Workout, false).await,
        Err(PlanFetchError::Generation(..))
    ));
}

#[tokio::test]
async fn changing_the_profile_invalidates_cached_plans() {
    let generation = ScriptedGeneration::with(vec![
        Scripted::Reply(WORKOUT),
        Scripted::Reply(
            r#"{"name": "Quick Core", "duration": "10 min", "intensity": "Low", "exercises": []}"#,
        ),
    ]);
    let state = app_state(Arc::new(MemoryStore::new()), generation.clone());
    let profile = json!({"name": "Ana", "age": 31, "weight": 70, "height": 165,
        "targetWeight": 64, "goal": "Weight Loss", "language": "pt"});

    put_profile_handler(State(state.clone()), Json(profile.clone()))
        .await
        .unwrap();
    fetch_plan(&state, PlanKind::Workout, false).await.unwrap();

    // Saving the same profile again keeps the cached plan.
    put_profile_handler(State(state.clone()), Json(profile.clone()))
        .await
        .unwrap();
    fetch_plan(&state, PlanKind::Workout, false).await.unwrap();
    assert_eq!(generation.calls.load(Ordering::SeqCst), 1);

    let mut edited = profile;
    edited["targetWeight"] = json!(60);
    put_profile_handler(State(state.clone()), Json(edited))
        .await
        .unwrap();
    let Plan::Workout(workout) = fetch_plan(&state, PlanKind::Workout, false).await.unwrap() else {
        panic!("expected a workout");
    };
    assert_eq!(workout.name, "Quick Core");
    assert_eq!(generation.calls.load(Ordering::SeqCst), 2);
}
