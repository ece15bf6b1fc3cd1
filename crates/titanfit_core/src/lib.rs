pub mod audio;
pub mod coach;
pub mod domain;
pub mod memory;
pub mod plan;
pub mod plan_cache;
pub mod ports;
pub mod profile_store;

pub use domain::{
    ActivityLevel, Exercise, Gender, Goal, IntelItem, Language, Meal, MealPlan, MealTotals, Plan,
    PlanKind, ProgressEntry, UserProfile, Workout,
};
pub use plan_cache::{PlanCache, PlanError, RequestToken};
pub use ports::{
    AudioInput, AudioOutput, CaptureStream, GenerationService, KeyValueStore, PlaybackDevice,
    PortError, PortResult, VoiceEvent, VoiceFrame, VoiceLink, VoiceTransport,
};
pub use profile_store::{LoadedState, ProfileStore, SaveOutcome, WaterLog};
