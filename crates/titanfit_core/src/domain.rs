//! crates/titanfit_core/src/domain.rs
//!
//! Defines the core data structures for the application: the user profile,
//! the weigh-in series, and the two kinds of generated plan.
//!
//! The JSON shapes mirror what the browser client stores and sends, so field
//! names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

//=========================================================================================
// Profile Enumerations
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivityLevel {
    Sedentary,
    #[serde(rename = "Lightly Active")]
    LightlyActive,
    #[default]
    #[serde(rename = "Moderately Active")]
    ModeratelyActive,
    #[serde(rename = "Very Active")]
    VeryActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Goal {
    #[default]
    #[serde(rename = "Weight Loss")]
    WeightLoss,
    #[serde(rename = "Muscle Gain")]
    MuscleGain,
    Maintain,
}

/// The two supported interface languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    #[default]
    Pt,
}

impl Language {
    /// The language name used when instructing the generation service.
    pub fn name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Pt => "Portuguese",
        }
    }

    pub fn is_portuguese(self) -> bool {
        self == Language::Pt
    }
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl Goal {
    pub fn as_str(self) -> &'static str {
        match self {
            Goal::WeightLoss => "Weight Loss",
            Goal::MuscleGain => "Muscle Gain",
            Goal::Maintain => "Maintain",
        }
    }
}

//=========================================================================================
// UserProfile
//=========================================================================================

/// A dated photo used for the before/after comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub image: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evolution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Snapshot>,
}

/// The single profile record kept per installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub weight: f64,
    pub target_weight: f64,
    pub height: f64,
    pub age: u32,
    pub gender: Gender,
    pub activity_level: ActivityLevel,
    pub goal: Goal,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub evolution: Evolution,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            weight: 70.0,
            target_weight: 65.0,
            height: 170.0,
            age: 25,
            gender: Gender::Male,
            activity_level: ActivityLevel::ModeratelyActive,
            goal: Goal::WeightLoss,
            language: Language::Pt,
            profile_image: None,
            evolution: Evolution::default(),
        }
    }
}

/// The outcome of repairing a stored or submitted profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedProfile {
    pub profile: UserProfile,
    /// Names of the fields that were absent or invalid and took their default.
    pub repaired_fields: Vec<&'static str>,
}

impl UserProfile {
    /// Builds a profile from an arbitrary JSON object, field by field.
    ///
    /// Every field that is missing, of the wrong type, or out of range takes
    /// the value from [`UserProfile::default`]. Unknown fields are ignored.
    pub fn repair(object: &Map<String, Value>) -> RepairedProfile {
        let defaults = UserProfile::default();
        let mut repaired_fields = Vec::new();

        // Absent and broken fields are both reported as repairs.
        let mut take = |field: &'static str, ok: bool| {
            if !ok {
                repaired_fields.push(field);
            }
        };

        let name = match object.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => {
                take("name", false);
                defaults.name.clone()
            }
        };

        let weight = positive_number(object.get("weight"));
        take("weight", weight.is_some());
        let target_weight = positive_number(object.get("targetWeight"));
        take("targetWeight", target_weight.is_some());
        let height = positive_number(object.get("height"));
        take("height", height.is_some());
        let age = positive_integer(object.get("age"));
        take("age", age.is_some());

        let gender = enum_field::<Gender>(object.get("gender"));
        take("gender", gender.is_some());
        let activity_level = enum_field::<ActivityLevel>(object.get("activityLevel"));
        take("activityLevel", activity_level.is_some());
        let goal = enum_field::<Goal>(object.get("goal"));
        take("goal", goal.is_some());
        let language = enum_field::<Language>(object.get("language"));
        take("language", language.is_some());

        let profile_image = match object.get("profileImage") {
            Some(Value::String(s)) => Some(s.clone()),
            None | Some(Value::Null) => None,
            Some(_) => {
                take("profileImage", false);
                None
            }
        };

        let evolution = match object.get("evolution") {
            None | Some(Value::Null) => Evolution::default(),
            Some(value) => match serde_json::from_value::<Evolution>(value.clone()) {
                Ok(evolution) => evolution,
                Err(_) => {
                    take("evolution", false);
                    Evolution::default()
                }
            },
        };

        RepairedProfile {
            profile: UserProfile {
                name,
                weight: weight.unwrap_or(defaults.weight),
                target_weight: target_weight.unwrap_or(defaults.target_weight),
                height: height.unwrap_or(defaults.height),
                age: age.unwrap_or(defaults.age),
                gender: gender.unwrap_or(defaults.gender),
                activity_level: activity_level.unwrap_or(defaults.activity_level),
                goal: goal.unwrap_or(defaults.goal),
                language: language.unwrap_or(defaults.language),
                profile_image,
                evolution,
            },
            repaired_fields,
        }
    }

    /// Onboarding is complete once the user has given a name.
    pub fn onboarding_complete(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

fn positive_number(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n > 0.0)
}

fn positive_integer(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
}

fn enum_field<T: serde::de::DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    match value {
        Some(v @ Value::String(_)) => serde_json::from_value(v.clone()).ok(),
        _ => None,
    }
}

//=========================================================================================
// Progress Series
//=========================================================================================

/// A single recorded weigh-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    /// Display string, not a calendar type.
    pub date: String,
    pub weight: f64,
    pub calories_burned: f64,
}

impl ProgressEntry {
    /// The placeholder entry used when no series has ever been stored.
    pub fn seed() -> Self {
        Self {
            date: "Início".to_string(),
            weight: 70.0,
            calories_burned: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.weight.is_finite()
            && self.weight > 0.0
            && self.calories_burned.is_finite()
            && self.calories_burned >= 0.0
    }
}

pub fn seeded_progress() -> Vec<ProgressEntry> {
    vec![ProgressEntry::seed()]
}

//=========================================================================================
// Generated Plans
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub name: String,
    pub sets: u32,
    pub reps: String,
    pub description: String,
    pub muscle_group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub name: String,
    pub duration: String,
    pub intensity: String,
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub time: String,
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

/// A day of meals. Stored and exchanged as a bare JSON array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MealPlan(pub Vec<Meal>);

/// Daily sums over a meal plan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MealTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl MealPlan {
    pub fn meals(&self) -> &[Meal] {
        &self.0
    }

    pub fn totals(&self) -> MealTotals {
        self.0.iter().fold(MealTotals::default(), |acc, meal| MealTotals {
            calories: acc.calories + meal.calories,
            protein: acc.protein + meal.protein,
            carbs: acc.carbs + meal.carbs,
            fat: acc.fat + meal.fat,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKind {
    Workout,
    Meal,
}

impl PlanKind {
    pub fn label(self) -> &'static str {
        match self {
            PlanKind::Workout => "workout",
            PlanKind::Meal => "meal plan",
        }
    }
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated plan of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Workout(Workout),
    Meals(MealPlan),
}

impl Plan {
    pub fn kind(&self) -> PlanKind {
        match self {
            Plan::Workout(_) => PlanKind::Workout,
            Plan::Meals(_) => PlanKind::Meal,
        }
    }
}

/// A search-grounded tip shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelItem {
    pub title: String,
    pub snippet: String,
    pub url: String,
}
