//! crates/titanfit_core/src/plan.rs
//!
//! Structural validation of generated plans.
//!
//! A generated plan arrives as model text. It is cleaned, parsed as JSON, and
//! checked field by field before anything typed is produced, so a malformed
//! generation can never reach the cache.

use serde_json::Value;
use std::fmt;

use crate::domain::{Exercise, Meal, MealPlan, Plan, PlanKind, Workout};

//=========================================================================================
// Validation Errors
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    WrongType { expected: &'static str },
    Negative,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => write!(f, "missing"),
            FieldProblem::WrongType { expected } => write!(f, "expected {expected}"),
            FieldProblem::Negative => write!(f, "must not be negative"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// JSON path of the offending field, e.g. `exercises[2].sets`.
    pub path: String,
    pub problem: FieldProblem,
}

/// Every reason a generated plan was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("the {kind} response is not valid JSON: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("the {kind} response has invalid fields: {}", describe(.issues))]
    InvalidFields {
        kind: &'static str,
        issues: Vec<FieldIssue>,
    },
}

impl PlanValidationError {
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            PlanValidationError::Malformed { .. } => &[],
            PlanValidationError::InvalidFields { issues, .. } => issues,
        }
    }
}

fn describe(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{} {}", issue.path, issue.problem))
        .collect::<Vec<_>>()
        .join(", ")
}

//=========================================================================================
// Response Cleaning
//=========================================================================================

/// Extracts the JSON payload from model text.
///
/// Markdown fences are removed, then everything from the first `{` or `[` to
/// the last `}` or `]` is kept. Empty input becomes `{}`.
pub fn clean_json_response(text: &str) -> String {
    if text.trim().is_empty() {
        return "{}".to_string();
    }
    let cleaned = strip_fences(text);
    let start = [cleaned.find('{'), cleaned.find('[')]
        .into_iter()
        .flatten()
        .min();
    let end = [cleaned.rfind('}'), cleaned.rfind(']')]
        .into_iter()
        .flatten()
        .max();
    match (start, end) {
        (Some(start), Some(end)) if start <= end => cleaned[start..=end].to_string(),
        _ => cleaned,
    }
}

fn strip_fences(text: &str) -> String {
    let mut out = text.to_string();
    for fence in ["```json", "```JSON", "```Json", "```"] {
        out = out.replace(fence, "");
    }
    out.trim().to_string()
}

//=========================================================================================
// Validators
//=========================================================================================

/// Parses and validates model text as a plan of `kind`.
pub fn parse_plan(kind: PlanKind, raw: &str) -> Result<Plan, PlanValidationError> {
    let cleaned = clean_json_response(raw);
    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| PlanValidationError::Malformed {
            kind: kind.label(),
            reason: e.to_string(),
        })?;
    match kind {
        PlanKind::Workout => validate_workout(&value).map(Plan::Workout),
        PlanKind::Meal => validate_meal_plan(&value).map(Plan::Meals),
    }
}

pub fn validate_workout(value: &Value) -> Result<Workout, PlanValidationError> {
    let mut checker = Checker::default();
    let Some(object) = value.as_object() else {
        checker.wrong_type("$", "object");
        return Err(checker.into_error(PlanKind::Workout));
    };

    let name = checker.string(object.get("name"), "name");
    let duration = checker.string(object.get("duration"), "duration");
    let intensity = checker.string(object.get("intensity"), "intensity");

    let mut exercises = Vec::new();
    match object.get("exercises") {
        None | Some(Value::Null) => checker.missing("exercises"),
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if let Some(exercise) = checker.exercise(item, &format!("exercises[{i}]")) {
                    exercises.push(exercise);
                }
            }
        }
        Some(_) => checker.wrong_type("exercises", "array"),
    }

    if !checker.issues.is_empty() {
        return Err(checker.into_error(PlanKind::Workout));
    }
    Ok(Workout {
        name: name.unwrap_or_default(),
        duration: duration.unwrap_or_default(),
        intensity: intensity.unwrap_or_default(),
        exercises,
    })
}

pub fn validate_meal_plan(value: &Value) -> Result<MealPlan, PlanValidationError> {
    let mut checker = Checker::default();
    let Some(items) = value.as_array() else {
        checker.wrong_type("$", "array");
        return Err(checker.into_error(PlanKind::Meal));
    };

    let mut meals = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if let Some(meal) = checker.meal(item, &format!("[{i}]")) {
            meals.push(meal);
        }
    }

    if !checker.issues.is_empty() {
        return Err(checker.into_error(PlanKind::Meal));
    }
    Ok(MealPlan(meals))
}

/// Accumulates issues so one pass reports every bad field.
#[derive(Default)]
struct Checker {
    issues: Vec<FieldIssue>,
}

impl Checker {
    fn push(&mut self, path: &str, problem: FieldProblem) {
        self.issues.push(FieldIssue {
            path: path.to_string(),
            problem,
        });
    }

    fn missing(&mut self, path: &str) {
        self.push(path, FieldProblem::Missing);
    }

    fn wrong_type(&mut self, path: &str, expected: &'static str) {
        self.push(path, FieldProblem::WrongType { expected });
    }

    fn string(&mut self, value: Option<&Value>, path: &str) -> Option<String> {
        match value {
            None | Some(Value::Null) => {
                self.missing(path);
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.wrong_type(path, "string");
                None
            }
        }
    }

    fn non_negative(&mut self, value: Option<&Value>, path: &str) -> Option<f64> {
        match value {
            None | Some(Value::Null) => {
                self.missing(path);
                None
            }
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v < 0.0 => {
                    self.push(path, FieldProblem::Negative);
                    None
                }
                other => other,
            },
            Some(_) => {
                self.wrong_type(path, "number");
                None
            }
        }
    }

    fn count(&mut self, value: Option<&Value>, path: &str) -> Option<u32> {
        let number = self.non_negative(value, path)?;
        if number.fract() != 0.0 || number > f64::from(u32::MAX) {
            self.wrong_type(path, "integer");
            return None;
        }
        Some(number as u32)
    }

    fn exercise(&mut self, value: &Value, path: &str) -> Option<Exercise> {
        let Some(object) = value.as_object() else {
            self.wrong_type(path, "object");
            return None;
        };
        let name = self.string(object.get("name"), &format!("{path}.name"));
        let sets = self.count(object.get("sets"), &format!("{path}.sets"));
        let reps = self.string(object.get("reps"), &format!("{path}.reps"));
        let description = self.string(object.get("description"), &format!("{path}.description"));
        let muscle_group = self.string(object.get("muscleGroup"), &format!("{path}.muscleGroup"));
        Some(Exercise {
            name: name?,
            sets: sets?,
            reps: reps?,
            description: description?,
            muscle_group: muscle_group?,
        })
    }

    fn meal(&mut self, value: &Value, path: &str) -> Option<Meal> {
        let Some(object) = value.as_object() else {
            self.wrong_type(path, "object");
            return None;
        };
        let time = self.string(object.get("time"), &format!("{path}.time"));
        let name = self.string(object.get("name"), &format!("{path}.name"));
        let calories = self.non_negative(object.get("calories"), &format!("{path}.calories"));
        let protein = self.non_negative(object.get("protein"), &format!("{path}.protein"));
        let carbs = self.non_negative(object.get("carbs"), &format!("{path}.carbs"));
        let fat = self.non_negative(object.get("fat"), &format!("{path}.fat"));
        Some(Meal {
            time: time?,
            name: name?,
            calories: calories?,
            protein: protein?,
            carbs: carbs?,
            fat: fat?,
        })
    }

    fn into_error(self, kind: PlanKind) -> PlanValidationError {
        PlanValidationError::InvalidFields {
            kind: kind.label(),
            issues: self.issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cleaner_strips_fences_and_surrounding_prose() {
        let raw = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nEnjoy!";
        assert_eq!(clean_json_response(raw), "{\"a\": [1, 2]}");
        assert_eq!(clean_json_response(""), "{}");
    }

    #[test]
    fn cleaner_keeps_a_top_level_array() {
        let raw = "```[{\"x\": 1}]```";
        assert_eq!(clean_json_response(raw), "[{\"x\": 1}]");
    }

    #[test]
    fn valid_workout_parses_into_typed_plan() {
        let raw = json!({
            "name": "Full Body Burn",
            "duration": "30 min",
            "intensity": "High",
            "exercises": [{
                "name": "Burpees",
                "sets": 3,
                "reps": "12",
                "description": "Explosive",
                "muscleGroup": "Full body"
            }]
        })
        .to_string();

        let Plan::Workout(workout) = parse_plan(PlanKind::Workout, &raw).unwrap() else {
            panic!("expected a workout");
        };
        assert_eq!(workout.exercises.len(), 1);
        assert_eq!(workout.exercises[0].sets, 3);
        assert_eq!(workout.exercises[0].muscle_group, "Full body");
    }

    #[test]
    fn workout_errors_list_every_bad_field() {
        let value = json!({
            "name": "Leg Day",
            "intensity": 7,
            "exercises": [{"name": "Squat", "sets": "three", "reps": "10", "description": "", "muscleGroup": "Legs"}]
        });

        let err = validate_workout(&value).unwrap_err();
        let paths: Vec<_> = err.issues().iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["duration", "intensity", "exercises[0].sets"]);
        assert_eq!(err.issues()[0].problem, FieldProblem::Missing);
        assert_eq!(
            err.issues()[1].problem,
            FieldProblem::WrongType { expected: "string" }
        );
    }

    #[test]
    fn meal_plan_rejects_negative_macros_and_non_arrays() {
        let value = json!([{"time": "12:00", "name": "Salad", "calories": 300, "protein": -1, "carbs": 20, "fat": 5}]);
        let err = validate_meal_plan(&value).unwrap_err();
        assert_eq!(err.issues()[0].path, "[0].protein");
        assert_eq!(err.issues()[0].problem, FieldProblem::Negative);

        assert!(validate_meal_plan(&json!({"meals": []})).is_err());
    }

    #[test]
    fn non_json_text_is_malformed() {
        let err = parse_plan(PlanKind::Meal, "sorry, I cannot help").unwrap_err();
        assert!(matches!(err, PlanValidationError::Malformed { .. }));
    }
}
