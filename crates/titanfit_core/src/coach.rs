//! crates/titanfit_core/src/coach.rs
//!
//! Interpretation of coach output: chat replies that may embed a plan table,
//! dashboard tips, and progress towards the goal weight.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

use crate::domain::{IntelItem, Language, ProgressEntry, UserProfile};

//=========================================================================================
// Chat Replies
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTableKind {
    Diet,
    Workout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRow {
    pub col1: String,
    pub col2: String,
    pub col3: String,
}

/// A table-shaped plan the coach attaches to a chat reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanData {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: PlanTableKind,
    pub rows: Vec<PlanRow>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachReply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanEnvelope {
    plan_data: PlanData,
}

fn plan_block_regex() -> &'static Regex {
    static PLAN_BLOCK: OnceLock<Regex> = OnceLock::new();
    // The pattern is a literal known to compile.
    PLAN_BLOCK.get_or_init(|| Regex::new(r#"(?s)\{.*"planData".*\}"#).unwrap())
}

/// Splits a chat reply into display text and an optional embedded plan.
///
/// The plan block is the widest `{ ... "planData" ... }` span. When it parses,
/// it is removed from the text; when it does not, the text is left as is.
pub fn parse_coach_reply(response: &str, language: Language) -> CoachReply {
    let mut text = response.to_string();
    let mut plan = None;

    if let Some(block) = plan_block_regex().find(response) {
        match serde_json::from_str::<PlanEnvelope>(block.as_str()) {
            Ok(envelope) => {
                plan = Some(envelope.plan_data);
                text = response.replacen(block.as_str(), "", 1).trim().to_string();
            }
            Err(e) => warn!("Plan JSON parse error: {}", e),
        }
    }

    if text.trim().is_empty() {
        text = if language.is_portuguese() {
            "Plano gerado com sucesso:".to_string()
        } else {
            "Plan generated successfully:".to_string()
        };
    }

    CoachReply { text, plan }
}

//=========================================================================================
// Dashboard
//=========================================================================================

const MAX_TIPS: usize = 3;
const MIN_TIP_LENGTH: usize = 15;

/// Turns a line-per-tip response into dashboard insight cards.
pub fn parse_fitness_tips(response: &str, goal: &str) -> Vec<IntelItem> {
    let url = format!(
        "https://www.google.com/search?q={}+tips",
        urlencoding::encode(goal)
    );
    response
        .lines()
        .filter(|line| line.chars().count() > MIN_TIP_LENGTH)
        .take(MAX_TIPS)
        .enumerate()
        .map(|(i, line)| IntelItem {
            title: format!("Titan Insight #{}", i + 1),
            snippet: line.replace(['*', '#'], "").trim().to_string(),
            url: url.clone(),
        })
        .collect()
}

/// The latest recorded weight, falling back to the profile weight.
pub fn current_weight(profile: &UserProfile, progress: &[ProgressEntry]) -> f64 {
    progress
        .last()
        .map(|entry| entry.weight)
        .filter(|w| *w > 0.0)
        .unwrap_or(profile.weight)
}

/// How far the user is from the starting weight towards the target, in percent.
pub fn goal_progress_percent(profile: &UserProfile, progress: &[ProgressEntry]) -> f64 {
    let current = current_weight(profile, progress);
    let span = profile.weight - profile.target_weight;
    if span == 0.0 {
        return if current == profile.target_weight { 100.0 } else { 0.0 };
    }
    ((profile.weight - current) / span * 100.0).clamp(0.0, 100.0)
}
