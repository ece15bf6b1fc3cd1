//! services/coach/src/live/mod.rs
//!
//! Live voice coaching: the session relay and its two workers.

pub mod capture_task;
pub mod playback_task;
pub mod relay;

pub use relay::{EndReason, RelayError, RelayEvent, RelayState, SessionRelay, SessionSlot};
