//! services/coach/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::live::SessionSlot;
use std::sync::Arc;
use titanfit_core::ports::{GenerationService, KeyValueStore, VoiceTransport};
use titanfit_core::{LoadedState, PlanCache, ProfileStore, WaterLog};
use tokio::sync::Mutex;
use tracing::info;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub generation: Arc<dyn GenerationService>,
    pub voice: Arc<dyn VoiceTransport>,
    pub profile_store: ProfileStore,
    /// The in-memory copy of the profile and weigh-ins; the store is written through.
    pub profile: Mutex<LoadedState>,
    pub plan_cache: Mutex<PlanCache>,
    pub water: WaterLog,
    /// Held by whichever `/live` socket is running the installation's voice session.
    pub live_slot: SessionSlot,
}

impl AppState {
    /// Builds the state over `storage` and loads the persisted profile.
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn KeyValueStore>,
        generation: Arc<dyn GenerationService>,
        voice: Arc<dyn VoiceTransport>,
    ) -> Self {
        let profile_store = ProfileStore::new(storage.clone());
        let loaded = profile_store.load();
        info!(
            onboarded = loaded.profile.onboarding_complete(),
            weigh_ins = loaded.progress.len(),
            "Profile loaded."
        );

        Self {
            config,
            generation,
            voice,
            profile_store,
            profile: Mutex::new(loaded),
            plan_cache: Mutex::new(PlanCache::new(storage.clone())),
            water: WaterLog::new(storage),
            live_slot: SessionSlot::new(),
        }
    }
}
