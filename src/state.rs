// src/state.rs

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    notify::DynNotifier,
    storage::DynObjectStore,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub storage: DynObjectStore,
    pub notifier: DynNotifier,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for DynObjectStore {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for DynNotifier {
    fn from_ref(state: &AppState) -> Self {
        state.notifier.clone()
    }
}
