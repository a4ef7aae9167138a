//! Shared application state for the Axum server.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ApiError;
use crate::store::TrackingStore;

/// Credentials every request must present when set.
#[derive(Clone)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub token: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<TrackingStore>>,
    pub auth: Option<Arc<AuthConfig>>,
}

impl AppState {
    pub fn new(auth: Option<AuthConfig>) -> Self {
        Self {
            store: Arc::new(RwLock::new(TrackingStore::new())),
            auth: auth.map(Arc::new),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, TrackingStore>, ApiError> {
        self.store
            .read()
            .map_err(|_| ApiError::Internal("tracking store lock poisoned".into()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, TrackingStore>, ApiError> {
        self.store
            .write()
            .map_err(|_| ApiError::Internal("tracking store lock poisoned".into()))
    }
}

/// Configuration for the tracking server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            auth: None,
        }
    }
}
