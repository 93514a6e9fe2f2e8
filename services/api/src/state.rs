//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration,
//! the shared session defaults and weather tool, and the registry of live
//! realtime sessions.

use crate::config::Config;
use relay_core::{
    defaults::SessionDefaults,
    weather::{OpenMeteoWeather, WeatherTool},
};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::Mutex;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub defaults: Arc<SessionDefaults>,
    pub weather: Arc<dyn WeatherTool>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let weather = OpenMeteoWeather::new(
            config.weather_geocoding_url.clone(),
            config.weather_forecast_url.clone(),
        );
        Self {
            defaults: Arc::new(config.session_defaults()),
            weather: Arc::new(weather),
            sessions: Arc::new(SessionRegistry::default()),
            config: Arc::new(config),
        }
    }
}

/// What the registry remembers about a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub connected_at: Instant,
}

/// Live sessions keyed by connection id. Nothing in the relay logic reads it;
/// it only backs the health endpoint and shutdown logging.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub async fn insert(&self, connection_id: String, handle: SessionHandle) {
        self.sessions.lock().await.insert(connection_id, handle);
    }

    pub async fn remove(&self, connection_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.remove(connection_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_insert_and_remove() {
        let registry = SessionRegistry::default();
        assert!(registry.is_empty().await);

        let handle = SessionHandle {
            connected_at: Instant::now(),
        };
        registry.insert("a".into(), handle.clone()).await;
        registry.insert("b".into(), handle).await;
        assert_eq!(registry.len().await, 2);

        assert!(registry.remove("a").await.is_some());
        assert!(registry.remove("a").await.is_none());
        assert_eq!(registry.len().await, 1);
    }
}
