//! Session registry: at most one session per destination

use cuedeck_common::PlayerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::session::{spawn_session, SessionHandle, SessionServices};
use crate::sink::AudioSink;
use crate::transport::Destination;

/// Creates the sink for a new session
pub trait SinkFactory: Send + Sync {
    fn create(&self, destination: &Destination) -> Arc<dyn AudioSink>;
}

impl<F> SinkFactory for F
where
    F: Fn(&Destination) -> Arc<dyn AudioSink> + Send + Sync,
{
    fn create(&self, destination: &Destination) -> Arc<dyn AudioSink> {
        self(destination)
    }
}

pub struct SessionRegistry {
    config: PlayerConfig,
    services: SessionServices,
    sinks: Arc<dyn SinkFactory>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(config: PlayerConfig, services: SessionServices, sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            config,
            services,
            sinks,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Existing live session for the destination, or a new one
    pub async fn get_or_create(&self, destination: &Destination) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(&destination.id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let sink = self.sinks.create(destination);
        let handle = spawn_session(destination.clone(), self.config.clone(), self.services.clone(), sink);
        info!("Created session {} for {}", handle.session_id(), destination);
        sessions.insert(destination.id.clone(), handle.clone());
        handle
    }

    pub async fn get(&self, destination_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(destination_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Destroy and forget the destination's session
    pub async fn remove(&self, destination_id: &str) -> Result<bool> {
        let handle = self.sessions.lock().await.remove(destination_id);
        match handle {
            Some(handle) if !handle.is_closed() => {
                handle.destroy().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Forget sessions that ended on their own; returns how many were dropped
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_closed());
        let dropped = before - sessions.len();
        if dropped > 0 {
            debug!("Pruned {} closed sessions", dropped);
        }
        dropped
    }

    /// Live sessions
    pub async fn len(&self) -> usize {
        self.prune().await;
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Destroy every session
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.sessions.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            // Already-closed sessions answer SessionClosed
            let _ = handle.destroy().await;
        }
    }
}
