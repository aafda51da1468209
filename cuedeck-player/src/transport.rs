//! Transport connection capability
//!
//! A `Transport` opens connections to a destination (a voice channel, a
//! network renderer, ...). Each connection reports its own lifecycle on a
//! broadcast channel; the [`ConnectionManager`](crate::connection::ConnectionManager)
//! layers recovery on top of those events.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::sink::AudioSink;

/// Where a session's audio goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Registry key (one session per destination id)
    pub id: String,
    /// Channel within the destination that receives audio
    pub channel_id: String,
}

impl Destination {
    pub fn new(id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.channel_id)
    }
}

/// Lifecycle status of a transport connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
    Error(String),
}

/// Opens connections and answers whether a destination still exists
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. The returned connection may still be `Connecting`.
    async fn connect(&self, destination: &Destination) -> Result<Box<dyn TransportConnection>>;

    /// Whether the destination channel still exists
    async fn destination_exists(&self, destination: &Destination) -> bool;
}

/// One live connection to a destination
pub trait TransportConnection: Send + Sync {
    fn status(&self) -> TransportStatus;

    /// Status changes after the moment of subscription
    fn events(&self) -> broadcast::Receiver<TransportStatus>;

    /// Route the sink's audio through this connection
    fn subscribe(&self, sink: Arc<dyn AudioSink>) -> Result<()>;

    fn destroy(&self);
}

/// In-process transport whose connections are immediately ready
#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, _destination: &Destination) -> Result<Box<dyn TransportConnection>> {
        Ok(Box::new(LocalConnection::new()))
    }

    async fn destination_exists(&self, _destination: &Destination) -> bool {
        true
    }
}

/// Connection used by [`LocalTransport`]
pub struct LocalConnection {
    status: Mutex<TransportStatus>,
    events: broadcast::Sender<TransportStatus>,
}

impl LocalConnection {
    fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            status: Mutex::new(TransportStatus::Ready),
            events,
        }
    }
}

impl TransportConnection for LocalConnection {
    fn status(&self) -> TransportStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn events(&self) -> broadcast::Receiver<TransportStatus> {
        self.events.subscribe()
    }

    fn subscribe(&self, _sink: Arc<dyn AudioSink>) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = TransportStatus::Destroyed;
        let _ = self.events.send(TransportStatus::Destroyed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_connection_lifecycle() {
        let transport = LocalTransport::new();
        let destination = Destination::new("local", "default");
        assert!(transport.destination_exists(&destination).await);

        let connection = transport.connect(&destination).await.unwrap();
        assert_eq!(connection.status(), TransportStatus::Ready);

        let mut events = connection.events();
        connection.destroy();
        assert_eq!(connection.status(), TransportStatus::Destroyed);
        assert_eq!(events.recv().await.unwrap(), TransportStatus::Destroyed);
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::new("g1", "c9").to_string(), "g1/c9");
    }
}
