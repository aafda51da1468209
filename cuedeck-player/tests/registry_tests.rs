//! One session per destination

mod helpers;

use cuedeck_common::PlayerConfig;
use cuedeck_player::registry::SessionRegistry;
use cuedeck_player::sink::AudioSink;
use cuedeck_player::transport::Destination;
use cuedeck_player::SessionServices;
use helpers::{FakeProvider, FakeSink, FakeTranscoder, FakeTransport};
use std::sync::Arc;

fn registry() -> SessionRegistry {
    let provider = Arc::new(FakeProvider::new());
    let services = SessionServices::new(
        provider.clone(),
        provider,
        Arc::new(FakeTransport::new()),
        Arc::new(FakeTranscoder::new()),
    );
    let sinks = |_: &Destination| -> Arc<dyn AudioSink> { Arc::new(FakeSink::new()) };
    SessionRegistry::new(PlayerConfig::default(), services, Arc::new(sinks))
}

#[tokio::test(start_paused = true)]
async fn test_one_session_per_destination() {
    let registry = registry();
    let first = Destination::new("guild-1", "voice-1");
    let second = Destination::new("guild-2", "voice-1");

    let a = registry.get_or_create(&first).await;
    let again = registry.get_or_create(&first).await;
    let b = registry.get_or_create(&second).await;

    assert_eq!(a.session_id(), again.session_id());
    assert_ne!(a.session_id(), b.session_id());
    assert_eq!(registry.len().await, 2);
    assert!(registry.get("guild-3").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_remove_destroys_session() {
    let registry = registry();
    let destination = Destination::new("guild-1", "voice-1");
    let handle = registry.get_or_create(&destination).await;

    assert!(registry.remove("guild-1").await.unwrap());
    assert!(handle.is_closed());
    assert!(!registry.remove("guild-1").await.unwrap());
    assert!(registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_destroyed_session_is_replaced() {
    let registry = registry();
    let destination = Destination::new("guild-1", "voice-1");

    let old = registry.get_or_create(&destination).await;
    old.destroy().await.unwrap();

    let new = registry.get_or_create(&destination).await;
    assert_ne!(old.session_id(), new.session_id());
    assert!(!new.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_destroys_all() {
    let registry = registry();
    let a = registry.get_or_create(&Destination::new("g1", "c")).await;
    let b = registry.get_or_create(&Destination::new("g2", "c")).await;

    registry.shutdown().await;
    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_prune_forgets_closed_sessions() {
    let registry = registry();
    let a = registry.get_or_create(&Destination::new("g1", "c")).await;
    let _b = registry.get_or_create(&Destination::new("g2", "c")).await;

    a.destroy().await.unwrap();
    assert_eq!(registry.prune().await, 1);
    assert_eq!(registry.prune().await, 0);
    assert!(registry.get("g1").await.is_none());
    assert!(registry.get("g2").await.is_some());
}
