//! Shared harness for the sync scenarios.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use sip_core::{event_payload, Payload};
use sip_sync::{
    MainContext, MainContextHandle, MemoryCursorStore, PeerLink, RemoteStore, ReplicaGateway,
    ReplicaView, SyncConfig, SyncEngine,
};

/// Routes engine logs to the test output. `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,sip_sync=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// One simulated device: an engine plus everything a test wants to poke at.
pub struct Device {
    pub engine: SyncEngine,
    pub view: ReplicaView,
    pub main: MainContextHandle,
    pub cursors: MemoryCursorStore,
}

impl Device {
    /// Waits until everything queued on the main context so far has run.
    pub async fn settle(&self) {
        settle(&self.main).await;
    }
}

pub fn config(identity: Option<&str>) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.device.identity = identity.map(str::to_string);
    config
}

pub fn device(remote: Arc<dyn RemoteStore>, identity: Option<&str>) -> Device {
    device_with(remote, config(identity), None)
}

pub fn device_with(
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    peer: Option<Arc<dyn PeerLink>>,
) -> Device {
    init_tracing();

    let (gateway, view) = ReplicaGateway::new();
    let main = MainContext::spawn(gateway);
    let cursors = MemoryCursorStore::new();

    let mut builder = SyncEngine::builder(config, remote, main.clone())
        .cursor_store(Arc::new(cursors.clone()));
    if let Some(peer) = peer {
        builder = builder.peer(peer);
    }

    Device {
        engine: builder.build().expect("engine"),
        view,
        main,
        cursors,
    }
}

pub async fn settle(main: &MainContextHandle) {
    let (tx, rx) = oneshot::channel();
    main.invoke(move || {
        let _ = tx.send(());
    })
    .await
    .expect("main context running");
    rx.await.expect("main context ran closure");
}

pub fn event_at(date: DateTime<Utc>) -> Payload {
    event_payload(date)
}

pub fn event_now() -> Payload {
    event_payload(Utc::now())
}

/// Polls `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
