//! Shared fixtures for integration tests.

#![allow(dead_code)]

use kernbus_runtime::{BusConfig, Engine, MemoryPersistor};
use std::sync::Arc;
use std::time::Duration;

/// Engine over an in-memory persistor.
pub fn engine_with(config: BusConfig) -> Arc<Engine> {
    Engine::builder(config)
        .with_persistor(Arc::new(MemoryPersistor::new()))
        .build()
        .unwrap()
}

pub fn engine() -> Arc<Engine> {
    engine_with(BusConfig::default())
}

/// Polls `condition` until it holds. Panics after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
