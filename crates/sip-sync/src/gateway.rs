//! # Local Cache Gateway
//!
//! The application's side of the engine: where confirmed records and cached
//! values end up. The engine never touches application storage directly and
//! only ever calls a gateway from the main context task, so implementations
//! take `&mut self` and need no locking of their own.

use async_trait::async_trait;
use thiserror::Error;

use sip_core::{EventRecord, FieldValue};

/// Failure reported by an application gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct GatewayError(pub String);

impl GatewayError {
    pub fn new(msg: impl Into<String>) -> Self {
        GatewayError(msg.into())
    }
}

/// Callbacks the engine uses to update the application's local replica.
#[async_trait]
pub trait LocalCacheGateway: Send + 'static {
    /// Applies a record confirmed by the remote store.
    ///
    /// May be called more than once for the same record id.
    async fn apply_remote_record(&mut self, record: EventRecord) -> Result<(), GatewayError>;

    /// Stores a single key/value pair (counters, flags).
    async fn cache_key_value(&mut self, key: &str, value: FieldValue) -> Result<(), GatewayError>;

    /// Asks the user to sign in to the remote account.
    async fn prompt_sign_in(&mut self);
}

/// Gateway that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpGateway;

#[async_trait]
impl LocalCacheGateway for NoOpGateway {
    async fn apply_remote_record(&mut self, _record: EventRecord) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn cache_key_value(&mut self, _key: &str, _value: FieldValue) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn prompt_sign_in(&mut self) {}
}
