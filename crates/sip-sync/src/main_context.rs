//! # Main Context
//!
//! A single task that owns the application's [`LocalCacheGateway`]. Every
//! gateway call and every pull completion is queued here, so the application
//! sees them one at a time and in the order they were issued.
//!
//! ```text
//!   pull task ──┐
//!   push path ──┼──► mpsc ──► MainContext::run ──► gateway.apply_remote_record
//!   engine    ──┘               (FIFO)          ──► gateway.cache_key_value
//!                                               ──► gateway.prompt_sign_in
//!                                               ──► completion()
//! ```
//!
//! A completion queued after a batch of applies runs after all of them.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use sip_core::{EventRecord, FieldValue};

use crate::error::{SyncError, SyncResult};
use crate::gateway::{GatewayError, LocalCacheGateway};

/// Capacity of the main context command queue.
const COMMAND_BUFFER: usize = 64;

type Ack = oneshot::Sender<Result<(), GatewayError>>;

/// Commands run on the main context.
pub enum MainCommand {
    ApplyRecord { record: EventRecord, ack: Ack },
    CacheValue { key: String, value: FieldValue, ack: Ack },
    PromptSignIn,
    /// Runs an arbitrary closure in order with the gateway calls.
    Invoke(Box<dyn FnOnce() + Send>),
    Shutdown,
}

impl std::fmt::Debug for MainCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MainCommand::ApplyRecord { record, .. } => {
                f.debug_tuple("ApplyRecord").field(&record.id).finish()
            }
            MainCommand::CacheValue { key, .. } => f.debug_tuple("CacheValue").field(key).finish(),
            MainCommand::PromptSignIn => f.write_str("PromptSignIn"),
            MainCommand::Invoke(_) => f.write_str("Invoke"),
            MainCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable handle for queueing work on the main context.
#[derive(Debug, Clone)]
pub struct MainContextHandle {
    cmd_tx: mpsc::Sender<MainCommand>,
}

impl MainContextHandle {
    /// Applies a record through the gateway and waits for the result.
    pub async fn apply_record(&self, record: EventRecord) -> SyncResult<()> {
        let (ack, rx) = oneshot::channel();
        self.send(MainCommand::ApplyRecord { record, ack }).await?;
        Self::acked(rx).await
    }

    /// Caches a value through the gateway and waits for the result.
    pub async fn cache_value(&self, key: impl Into<String>, value: FieldValue) -> SyncResult<()> {
        let (ack, rx) = oneshot::channel();
        self.send(MainCommand::CacheValue {
            key: key.into(),
            value,
            ack,
        })
        .await?;
        Self::acked(rx).await
    }

    /// Queues a sign-in prompt.
    pub async fn prompt_sign_in(&self) -> SyncResult<()> {
        self.send(MainCommand::PromptSignIn).await
    }

    /// Queues `f` behind everything sent so far.
    pub async fn invoke<F>(&self, f: F) -> SyncResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(MainCommand::Invoke(Box::new(f))).await
    }

    /// Stops the main context after the commands already queued.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(MainCommand::Shutdown).await
    }

    async fn send(&self, cmd: MainCommand) -> SyncResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::ChannelError("Main context channel closed".into()))
    }

    async fn acked(rx: oneshot::Receiver<Result<(), GatewayError>>) -> SyncResult<()> {
        rx.await
            .map_err(|_| SyncError::ShuttingDown)?
            .map_err(|e| SyncError::Gateway(e.0))
    }
}

/// The task that owns the gateway.
pub struct MainContext<G: LocalCacheGateway> {
    gateway: G,
}

impl<G: LocalCacheGateway> MainContext<G> {
    /// Spawns the main context around `gateway` and returns its handle.
    pub fn spawn(gateway: G) -> MainContextHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let context = MainContext { gateway };

        tokio::spawn(async move {
            context.run(cmd_rx).await;
        });

        MainContextHandle { cmd_tx }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<MainCommand>) {
        debug!("Main context started");

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                MainCommand::ApplyRecord { record, ack } => {
                    let record_id = record.id.clone();
                    let result = self.gateway.apply_remote_record(record).await;
                    if let Err(ref err) = result {
                        warn!(record_id = %record_id, error = %err, "Gateway rejected record");
                    }
                    let _ = ack.send(result);
                }
                MainCommand::CacheValue { key, value, ack } => {
                    let result = self.gateway.cache_key_value(&key, value).await;
                    if let Err(ref err) = result {
                        warn!(key = %key, error = %err, "Gateway rejected value");
                    }
                    let _ = ack.send(result);
                }
                MainCommand::PromptSignIn => {
                    info!("Prompting for sign-in");
                    self.gateway.prompt_sign_in().await;
                }
                MainCommand::Invoke(f) => f(),
                MainCommand::Shutdown => {
                    info!("Main context shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use sip_core::{event_payload, PartitionId, RecordId};

    #[derive(Default)]
    struct LogGateway {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LocalCacheGateway for LogGateway {
        async fn apply_remote_record(&mut self, record: EventRecord) -> Result<(), GatewayError> {
            if record.id.as_str() == "bad" {
                return Err(GatewayError::new("refused"));
            }
            self.log.lock().unwrap().push(format!("apply {}", record.id));
            Ok(())
        }

        async fn cache_key_value(&mut self, key: &str, _value: FieldValue) -> Result<(), GatewayError> {
            self.log.lock().unwrap().push(format!("cache {}", key));
            Ok(())
        }

        async fn prompt_sign_in(&mut self) {
            self.log.lock().unwrap().push("prompt".into());
        }
    }

    fn record(id: &str) -> EventRecord {
        EventRecord {
            id: RecordId::new(id),
            partition_id: PartitionId::from_name("iPhone Zone"),
            record_type: "SipEvent".into(),
            payload: event_payload(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let gateway = LogGateway::default();
        let log = gateway.log.clone();
        let handle = MainContext::spawn(gateway);

        handle.apply_record(record("a")).await.unwrap();
        handle.cache_value("drinkTotal", FieldValue::Integer(3)).await.unwrap();
        handle.prompt_sign_in().await.unwrap();

        let (tx, rx) = oneshot::channel();
        let observed = log.clone();
        handle
            .invoke(move || {
                let _ = tx.send(observed.lock().unwrap().len());
            })
            .await
            .unwrap();

        // Everything queued before the closure has run when it runs.
        assert_eq!(rx.await.unwrap(), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["apply a", "cache drinkTotal", "prompt"]
        );
    }

    #[tokio::test]
    async fn test_gateway_error_and_shutdown() {
        let handle = MainContext::spawn(LogGateway::default());

        let err = handle.apply_record(record("bad")).await.unwrap_err();
        assert!(matches!(err, SyncError::Gateway(_)));

        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        let err = handle.apply_record(record("late")).await.unwrap_err();
        assert!(matches!(err, SyncError::ChannelError(_) | SyncError::ShuttingDown));
    }
}
