//! Async driver: one tokio task per sender plus the controller fronting them.
//!
//! A sender task owns its `UniverseSender` outright. Commands reach it over a
//! bounded channel and are handled between ticks in the same `select!` loop,
//! so command handling and transition stepping never interleave.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::command::Payload;
use crate::config::{ControllerConfig, SenderConfig};
use crate::error::{SenderError, StoreError};
use crate::frame::{ChannelFrame, CHANNEL_COUNT};
use crate::receiver::FrameReceiver;
use crate::router::RoutingTable;
use crate::sender::UniverseSender;
use crate::store::FrameStore;
use crate::transport::DmxOutput;

const REQUEST_QUEUE: usize = 64;

type Frame = [u8; CHANNEL_COUNT];

enum Request {
    Command {
        payload: Payload,
        reply: oneshot::Sender<Result<(), SenderError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Frame>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<Frame, StoreError>>,
    },
}

/// Builds a sender from its persisted frame and sends that frame once.
pub async fn open_sender(
    config: SenderConfig,
    store: &dyn FrameStore,
    output: Box<dyn DmxOutput>,
) -> Result<UniverseSender, StoreError> {
    let frame = if config.save_values {
        match store.load(&config.id).await {
            Ok(Some(values)) => ChannelFrame::restore(&values),
            Ok(None) => ChannelFrame::new(),
            Err(StoreError::Encoding(e)) => {
                log::warn!("[sender {}] discarding stored frame: {}", config.label(), e);
                ChannelFrame::new()
            }
            Err(e) => return Err(e),
        }
    } else {
        ChannelFrame::new()
    };
    let mut sender = UniverseSender::new(config, frame, output);
    sender.send_data();
    log::info!("[{}] initial transmit", sender.label());
    Ok(sender)
}

async fn finish(sender: &mut UniverseSender, store: &dyn FrameStore) -> Result<Frame, StoreError> {
    let frame = sender.shutdown();
    if sender.config().save_values {
        store.save(&sender.config().id, &frame).await?;
        log::info!("[{}] frame saved", sender.label());
    }
    Ok(frame)
}

/// Runs `sender` on its own task until shut down or every handle is dropped.
pub fn spawn_sender(sender: UniverseSender, store: Arc<dyn FrameStore>) -> SenderHandle {
    let (tx, mut rx) = mpsc::channel::<Request>(REQUEST_QUEUE);
    let id = sender.config().id.clone();

    tokio::spawn(async move {
        let mut sender = sender;
        let tick = sender.scheduler().tick_interval();
        let mut armed = sender.is_ticking();
        let mut next_tick = Instant::now() + tick;

        loop {
            let mut ticked = false;
            tokio::select! {
                request = rx.recv() => match request {
                    Some(Request::Command { payload, reply }) => {
                        let result = sender.handle(&payload);
                        if let Err(e) = &result {
                            log::warn!("[{}] command rejected: {}", sender.label(), e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(Request::Snapshot { reply }) => {
                        let _ = reply.send(sender.snapshot());
                    }
                    Some(Request::Shutdown { reply }) => {
                        let _ = reply.send(finish(&mut sender, store.as_ref()).await);
                        break;
                    }
                    None => {
                        if let Err(e) = finish(&mut sender, store.as_ref()).await {
                            log::error!("[{}] failed to save frame: {}", sender.label(), e);
                        }
                        break;
                    }
                },
                _ = sleep_until(next_tick), if armed => {
                    sender.tick();
                    ticked = true;
                }
            }

            let active = sender.is_ticking();
            if active && ticked {
                next_tick += tick;
            } else if active && !armed {
                next_tick = Instant::now() + tick;
            }
            armed = active;
        }
    });

    SenderHandle { id, tx }
}

/// Cloneable handle to a running sender task.
#[derive(Clone)]
pub struct SenderHandle {
    id: String,
    tx: mpsc::Sender<Request>,
}

impl SenderHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn stopped(&self) -> SenderError {
        SenderError::Stopped(self.id.clone())
    }

    /// Applies a payload and waits for its result.
    pub async fn send(&self, payload: Payload) -> Result<(), SenderError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Command { payload, reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn snapshot(&self) -> Result<Frame, SenderError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot { reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Stops the sender and returns its final frame once it is persisted.
    pub async fn shutdown(&self) -> Result<Frame, SenderError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| self.stopped())?;
        Ok(rx.await.map_err(|_| self.stopped())??)
    }
}

/// Every sender of one controller together with the routing table.
pub struct Controller {
    config: ControllerConfig,
    routing: RoutingTable,
    handles: Vec<SenderHandle>,
}

impl Controller {
    /// Opens and spawns every configured sender.
    pub async fn start<F>(
        config: ControllerConfig,
        store: Arc<dyn FrameStore>,
        mut make_output: F,
    ) -> Result<Self, StoreError>
    where
        F: FnMut(&SenderConfig) -> Box<dyn DmxOutput>,
    {
        let routing = RoutingTable::from_senders(&config.senders);
        let mut handles = Vec::with_capacity(config.senders.len());
        for sender_config in &config.senders {
            let output = make_output(sender_config);
            let sender = open_sender(sender_config.clone(), store.as_ref(), output).await?;
            handles.push(spawn_sender(sender, store.clone()));
        }
        log::info!(
            "[controller {}] started {} sender(s) on {}:{} as \"{}\" ({}, oem {})",
            config.name,
            handles.len(),
            config.bind,
            config.port,
            config.short_name,
            config.long_name,
            config.oem_code
        );
        Ok(Self {
            config,
            routing,
            handles,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn sender(&self, id: &str) -> Option<&SenderHandle> {
        self.handles.iter().find(|h| h.id() == id)
    }

    /// Receivers for every configured inbound universe.
    pub fn receivers(&self) -> Vec<FrameReceiver> {
        self.config
            .receivers
            .iter()
            .cloned()
            .map(FrameReceiver::new)
            .collect()
    }

    /// Routes a payload arriving at the first configured sender.
    pub async fn dispatch(&self, payload: Payload) -> Result<String, SenderError> {
        let default = self
            .config
            .senders
            .first()
            .ok_or_else(|| SenderError::UnknownSender(String::new()))?;
        self.dispatch_from(&default.id, payload, false).await
    }

    /// Routes a payload arriving at sender `default_id` and returns the id of
    /// the sender that handled it.
    pub async fn dispatch_from(
        &self,
        default_id: &str,
        payload: Payload,
        ignore_address: bool,
    ) -> Result<String, SenderError> {
        let default = self
            .config
            .senders
            .iter()
            .find(|s| s.id == default_id)
            .ok_or_else(|| SenderError::UnknownSender(default_id.to_string()))?;
        let target = self
            .routing
            .route(default, &payload, ignore_address)
            .to_string();
        let handle = self
            .sender(&target)
            .ok_or_else(|| SenderError::UnknownSender(target.clone()))?;
        handle.send(payload).await?;
        Ok(target)
    }

    /// Shuts every sender down, returning each final frame.
    pub async fn shutdown_all(self) -> Vec<(String, Result<Frame, SenderError>)> {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            results.push((handle.id().to_string(), handle.shutdown().await));
        }
        log::info!("[controller {}] stopped", self.config.name);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryFrameStore;
    use crate::transport::FrameLog;
    use serde_json::json;
    use std::time::Duration;

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_value(value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fade_completes_on_the_tick() {
        let store = Arc::new(MemoryFrameStore::new());
        let log = FrameLog::new();
        let sender = open_sender(SenderConfig::new("u"), store.as_ref(), Box::new(log.output()))
            .await
            .unwrap();
        let handle = spawn_sender(sender, store.clone());

        handle
            .send(payload(json!({
                "channel": 1, "value": 100, "transition": "linear", "duration": 100
            })))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(handle.snapshot().await.unwrap()[0], 100);
        let sent: Vec<u8> = log.frames().iter().map(|f| f[0]).collect();
        assert_eq!(sent.last(), Some(&100));
        assert!(sent.windows(2).all(|w| w[0] <= w[1]), "{sent:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_reported_and_sender_keeps_running() {
        let store = Arc::new(MemoryFrameStore::new());
        let log = FrameLog::new();
        let sender = open_sender(SenderConfig::new("u"), store.as_ref(), Box::new(log.output()))
            .await
            .unwrap();
        let handle = spawn_sender(sender, store.clone());

        let err = handle
            .send(payload(json!({"channel": 0, "value": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::Validation(_)));
        handle
            .send(payload(json!({"channel": 2, "value": 9})))
            .await
            .unwrap();
        assert_eq!(handle.snapshot().await.unwrap()[1], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_persists_and_stops() {
        let store = Arc::new(MemoryFrameStore::new());
        let log = FrameLog::new();
        let sender = open_sender(SenderConfig::new("u"), store.as_ref(), Box::new(log.output()))
            .await
            .unwrap();
        let handle = spawn_sender(sender, store.clone());
        handle
            .send(payload(json!({
                "channel": 5, "value": 77, "transition": "sine", "duration": 10000
            })))
            .await
            .unwrap();

        let frame = handle.shutdown().await.unwrap();
        assert_eq!(frame[4], 77);
        assert_eq!(store.load("u").await.unwrap().unwrap()[4], 77);
        assert!(log.is_closed());
        assert!(matches!(
            handle.snapshot().await,
            Err(SenderError::Stopped(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn save_values_off_starts_from_zero_and_skips_saving() {
        let store = Arc::new(MemoryFrameStore::new());
        let mut saved = vec![0i64; CHANNEL_COUNT];
        saved[0] = 200;
        store.insert_raw("u", saved).await;

        let config = SenderConfig {
            save_values: false,
            ..SenderConfig::new("u")
        };
        let sender = open_sender(config, store.as_ref(), Box::new(FrameLog::new().output()))
            .await
            .unwrap();
        assert_eq!(sender.frame().get(1), 0);
        let handle = spawn_sender(sender, store.clone());
        handle
            .send(payload(json!({"channel": 1, "value": 5})))
            .await
            .unwrap();
        handle.shutdown().await.unwrap();
        assert_eq!(store.load("u").await.unwrap().unwrap()[0], 200);
    }
}
