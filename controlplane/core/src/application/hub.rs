// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

// Communication Hub - Encrypted Pub/Sub for Inter-Container Traffic
//
// Routes command/query/event/heartbeat/response/broadcast messages between
// containers over tokio broadcast channels: one channel per target container
// plus a shared broadcast channel for untargeted messages. Delivery is
// at-most-once from the bus's own perspective; callers needing reliability
// layer request/response with timeouts on top of `wait_for_response`.

use crate::config::HubSettings;
use crate::domain::api::{ContainerApi, ProxyResponse};
use crate::domain::container::ContainerId;
use crate::domain::error::HubError;
use crate::domain::message::{ContainerMessage, MessageId, MessageType};
use crate::domain::store::SharedStore;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const KEY_SLOT: &str = "hub/encryption-key";
const MESSAGE_PREFIX: &str = "hub/msg/";
const RESPONSE_PREFIX: &str = "hub/response/";
const SUBSCRIPTION_PREFIX: &str = "hub/subs/";
const RESPONSE_POLL: Duration = Duration::from_secs(1);

/// Handler invoked for inbound messages of a registered type. Returning
/// `Some(value)` answers the message through a response slot.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        message: &ContainerMessage,
        payload: &Value,
    ) -> anyhow::Result<Option<Value>>;
}

/// The hub's own lightweight directory entry, distinct from the registry's
/// canonical record: fan-out bookkeeping and statistics only.
#[derive(Debug, Clone)]
pub struct HubContainerEntry {
    pub api_endpoint: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub subscriptions: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct HubStats {
    sent: AtomicU64,
    routed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStatsSnapshot {
    pub active_containers: usize,
    pub subscriptions: usize,
    pub sent: u64,
    pub routed: u64,
    pub failed: u64,
}

/// Encrypted pub/sub bus with request/response correlation and an HTTP
/// proxy facade to container APIs.
pub struct CommunicationHub {
    source: ContainerId,
    store: Arc<dyn SharedStore>,
    api: Arc<dyn ContainerApi>,
    settings: HubSettings,
    broadcast_tx: broadcast::Sender<ContainerMessage>,
    targets: DashMap<ContainerId, broadcast::Sender<ContainerMessage>>,
    directory: Arc<DashMap<ContainerId, HubContainerEntry>>,
    handlers: RwLock<HashMap<MessageType, Vec<Arc<dyn MessageHandler>>>>,
    cipher: Option<Aes256Gcm>,
    stats: Arc<HubStats>,
    queue_tx: mpsc::Sender<ContainerMessage>,
    queue_rx: Mutex<Option<mpsc::Receiver<ContainerMessage>>>,
}

impl CommunicationHub {
    /// Construct the hub, setting up payload encryption when enabled.
    ///
    /// Key setup failure downgrades to plaintext rather than refusing to
    /// start: availability over confidentiality.
    pub async fn new(
        source: ContainerId,
        store: Arc<dyn SharedStore>,
        api: Arc<dyn ContainerApi>,
        settings: HubSettings,
    ) -> Arc<Self> {
        let cipher = if settings.encrypt {
            match Self::load_or_create_key(store.as_ref()).await {
                Ok(key) => Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))),
                Err(e) => {
                    warn!("Hub encryption setup failed, falling back to plaintext: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (broadcast_tx, _) = broadcast::channel(settings.channel_capacity);
        let (queue_tx, queue_rx) = mpsc::channel(settings.channel_capacity);

        let hub = Arc::new(Self {
            source,
            store,
            api,
            settings,
            broadcast_tx,
            targets: DashMap::new(),
            directory: Arc::new(DashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            cipher,
            stats: Arc::new(HubStats::default()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        });

        hub.register_handler(
            MessageType::Heartbeat,
            Arc::new(HeartbeatHandler {
                directory: Arc::clone(&hub.directory),
            }),
        );
        hub.register_handler(
            MessageType::Query,
            Arc::new(HubStatusHandler { hub: Arc::downgrade(&hub) }),
        );

        hub
    }

    /// Fetch the symmetric key from the store, generating and persisting it
    /// on first use. A concurrent creator wins via compare-and-swap.
    async fn load_or_create_key(store: &dyn SharedStore) -> Result<[u8; 32], HubError> {
        if let Some(value) = store.get(KEY_SLOT).await? {
            return decode_key(&value);
        }

        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        let encoded = Value::String(BASE64.encode(key));

        if store
            .compare_and_swap(KEY_SLOT, None, Some(encoded), None)
            .await?
        {
            return Ok(key);
        }
        // Lost the race; use whatever was stored.
        let value = store
            .get(KEY_SLOT)
            .await?
            .ok_or_else(|| HubError::EncryptionSetup("key vanished after race".to_string()))?;
        decode_key(&value)
    }

    pub fn source(&self) -> &ContainerId {
        &self.source
    }

    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    // ---- message sending ----------------------------------------------

    /// Encrypt (when configured), store a TTL-bound copy, and route the
    /// message to its target channel or the broadcast channel.
    pub async fn send_message(&self, mut msg: ContainerMessage) -> Result<MessageId, HubError> {
        if let Some(cipher) = &self.cipher {
            self.seal_payload(cipher, &mut msg)?;
        }

        let id = msg.message_id;
        self.store
            .put(
                &format!("{MESSAGE_PREFIX}{id}"),
                serde_json::to_value(&msg).map_err(crate::domain::error::StoreError::from)?,
                Some(Duration::from_secs(msg.ttl_seconds)),
            )
            .await?;

        // A send with no live receivers is not an error: at-most-once.
        let receivers = match &msg.target_container {
            Some(target) => self.target_sender(target).send(msg).unwrap_or(0),
            None => self.broadcast_tx.send(msg).unwrap_or(0),
        };
        if receivers == 0 {
            debug!(message_id = %id, "no subscribers for message");
        }

        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gridplane_hub_messages_sent_total").increment(1);
        Ok(id)
    }

    pub async fn send_command(
        &self,
        target: ContainerId,
        payload: Value,
    ) -> Result<MessageId, HubError> {
        self.send_message(ContainerMessage::command(self.source.clone(), target, payload))
            .await
    }

    pub async fn send_query(
        &self,
        target: ContainerId,
        payload: Value,
    ) -> Result<MessageId, HubError> {
        self.send_message(ContainerMessage::query(self.source.clone(), target, payload))
            .await
    }

    pub async fn send_event(
        &self,
        target: Option<ContainerId>,
        payload: Value,
    ) -> Result<MessageId, HubError> {
        self.send_message(ContainerMessage::event(self.source.clone(), target, payload))
            .await
    }

    // ---- request/response correlation ---------------------------------

    /// Poll the response slot once per second up to `timeout_secs`.
    ///
    /// Deliberately poll-based rather than a blocking subscribe; returns
    /// `None` on timeout. The slot is deleted on first read.
    pub async fn wait_for_response(
        &self,
        message_id: MessageId,
        timeout_secs: u64,
    ) -> Result<Option<Value>, HubError> {
        let key = format!("{RESPONSE_PREFIX}{message_id}");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if let Some(value) = self.store.get(&key).await? {
                self.store.delete(&key).await?;
                return Ok(Some(value));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RESPONSE_POLL).await;
        }
    }

    /// Write a TTL-bound response slot keyed by the original message id.
    pub async fn send_response(
        &self,
        original: MessageId,
        source: &ContainerId,
        data: Value,
    ) -> Result<(), HubError> {
        self.store
            .put(
                &format!("{RESPONSE_PREFIX}{original}"),
                json!({
                    "source": source,
                    "data": data,
                    "timestamp": Utc::now(),
                }),
                Some(Duration::from_secs(self.settings.response_ttl_secs)),
            )
            .await?;
        Ok(())
    }

    // ---- handler registry ---------------------------------------------

    pub fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    /// Remove a handler by name. Returns whether one was removed.
    pub fn unregister_handler(&self, message_type: MessageType, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(&message_type) {
            let before = list.len();
            list.retain(|h| h.name() != name);
            return list.len() < before;
        }
        false
    }

    // ---- hub container directory --------------------------------------

    pub async fn register_container(
        &self,
        id: ContainerId,
        api_endpoint: Option<String>,
    ) -> Result<(), HubError> {
        let now = Utc::now();
        self.directory.insert(
            id,
            HubContainerEntry {
                api_endpoint,
                registered_at: now,
                last_seen: now,
                subscriptions: BTreeSet::new(),
            },
        );
        Ok(())
    }

    pub async fn unregister_container(&self, id: &ContainerId) -> Result<(), HubError> {
        let removed = self.directory.remove(id);
        self.targets.remove(id);
        if let Some((_, entry)) = removed {
            for topic in entry.subscriptions {
                self.store
                    .set_remove(&format!("{SUBSCRIPTION_PREFIX}{id}"), &topic)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn subscribe_container(
        &self,
        id: &ContainerId,
        topic: &str,
    ) -> Result<(), HubError> {
        let mut entry = self
            .directory
            .get_mut(id)
            .ok_or_else(|| HubError::UnknownContainer(id.clone()))?;
        entry.subscriptions.insert(topic.to_string());
        drop(entry);
        self.store
            .set_add(&format!("{SUBSCRIPTION_PREFIX}{id}"), topic)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_container(
        &self,
        id: &ContainerId,
        topic: &str,
    ) -> Result<(), HubError> {
        if let Some(mut entry) = self.directory.get_mut(id) {
            entry.subscriptions.remove(topic);
        }
        self.store
            .set_remove(&format!("{SUBSCRIPTION_PREFIX}{id}"), topic)
            .await?;
        Ok(())
    }

    pub fn touch_container(&self, id: &ContainerId) {
        if let Some(mut entry) = self.directory.get_mut(id) {
            entry.last_seen = Utc::now();
        }
    }

    // ---- subscriptions ------------------------------------------------

    /// Subscribe to untargeted (broadcast) traffic.
    pub fn subscribe_broadcast(&self) -> broadcast::Receiver<ContainerMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Subscribe to traffic targeted at a specific container.
    pub fn subscribe_target(&self, id: &ContainerId) -> broadcast::Receiver<ContainerMessage> {
        self.target_sender(id).subscribe()
    }

    fn target_sender(&self, id: &ContainerId) -> broadcast::Sender<ContainerMessage> {
        self.targets
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(self.settings.channel_capacity).0)
            .value()
            .clone()
    }

    // ---- proxying ------------------------------------------------------

    /// Forward an HTTP-style call to a container registered with the hub.
    pub async fn proxy_request(
        &self,
        id: &ContainerId,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<ProxyResponse, HubError> {
        let endpoint = self
            .directory
            .get(id)
            .and_then(|entry| entry.api_endpoint.clone())
            .ok_or_else(|| HubError::UnknownContainer(id.clone()))?;
        Ok(self.api.proxy(&endpoint, method, path, body).await?)
    }

    // ---- stats ---------------------------------------------------------

    pub fn stats(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            active_containers: self.directory.len(),
            subscriptions: self
                .directory
                .iter()
                .map(|entry| entry.subscriptions.len())
                .sum(),
            sent: self.stats.sent.load(Ordering::Relaxed),
            routed: self.stats.routed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    // ---- encryption ----------------------------------------------------

    fn seal_payload(&self, cipher: &Aes256Gcm, msg: &mut ContainerMessage) -> Result<(), HubError> {
        if msg.encrypted {
            return Ok(());
        }
        let plaintext = serde_json::to_vec(&msg.payload)
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        let mut nonce = [0u8; 12];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        msg.payload = Value::String(BASE64.encode(sealed));
        msg.encrypted = true;
        Ok(())
    }

    /// Decrypt a message's payload; plaintext messages pass through.
    pub fn open_payload(&self, msg: &ContainerMessage) -> Result<Value, HubError> {
        if !msg.encrypted {
            return Ok(msg.payload.clone());
        }
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| HubError::Encryption("no key for encrypted payload".to_string()))?;
        let sealed = msg
            .payload
            .as_str()
            .ok_or_else(|| HubError::Encryption("encrypted payload is not a string".to_string()))?;
        let sealed = BASE64
            .decode(sealed)
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        if sealed.len() < 12 {
            return Err(HubError::Encryption("sealed payload too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(12);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| HubError::Encryption(e.to_string()))?;
        Ok(serde_json::from_slice(&plaintext).map_err(|e| HubError::Encryption(e.to_string()))?)
    }

    // ---- listener / processor ------------------------------------------

    /// Spawn the listener (inbound channels → queue) and processor
    /// (queue → handlers) tasks, both supervised by `cancel`.
    pub fn spawn_loops(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Subscribe before spawning so nothing sent between this call and
        // the task's first poll is lost.
        let listener = {
            let hub = Arc::clone(self);
            let cancel = cancel.clone();
            let broadcast_rx = self.subscribe_broadcast();
            let own_rx = self.subscribe_target(&self.source);
            tokio::spawn(async move {
                hub.run_listener(broadcast_rx, own_rx, cancel).await;
            })
        };
        handles.push(listener);

        let processor = {
            let hub = Arc::clone(self);
            tokio::spawn(async move {
                hub.run_processor(cancel).await;
            })
        };
        handles.push(processor);

        handles
    }

    async fn run_listener(
        &self,
        mut broadcast_rx: broadcast::Receiver<ContainerMessage>,
        mut own_rx: broadcast::Receiver<ContainerMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = broadcast_rx.recv() => msg,
                msg = own_rx.recv() => msg,
            };
            match msg {
                Ok(msg) => {
                    if self.queue_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("hub listener lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("hub listener stopped");
    }

    async fn run_processor(&self, cancel: CancellationToken) {
        let Some(mut rx) = self.queue_rx.lock().take() else {
            warn!("hub processor already running");
            return;
        };
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => msg,
            };
            let Some(msg) = msg else { break };
            self.dispatch(msg).await;
        }
        debug!("hub processor stopped");
    }

    /// Decrypt and hand the message to every handler registered for its
    /// type, answering through a response slot when a handler returns data.
    async fn dispatch(&self, msg: ContainerMessage) {
        let payload = match self.open_payload(&msg) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(message_id = %msg.message_id, "failed to open payload: {}", e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("gridplane_hub_messages_failed_total").increment(1);
                return;
            }
        };

        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .get(&msg.message_type)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }

        let mut any_ok = false;
        for handler in handlers {
            match handler.handle(&msg, &payload).await {
                Ok(Some(response)) => {
                    any_ok = true;
                    if let Err(e) = self
                        .send_response(msg.message_id, &self.source, response)
                        .await
                    {
                        warn!(message_id = %msg.message_id, "failed to write response slot: {}", e);
                    }
                }
                Ok(None) => any_ok = true,
                Err(e) => {
                    warn!(
                        handler = handler.name(),
                        message_id = %msg.message_id,
                        "handler failed: {}", e
                    );
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("gridplane_hub_messages_failed_total").increment(1);
                }
            }
        }
        if any_ok {
            self.stats.routed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("gridplane_hub_messages_routed_total").increment(1);
        }
    }
}

fn decode_key(value: &Value) -> Result<[u8; 32], HubError> {
    let encoded = value
        .as_str()
        .ok_or_else(|| HubError::EncryptionSetup("stored key is not a string".to_string()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| HubError::EncryptionSetup(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| HubError::EncryptionSetup("stored key has wrong length".to_string()))
}

/// Default handler: answers heartbeats with an ack and refreshes the
/// sender's last-seen timestamp in the hub directory.
struct HeartbeatHandler {
    directory: Arc<DashMap<ContainerId, HubContainerEntry>>,
}

#[async_trait]
impl MessageHandler for HeartbeatHandler {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn handle(
        &self,
        message: &ContainerMessage,
        _payload: &Value,
    ) -> anyhow::Result<Option<Value>> {
        if let Some(mut entry) = self.directory.get_mut(&message.source_container) {
            entry.last_seen = Utc::now();
        }
        Ok(Some(json!({"ack": true, "received_at": Utc::now()})))
    }
}

/// Default handler: answers `{"query": "hub_status"}` with live statistics.
struct HubStatusHandler {
    hub: std::sync::Weak<CommunicationHub>,
}

#[async_trait]
impl MessageHandler for HubStatusHandler {
    fn name(&self) -> &str {
        "hub_status"
    }

    async fn handle(
        &self,
        _message: &ContainerMessage,
        payload: &Value,
    ) -> anyhow::Result<Option<Value>> {
        if payload.get("query").and_then(Value::as_str) != Some("hub_status") {
            return Ok(None);
        }
        let Some(hub) = self.hub.upgrade() else {
            return Ok(None);
        };
        info!("answering hub_status query");
        Ok(Some(serde_json::to_value(hub.stats())?))
    }
}
