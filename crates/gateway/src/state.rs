//! Connection Manager's owned state (spec §3 Connection Record, §4.2, §5).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use intermud_auth::CredentialStore;
use intermud_channels::ChannelService;
use intermud_common::config::GatewayConfig;
use intermud_protocol::{Envelope, MessageKind};
use intermud_ratelimit::RateLimiter;
use intermud_registry::RegistryAdapter;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};

/// One live socket, from accept to cleanup. Owned exclusively by the
/// Connection Manager; the Router only ever borrows it (spec §3 Ownership).
pub struct ConnectionRecord {
    pub id: String,
    pub host: String,
    mud_name: OnceLock<String>,
    authenticated: AtomicBool,
    pub connected_at: Instant,
    last_seen_at: Mutex<Instant>,
    pub message_count: AtomicU64,
    protocol_version: OnceLock<String>,
    sender: mpsc::UnboundedSender<String>,
    close_requested: AtomicBool,
    closed: Notify,
}

impl ConnectionRecord {
    pub fn new(id: String, host: String, sender: mpsc::UnboundedSender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            host,
            mud_name: OnceLock::new(),
            authenticated: AtomicBool::new(false),
            connected_at: now,
            last_seen_at: Mutex::new(now),
            message_count: AtomicU64::new(0),
            protocol_version: OnceLock::new(),
            sender,
            close_requested: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }

    /// Ask the owning read loop to close this connection (spec §4.2
    /// heartbeat timeout). Idempotent.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        self.closed.notify_one();
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Resolves once [`Self::request_close`] has been called. The read
    /// loop selects on this alongside the socket read future.
    pub async fn wait_for_close_request(&self) {
        if self.close_requested() {
            return;
        }
        self.closed.notified().await;
    }

    pub fn mud_name(&self) -> Option<&str> {
        self.mud_name.get().map(String::as_str)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Mark authenticated with the given (already-validated) MUD name.
    /// No-op if already authenticated — a connection record authenticates
    /// exactly once (spec §3: "immutable after").
    pub fn authenticate(&self, mud_name: String, protocol_version: String) {
        let _ = self.mud_name.set(mud_name);
        let _ = self.protocol_version.set(protocol_version);
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn last_seen_at(&self) -> Instant {
        *self.last_seen_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn touch(&self) {
        *self.last_seen_at.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Send a pre-encoded frame. Returns false if the write side has
    /// closed; the caller schedules cleanup on such a failure.
    pub fn send_raw(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn send(&self, envelope: &Envelope) -> bool {
        self.send_raw(&intermud_protocol::encode(envelope))
    }
}

/// Shared gateway runtime state (spec §5 "Shared resources").
pub struct GatewayState {
    /// All live connections, keyed by connection id. Mutated only by the
    /// Connection Manager; read by the Router.
    pub connections: RwLock<HashMap<String, Arc<ConnectionRecord>>>,
    /// Authenticated peers, keyed by MUD name, for unicast/broadcast lookup.
    pub peers: RwLock<HashMap<String, String>>,
    /// Bounded per-kind history ring (spec §3, §8 invariant 9).
    pub history: RwLock<HashMap<MessageKind, VecDeque<Envelope>>>,
    pub channels: Arc<ChannelService>,
    pub registry: Arc<dyn RegistryAdapter>,
    pub credentials: Arc<dyn CredentialStore>,
    pub rate_limiter: RateLimiter,
    pub config: GatewayConfig,
}

impl GatewayState {
    pub fn new(
        channels: Arc<ChannelService>,
        registry: Arc<dyn RegistryAdapter>,
        credentials: Arc<dyn CredentialStore>,
        rate_limiter: RateLimiter,
        config: GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            channels,
            registry,
            credentials,
            rate_limiter,
            config,
        })
    }

    pub async fn register_connection(&self, record: Arc<ConnectionRecord>) {
        self.connections.write().await.insert(record.id.clone(), record);
    }

    /// Outcome of attempting to admit an authenticated name, honoring the
    /// configured duplicate-name policy (spec §9 open question, resolved in
    /// the project's design notes).
    pub async fn admit_peer(&self, mud_name: &str, conn_id: &str) -> AdmitOutcome {
        use intermud_common::config::DuplicateNamePolicy;

        let mut peers = self.peers.write().await;
        match peers.get(mud_name).cloned() {
            Some(existing_conn_id) if existing_conn_id != conn_id => {
                match self.config.duplicate_name_policy {
                    DuplicateNamePolicy::Allow => {
                        peers.insert(mud_name.to_string(), conn_id.to_string());
                        AdmitOutcome::AdmittedOverCollision { evicted: None }
                    },
                    DuplicateNamePolicy::PreemptOld => {
                        peers.insert(mud_name.to_string(), conn_id.to_string());
                        AdmitOutcome::AdmittedOverCollision {
                            evicted: Some(existing_conn_id),
                        }
                    },
                    DuplicateNamePolicy::RejectNew => AdmitOutcome::Rejected,
                }
            },
            _ => {
                peers.insert(mud_name.to_string(), conn_id.to_string());
                AdmitOutcome::Admitted
            },
        }
    }

    pub async fn connection_by_mud(&self, mud_name: &str) -> Option<Arc<ConnectionRecord>> {
        let conn_id = self.peers.read().await.get(mud_name).cloned()?;
        self.connections.read().await.get(&conn_id).cloned()
    }

    pub async fn authenticated_peers(&self) -> Vec<(String, Arc<ConnectionRecord>)> {
        let peers = self.peers.read().await;
        let connections = self.connections.read().await;
        peers
            .iter()
            .filter_map(|(mud, conn_id)| connections.get(conn_id).map(|c| (mud.clone(), Arc::clone(c))))
            .collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Remove a connection and, if it was authenticated under a name it
    /// still owns, remove that name from the peer map too (spec §4.2
    /// cleanup, §8 invariant 6).
    pub async fn remove_connection(&self, conn_id: &str) -> Option<Arc<ConnectionRecord>> {
        let removed = self.connections.write().await.remove(conn_id);
        if let Some(record) = &removed {
            if let Some(mud_name) = record.mud_name() {
                let mut peers = self.peers.write().await;
                if peers.get(mud_name) == Some(&conn_id.to_string()) {
                    peers.remove(mud_name);
                }
                let _ = self.registry.set_remove("connected_muds", mud_name).await;
                let _ = self.registry.delete(&format!("mud_info:{mud_name}")).await;
            }
        }
        removed
    }

    /// Append to the in-memory history ring for `envelope.kind`, trimming
    /// to `historyRingSize` (spec §3, §8 invariant 9). Best-effort mirror
    /// to the registry follows separately and never blocks routing.
    pub async fn append_history(&self, envelope: &Envelope) {
        let cap = self.config.history_ring_size;
        let mut history = self.history.write().await;
        let ring = history.entry(envelope.kind).or_default();
        ring.push_back(envelope.clone());
        while ring.len() > cap {
            ring.pop_front();
        }

        let registry = Arc::clone(&self.registry);
        let key = format!("message_history:{}", envelope.kind.as_str());
        if let Ok(raw) = serde_json::to_string(envelope) {
            if let Err(e) = registry.list_push(&key, &raw).await {
                tracing::warn!(kind = envelope.kind.as_str(), error = %e, "failed to persist history entry");
            } else {
                let _ = registry.list_trim(&key, cap).await;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    AdmittedOverCollision { evicted: Option<String> },
    Rejected,
}
