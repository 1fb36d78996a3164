//! Hub (C4): panel registry, SDK registry, routing, dedup, broadcast.
//!
//! Panels connect inbound over axum; SDKs are dialed outbound as
//! `tokio-tungstenite` clients. Both are wrapped by the same
//! [`Connection`]/[`PeerReader`] pair (§4.2) so dedup/broadcast logic is
//! written once against that shape rather than against two divergent
//! socket APIs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use relay_protocol::{kinds, ActionAckPayload, ActionPayload, Envelope, RegisterPayload};
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, info, warn};

use crate::connection::{Connection, PeerReader, SdkStream};
use crate::error::{DialError, HubError};
use crate::store::{Store, DEFAULT_TTL};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// The central multiplexer. Always held behind an `Arc` — the panel read
/// loop, the SDK read loop, and the managed-upstream supervisor all need
/// their own owned handle to spawn further work.
pub struct Hub {
    pub(crate) store: Arc<dyn Store>,
    panel_auth_token: Option<String>,
    default_sdk_auth_token: Option<String>,

    next_panel_id: AtomicU64,
    panels: RwLock<HashMap<u64, Arc<Connection>>>,

    sdks: RwLock<HashMap<String, Arc<Connection>>>,
    /// Per-`target_id` guard serializing the dial slow-path so concurrent
    /// callers racing on an unknown target never produce two live
    /// connections (§4.3.6).
    dial_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    route_auth: RwLock<HashMap<String, String>>,
}

impl Hub {
    pub fn new(
        store: Arc<dyn Store>,
        panel_auth_token: Option<String>,
        default_sdk_auth_token: Option<String>,
    ) -> Self {
        Self {
            store,
            panel_auth_token,
            default_sdk_auth_token,
            next_panel_id: AtomicU64::new(0),
            panels: RwLock::new(HashMap::new()),
            sdks: RwLock::new(HashMap::new()),
            dial_locks: RwLock::new(HashMap::new()),
            route_auth: RwLock::new(HashMap::new()),
        }
    }

    /// `true` when the panel token configured at construction matches
    /// the caller's bearer token (or no token was configured at all).
    pub fn panel_authorized(&self, bearer: Option<&str>) -> bool {
        match &self.panel_auth_token {
            None => true,
            Some(expected) if expected.is_empty() => true,
            Some(expected) => bearer.is_some_and(|token| token == expected),
        }
    }

    pub fn panel_count(&self) -> usize {
        // Best-effort snapshot; callers needing a guaranteed-fresh count
        // should not rely on this outside of tests/metrics.
        self.panels.try_read().map(|p| p.len()).unwrap_or(0)
    }

    // -- §4.3.1 -------------------------------------------------------

    /// Fails with `InvalidArgument` when `target_id` or `sdk_url` is
    /// empty. Writes the route and the per-route auth token as a pair;
    /// does not dial.
    pub async fn add_route(
        &self,
        target_id: &str,
        sdk_url: &str,
        auth_token: Option<String>,
    ) -> Result<(), HubError> {
        if target_id.is_empty() || sdk_url.is_empty() {
            return Err(HubError::InvalidArgument(
                "target_id and sdk_url are required".to_owned(),
            ));
        }
        self.store.set_route(target_id, sdk_url).await?;
        self.route_auth
            .write()
            .await
            .insert(target_id.to_owned(), auth_token.unwrap_or_default());
        Ok(())
    }

    async fn route_auth_token(&self, target_id: &str) -> Option<String> {
        self.route_auth
            .read()
            .await
            .get(target_id)
            .filter(|token| !token.is_empty())
            .cloned()
    }

    // -- §4.3.2 is `supervisor::spawn`, called from `lib.rs`/`main.rs` --

    // -- §4.3.3 / §4.3.4 ------------------------------------------------

    /// Registers a freshly upgraded panel socket and runs its read loop
    /// until it terminates, then unregisters and closes it (§4.3.3
    /// steps 3-4; the auth check and the HTTP upgrade itself live in the
    /// axum handler in `http.rs`, since the upgrade must not be attempted
    /// at all when auth fails).
    pub async fn run_panel_session(self: &Arc<Self>, socket: axum::extract::ws::WebSocket) {
        let (conn, mut reader) = Connection::from_panel(socket);
        let conn = Arc::new(conn);
        let panel_id = self.next_panel_id.fetch_add(1, Ordering::Relaxed);
        self.panels.write().await.insert(panel_id, conn.clone());
        info!(panel_id, active_panels = self.panels.read().await.len(), "panel connected");

        loop {
            match reader.read_json().await {
                Ok(env) => self.handle_panel_frame(env).await,
                Err(err) => {
                    debug!(panel_id, %err, "panel read loop ending");
                    break;
                }
            }
        }

        self.panels.write().await.remove(&panel_id);
        conn.close().await;
        info!(panel_id, active_panels = self.panels.read().await.len(), "panel disconnected");
    }

    async fn handle_panel_frame(self: &Arc<Self>, env: Envelope) {
        if !env.is_action() {
            debug!(kind = %env.kind, msg_id = %env.msg_id, "ignoring non-action frame from panel");
            return;
        }
        if let Err(err) = self.handle_action(&env).await {
            warn!(msg_id = %env.msg_id, target_id = ?env.target_id, %err, "action forward failed");
            let error_env = Envelope::forward_failed(&env, err.to_string(), now_ms());
            self.broadcast(&error_env).await;
        }
    }

    // -- §4.3.5 ---------------------------------------------------------

    /// Contractual ordering: reject empty `msg_id` → dedup check →
    /// parse payload → resolve target URL → ensure SDK connection →
    /// write → mark processed.
    pub async fn handle_action(self: &Arc<Self>, env: &Envelope) -> Result<(), HubError> {
        if env.msg_id.is_empty() {
            return Err(HubError::InvalidArgument("empty msg_id".to_owned()));
        }

        if self.store.is_processed(&env.msg_id).await? {
            let ack = Envelope::duplicate_ack(env, now_ms());
            info!(msg_id = %env.msg_id, "duplicate action ignored");
            self.broadcast(&ack).await;
            return Ok(());
        }

        let payload: ActionPayload = match &env.payload {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| HubError::MalformedPayload(e.to_string()))?,
            None => return Err(HubError::MalformedPayload("missing payload".to_owned())),
        };

        let target_id = env.target_id.clone().unwrap_or_default();
        let target_url = match payload.target_url.filter(|u| !u.is_empty()) {
            Some(url) => url,
            None => {
                let stored = self.store.get_route(&target_id).await?;
                if stored.is_empty() {
                    return Err(HubError::MissingTargetUrl);
                }
                stored
            }
        };

        info!(target_id = %target_id, target_url = %target_url, msg_id = %env.msg_id, "resolved route");

        let auth_token = self.route_auth_token(&target_id).await;
        let sdk_conn = self.ensure_sdk_conn(&target_id, &target_url, auth_token).await?;

        sdk_conn.write_json(env).await?;
        debug!(msg_id = %env.msg_id, target_id = %target_id, "forwarded action to sdk");

        if let Err(err) = self.store.mark_processed(&env.msg_id, DEFAULT_TTL).await {
            warn!(msg_id = %env.msg_id, %err, "mark_processed failed after successful forward");
        }

        Ok(())
    }

    // -- §4.3.6 -----------------------------------------------------------

    /// Fast path: an existing live connection for `target_id` is
    /// returned with no dial and no auth check. Slow path is serialized
    /// per `target_id` so concurrent callers racing on the same unknown
    /// target never produce two live connections.
    pub async fn ensure_sdk_conn(
        self: &Arc<Self>,
        target_id: &str,
        url: &str,
        auth_token: Option<String>,
    ) -> Result<Arc<Connection>, HubError> {
        if let Some(conn) = self.sdks.read().await.get(target_id) {
            return Ok(conn.clone());
        }

        let dial_lock = {
            let mut locks = self.dial_locks.write().await;
            locks
                .entry(target_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = dial_lock.lock().await;

        // Re-check under the per-target guard: another caller may have
        // finished dialing while we waited for the lock.
        if let Some(conn) = self.sdks.read().await.get(target_id) {
            return Ok(conn.clone());
        }

        let resolved_token = auth_token
            .filter(|t| !t.is_empty())
            .or_else(|| self.default_sdk_auth_token.clone());

        let mut request = url
            .into_client_request()
            .map_err(|source| DialError::InvalidUrl {
                url: url.to_owned(),
                source,
            })?;
        if let Some(token) = &resolved_token {
            if let Ok(value) = format!("Bearer {token}").parse() {
                request.headers_mut().insert("Authorization", value);
            }
        }

        info!(target_id = %target_id, url = %url, "dialing sdk");
        let (stream, _response) =
            tokio_tungstenite::connect_async(request)
                .await
                .map_err(|source| DialError::Connect {
                    url: url.to_owned(),
                    source,
                })?;
        info!(target_id = %target_id, url = %url, "sdk connected");

        let conn = self.register_sdk_conn(target_id, stream).await;

        if !target_id.is_empty() {
            if let Err(err) = self.store.set_route(target_id, url).await {
                warn!(target_id = %target_id, %err, "failed to refresh route after dial");
            }
            self.route_auth
                .write()
                .await
                .insert(target_id.to_owned(), resolved_token.unwrap_or_default());
        }

        Ok(conn)
    }

    async fn register_sdk_conn(self: &Arc<Self>, target_id: &str, stream: SdkStream) -> Arc<Connection> {
        let (conn, reader) = Connection::from_sdk(stream);
        let conn = Arc::new(conn);
        self.sdks
            .write()
            .await
            .insert(target_id.to_owned(), conn.clone());

        let hub = self.clone();
        let spawned_conn = conn.clone();
        let target_id = target_id.to_owned();
        tokio::spawn(async move {
            hub.run_sdk_session(target_id, spawned_conn, reader).await;
        });

        conn
    }

    // -- §4.3.7 -------------------------------------------------------------

    async fn run_sdk_session(self: Arc<Self>, target_id: String, conn: Arc<Connection>, mut reader: PeerReader) {
        loop {
            match reader.read_json().await {
                Ok(env) => self.handle_sdk_frame(&target_id, env).await,
                Err(err) => {
                    debug!(target_id = %target_id, %err, "sdk read loop ending");
                    break;
                }
            }
        }

        // Evict only if the slot still points at this exact connection,
        // so a concurrently dialed replacement is never evicted.
        let mut sdks = self.sdks.write().await;
        if sdks.get(&target_id).is_some_and(|cur| Arc::ptr_eq(cur, &conn)) {
            sdks.remove(&target_id);
        }
        drop(sdks);
        conn.close().await;
        info!(target_id = %target_id, "sdk disconnected");
    }

    async fn handle_sdk_frame(&self, target_id: &str, env: Envelope) {
        match env.kind.as_str() {
            kinds::REGISTER => {
                if let Some(payload) = env
                    .payload
                    .clone()
                    .and_then(|v| serde_json::from_value::<RegisterPayload>(v).ok())
                    .filter(|p| !p.target_id.is_empty() && !p.sdk_url.is_empty())
                {
                    if let Err(err) = self.store.set_route(&payload.target_id, &payload.sdk_url).await {
                        warn!(target_id = %payload.target_id, %err, "register route update failed");
                    } else {
                        info!(target_id = %payload.target_id, sdk_url = %payload.sdk_url, "register route updated");
                    }
                } else {
                    debug!(target_id = %target_id, "dropped malformed register payload");
                }
            }
            kinds::ACTION_ACK => {
                if let Some(payload) = env
                    .payload
                    .clone()
                    .and_then(|v| serde_json::from_value::<ActionAckPayload>(v).ok())
                {
                    if let Err(err) = self
                        .store
                        .set_ack_status(&env.msg_id, "done", DEFAULT_TTL)
                        .await
                    {
                        warn!(msg_id = %env.msg_id, %err, "ack status update failed");
                    }
                    debug!(msg_id = %payload.action_msg_id, "ack status set to done");
                }
            }
            _ => {}
        }

        self.broadcast(&env).await;
    }

    // -- §4.3.8 -----------------------------------------------------------

    /// Writes `env` to every live panel. A per-panel write failure is
    /// logged and does not abort the fan-out to the rest.
    pub async fn broadcast(&self, env: &Envelope) {
        let panels = self.panels.read().await;
        debug!(count = panels.len(), kind = %env.kind, msg_id = %env.msg_id, "broadcasting to panels");
        for conn in panels.values() {
            if let Err(err) = conn.write_json(env).await {
                warn!(%err, "broadcast to panel failed");
            }
        }
    }

    /// Reconnect interval normalization and the supervisor loop itself
    /// live in `supervisor.rs` (C5); exposed here so `start_managed_upstream`
    /// reads as one call from `main`/tests.
    pub fn start_managed_upstream(
        self: &Arc<Self>,
        target_id: String,
        sdk_url: String,
        auth_token: Option<String>,
        reconnect_interval: Duration,
    ) {
        crate::supervisor::spawn(self.clone(), target_id, sdk_url, auth_token, reconnect_interval);
    }

    pub(crate) async fn sdk_is_live(&self, target_id: &str) -> bool {
        self.sdks.read().await.contains_key(target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn make_hub(panel_token: Option<&str>) -> Arc<Hub> {
        Arc::new(Hub::new(
            Arc::new(MemoryStore::new()),
            panel_token.map(ToOwned::to_owned),
            None,
        ))
    }

    fn action_envelope(msg_id: &str, target_id: &str, target_url: Option<&str>) -> Envelope {
        Envelope {
            msg_id: msg_id.to_owned(),
            trace_id: None,
            kind: kinds::ACTION.to_owned(),
            target_id: Some(target_id.to_owned()),
            timestamp: 1,
            payload: serde_json::to_value(ActionPayload {
                action: "noop".to_owned(),
                params: None,
                target_url: target_url.map(ToOwned::to_owned),
            })
            .ok(),
        }
    }

    #[tokio::test]
    async fn add_route_rejects_empty_target_id_or_url() {
        let hub = make_hub(None);
        assert!(hub.add_route("", "ws://a", None).await.is_err());
        assert!(hub.add_route("T1", "", None).await.is_err());
        assert!(hub.add_route("T1", "ws://a", None).await.is_ok());
    }

    #[tokio::test]
    async fn handle_action_with_empty_msg_id_is_rejected() {
        let hub = make_hub(None);
        let env = Envelope {
            msg_id: String::new(),
            trace_id: None,
            kind: kinds::ACTION.to_owned(),
            target_id: Some("T1".to_owned()),
            timestamp: 1,
            payload: None,
        };
        let err = hub.handle_action(&env).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn handle_action_with_no_route_and_no_override_fails_missing_target_url() {
        let hub = make_hub(None);
        let env = action_envelope("m2", "TX", None);
        let err = hub.handle_action(&env).await.unwrap_err();
        assert!(matches!(err, HubError::MissingTargetUrl));
        assert!(!hub.store.is_processed("m2").await.unwrap());
    }

    #[tokio::test]
    async fn handle_action_duplicate_msg_id_short_circuits_without_dialing() {
        let hub = make_hub(None);
        hub.store.mark_processed("m1", DEFAULT_TTL).await.unwrap();
        let env = action_envelope("m1", "T1", None);
        // No route stored and no panel connected: a non-duplicate path
        // would fail with MissingTargetUrl. The duplicate path returns Ok.
        hub.handle_action(&env).await.unwrap();
    }

    #[tokio::test]
    async fn panel_authorized_allows_missing_token_when_none_configured() {
        let hub = make_hub(None);
        assert!(hub.panel_authorized(None));
        assert!(hub.panel_authorized(Some("anything")));
    }

    #[tokio::test]
    async fn panel_authorized_requires_exact_bearer_match_when_configured() {
        let hub = make_hub(Some("secret"));
        assert!(!hub.panel_authorized(None));
        assert!(!hub.panel_authorized(Some("wrong")));
        assert!(hub.panel_authorized(Some("secret")));
    }

    #[tokio::test]
    async fn sdk_is_live_false_when_never_dialed() {
        let hub = make_hub(None);
        assert!(!hub.sdk_is_live("T1").await);
    }
}
