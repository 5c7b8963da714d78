use crate::error::ChannelError;
use crate::session::registry::Role;
use crate::signaling::protocol::{ClientMessage, Envelope, CONNECT_EVENT, DISCONNECT_EVENT};
use crate::signaling::transport::SignalingTransport;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
type HandlerMap = HashMap<String, Vec<(u64, Handler)>>;

/// Connection to the signaling channel with a generic pub/sub surface.
pub struct SignalingClient {
    transport: Arc<dyn SignalingTransport>,
    connected: Arc<AtomicBool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    handlers: Arc<Mutex<HandlerMap>>,
    next_handler: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingClient {
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            transport,
            connected: Arc::new(AtomicBool::new(false)),
            outbound: Mutex::new(None),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_handler: AtomicU64::new(1),
            reader: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Opens the channel. Failures are logged, never returned: callers look
    /// at [`is_connected`](Self::is_connected).
    pub async fn connect(&self, endpoint: &str, auth_token: Option<&str>) {
        if self.is_connected() {
            debug!("signaling already connected");
            return;
        }
        let link = match self.transport.connect(endpoint, auth_token).await {
            Ok(link) => link,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };

        *self.outbound.lock() = Some(link.outbound);
        self.connected.store(true, Ordering::SeqCst);
        info!("signaling channel up");
        dispatch(&self.handlers, &Envelope::new(CONNECT_EVENT, Value::Null));

        let handlers = self.handlers.clone();
        let connected = self.connected.clone();
        let mut inbound = link.inbound;
        let reader = tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                debug!("signaling <- {}", envelope.event);
                dispatch(&handlers, &envelope);
            }
            if connected.swap(false, Ordering::SeqCst) {
                warn!("{}", ChannelError::Dropped("inbound stream ended".into()));
                dispatch(&handlers, &Envelope::new(DISCONNECT_EVENT, Value::Null));
            }
        });
        if let Some(old) = self.reader.lock().replace(reader) {
            old.abort();
        }
    }

    /// Closes the channel locally.
    pub fn disconnect(&self) {
        self.outbound.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("signaling channel closed");
        }
    }

    /// Fire-and-forget publish. Returns whether the frame was queued.
    pub fn emit(&self, event: &str, payload: impl Serialize) -> bool {
        match serde_json::to_value(payload) {
            Ok(data) => self.emit_envelope(Envelope::new(event, data)),
            Err(e) => {
                warn!("{}", ChannelError::Malformed(e.to_string()));
                false
            }
        }
    }

    pub fn send(&self, message: &ClientMessage) -> bool {
        match message.to_envelope() {
            Ok(envelope) => self.emit_envelope(envelope),
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }

    fn emit_envelope(&self, envelope: Envelope) -> bool {
        if !self.is_connected() {
            warn!("`{}` not sent: {}", envelope.event, ChannelError::NotConnected);
            return false;
        }
        debug!("signaling -> {}", envelope.event);
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Subscribes `handler` to `event`. The handler stays registered until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .entry(event.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            event: event.to_owned(),
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }

    pub fn register(&self, user_id: &str, name: &str, role: Role) -> bool {
        self.send(&ClientMessage::RegisterUser {
            user_id: user_id.to_owned(),
            name: name.to_owned(),
            role,
        })
    }

    pub fn join_session(&self, session_id: &str, user_id: &str, user_name: &str, user_role: Role) -> bool {
        self.send(&ClientMessage::JoinSession {
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            user_name: user_name.to_owned(),
            user_role,
        })
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

fn dispatch(handlers: &Mutex<HandlerMap>, envelope: &Envelope) {
    // handlers run outside the lock so they may subscribe or unsubscribe
    let targets: Vec<Handler> = handlers
        .lock()
        .get(&envelope.event)
        .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
        .unwrap_or_default();
    if targets.is_empty() {
        debug!("no handler for `{}`", envelope.event);
    }
    for handler in targets {
        handler(&envelope.data);
    }
}

/// Handle for one `on` registration.
pub struct Subscription {
    id: u64,
    event: String,
    handlers: Weak<Mutex<HandlerMap>>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            let mut map = handlers.lock();
            if let Some(list) = map.get_mut(&self.event) {
                list.retain(|(id, _)| *id != self.id);
                if list.is_empty() {
                    map.remove(&self.event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_connect_only_clears_the_flag() {
        let client = SignalingClient::new(Arc::new(MemoryTransport::refusing()));
        client.connect("ws://nowhere", None).await;
        assert!(!client.is_connected());
        assert!(!client.emit("ping", json!({})));
    }

    #[tokio::test]
    async fn handlers_receive_payloads_until_unsubscribed() {
        let (transport, mut accept) = MemoryTransport::new();
        let client = SignalingClient::new(Arc::new(transport));
        client.connect("ws://mem", Some("tok")).await;
        assert!(client.is_connected());
        let conn = accept.recv().await.unwrap();
        assert_eq!(conn.auth_token.as_deref(), Some("tok"));

        let hits = Arc::new(AtomicUsize::new(0));
        let sub = {
            let hits = hits.clone();
            client.on("call-accepted", move |data| {
                assert_eq!(data["from"], "b");
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(client.handler_count("call-accepted"), 1);

        conn.to_client
            .send(Envelope::new("call-accepted", json!({"from": "b"})))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        sub.unsubscribe();
        assert_eq!(client.handler_count("call-accepted"), 0);
    }

    #[tokio::test]
    async fn emit_reaches_the_wire_and_drop_is_reported() {
        let (transport, mut accept) = MemoryTransport::new();
        let client = SignalingClient::new(Arc::new(transport));
        let (down_tx, mut down_rx) = mpsc::unbounded_channel();
        let _sub = client.on(DISCONNECT_EVENT, move |_| {
            let _ = down_tx.send(());
        });
        client.connect("ws://mem", None).await;
        let mut conn = accept.recv().await.unwrap();

        assert!(client.register("u-1", "Ann", Role::Requester));
        let frame = conn.from_client.recv().await.unwrap();
        assert_eq!(frame.event, "register-user");
        assert_eq!(frame.data["userId"], "u-1");

        drop(conn);
        tokio::time::timeout(Duration::from_secs(1), down_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!client.is_connected());
    }
}
