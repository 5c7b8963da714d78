use crate::error::ChannelError;
use crate::signaling::protocol::Envelope;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Both directions of an established channel. The inbound side closing
/// means the channel dropped.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
}

/// The real-time bidirectional message channel. Reconnection, if any, is the
/// implementation's business.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        auth_token: Option<&str>,
    ) -> Result<TransportLink, ChannelError>;
}

/// JSON envelopes over a WebSocket.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

pub(crate) fn endpoint_url(endpoint: &str, auth_token: Option<&str>) -> Result<Url, ChannelError> {
    let mut url = Url::parse(endpoint).map_err(|e| ChannelError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ChannelError::InvalidEndpoint {
                endpoint: endpoint.to_owned(),
                reason: format!("unsupported scheme `{other}`"),
            })
        }
    }
    if let Some(token) = auth_token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(
        &self,
        endpoint: &str,
        auth_token: Option<&str>,
    ) -> Result<TransportLink, ChannelError> {
        let url = endpoint_url(endpoint, auth_token)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        info!("connected to signaling server {}", url.host_str().unwrap_or(endpoint));

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("dropping unserializable frame `{}`: {e}", envelope.event);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    warn!("signaling write failed: {e}");
                    break;
                }
            }
            let _ = ws_tx.close().await;
            debug!("signaling writer finished");
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            if in_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("{}", ChannelError::Malformed(e.to_string())),
                    },
                    Ok(Message::Close(frame)) => {
                        info!("signaling server closed the channel: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("{}", ChannelError::Dropped(e.to_string()));
                        break;
                    }
                }
            }
            debug!("signaling reader finished");
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// The far end of a [`MemoryTransport`] connection.
pub struct MemoryConnection {
    pub endpoint: String,
    pub auth_token: Option<String>,
    /// Frames the client emitted.
    pub from_client: mpsc::UnboundedReceiver<Envelope>,
    /// Frames delivered to the client; dropping it drops the channel.
    pub to_client: mpsc::UnboundedSender<Envelope>,
}

/// In-process transport. Every `connect` hands the server side to whoever
/// holds the acceptor returned by [`MemoryTransport::new`].
pub struct MemoryTransport {
    accept: Option<mpsc::UnboundedSender<MemoryConnection>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { accept: Some(tx) }, rx)
    }

    /// A transport whose every connection attempt fails.
    pub fn refusing() -> Self {
        Self { accept: None }
    }
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn connect(
        &self,
        endpoint: &str,
        auth_token: Option<&str>,
    ) -> Result<TransportLink, ChannelError> {
        let accept = self
            .accept
            .as_ref()
            .ok_or_else(|| ChannelError::Connect("connection refused".into()))?;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        accept
            .send(MemoryConnection {
                endpoint: endpoint.to_owned(),
                auth_token: auth_token.map(str::to_owned),
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| ChannelError::Connect("no acceptor".into()))?;
        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
