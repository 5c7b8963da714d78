pub mod backend;
pub mod connection;
pub mod ice;
pub mod manager;
pub mod state;
pub mod types;

pub use backend::{PeerBackend, PeerEvent, PeerEventSink, PeerFactory, RemoteTrackInfo};
pub use connection::{WebRtcPeer, WebRtcPeerFactory};
pub use manager::PeerConnectionManager;
pub use state::{NegotiationRecord, NegotiationRole};
pub use types::{IceCandidate, IceServerConfig, PeerState, SdpKind, SessionDescription, TrackKind};
