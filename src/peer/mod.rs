pub mod codec;
pub mod connection;
pub mod coordinator;
pub mod ice;
pub mod media;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{RtcTransport, RtcTransportFactory};
pub use coordinator::{start_call, CallDeps, CallHandle, CallParams};
pub use media::{LocalStream, LocalTrack, MediaDevices, SyntheticDevices};
pub use state::{ConnectionState, NegotiationEvent};
pub use transport::{PeerTransport, TransportFactory};
pub use types::{IceCandidate, IceServerConfig, RemoteStream, SessionDescription, TrackKind};
