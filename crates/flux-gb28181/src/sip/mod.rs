// GB28181 SIP 信令（设备侧）

pub mod agent;
pub mod charset;
pub mod client;
pub mod digest;
pub mod identity;
pub mod manscdp;
pub mod message;
pub mod registrar;
pub mod sdp;
pub mod transport;

pub use client::SignalingClient;
pub use digest::{DigestChallenge, DigestCredentials};
pub use identity::{ChannelInfo, DeviceIdentity, PlatformIdentity, SignalingConfig};
pub use message::{SipMessage, SipMethod, SipRequest, SipResponse};
pub use registrar::{Registrar, RegistrationPhase, RegistrationStatus};
pub use sdp::SdpSession;
pub use transport::{IncomingRequest, RequestHandler, SipTransport, UdpSipTransport};
