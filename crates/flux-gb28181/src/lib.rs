// GB28181 设备侧实现
//
// 架构：
// - sip/: SIP 信令层（注册、心跳、MESSAGE 应答、INVITE/ACK/BYE）
// - session/: 点播会话编排
// - stream/: JT/T 1078 -> PS -> RTP over TCP 转发
// - ps/: PS 流封装层
// - rtp/: RTP 打包层

pub mod error;
pub mod media;
pub mod ps;
pub mod rtp;
pub mod session;
pub mod sip;
pub mod stream;

pub use error::{GbError, Result};
pub use media::{PayloadTypeMap, StreamType};
pub use session::{
    AdapterFactory, EndCallback, NoopHooks, SessionCommand, SessionDescriptor, SessionHandle,
    SessionHooks, SessionOrchestrator, SessionStream, SessionTable,
};
pub use sip::{
    ChannelInfo, DeviceIdentity, PlatformIdentity, RegistrationPhase, RegistrationStatus,
    SignalingClient, SignalingConfig, SipTransport, UdpSipTransport,
};
pub use stream::{FramePackager, StreamAdapter, StreamAdapterFactory, StreamConfig};
