// RTP 传输层
// RTP over TCP（RFC 4571 两字节长度前缀）

pub mod packet;
pub mod packetizer;

pub use packet::{RtpHeader, RtpPacket};
pub use packetizer::{RtpPacketizer, MAX_RTP_PAYLOAD};
