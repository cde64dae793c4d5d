// PS 流封装层
// GB28181 媒体负载：MPEG-2 Program Stream

pub mod muxer;
pub mod packet;

pub use muxer::{PsMuxer, PES_MAX_PAYLOAD};
pub use packet::PS_START_CODE;
