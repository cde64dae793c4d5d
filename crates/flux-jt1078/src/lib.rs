// flux-jt1078: JT/T 1078 音视频传输帧编解码
//
// - frame: 帧头位域编解码（魔数、标志位、BCD SIM 卡号、帧类型/分包类型）
// - parser: 按连接维护的拼包状态机，输出完整的音视频单元

pub mod bcd;
pub mod error;
pub mod frame;
pub mod parser;

pub use error::{FrameError, Result};
pub use frame::{Codec, FrameFlags, FrameIntervals, FrameType, SubpacketType, TransportFrame, MAGIC};
pub use parser::{FrameParser, MAX_UNIT_SIZE};
