use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// 帧头字节不足，等待更多数据
    #[error("Header too short: need {needed} bytes, have {available}")]
    HeaderTooShort { needed: usize, available: usize },

    /// 负载字节不足，等待更多数据
    #[error("Body too short: need {needed} bytes, have {available}")]
    BodyTooShort { needed: usize, available: usize },

    #[error("Unqualified data: magic 0x{0:08X}")]
    UnqualifiedData(u32),

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Unknown subpacket type: {0}")]
    UnknownSubpacketType(u8),

    #[error("Invalid BCD byte: 0x{0:02X}")]
    InvalidBcd(u8),

    #[error("Invalid SIM number: {0}")]
    InvalidSim(String),

    #[error("Body too large: {0} bytes")]
    BodyTooLarge(usize),
}

impl FrameError {
    /// 是否只是数据不完整（追加字节后可重试）
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::HeaderTooShort { .. } | Self::BodyTooShort { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
