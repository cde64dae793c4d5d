use flux_jt1078::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GbError {
    /// 报文/码流解码失败
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid SDP: {0}")]
    Sdp(String),

    /// Digest 鉴权失败或质询无法解析
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    /// 对端返回非 2xx 响应
    #[error("SIP error: {status} {reason}")]
    Sip { status: u16, reason: String },

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Charset error: {0}")]
    Charset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GbError>;
