// 点播会话描述
// 由 INVITE（Subject 头部 + SDP）构造，ACK 时交给流适配器

use crate::error::{GbError, Result};
use crate::media::{PayloadTypeMap, StreamType};
use crate::sip::message::{uri_user, SipRequest};
use crate::sip::sdp::SdpSession;
use std::fmt;

/// 平台要求的媒体传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTransport {
    Tcp,
    Udp,
}

impl fmt::Display for MediaTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaTransport::Tcp => f.write_str("TCP"),
            MediaTransport::Udp => f.write_str("UDP"),
        }
    }
}

/// 支持的 SDP 媒体格式（96 PS / 8 PCMA）
const SUPPORTED_FORMATS: [u8; 2] = [96, 8];

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub call_id: String,
    /// 发起点播的平台 ID
    pub requester_id: String,
    /// 被点播的国标通道 ID
    pub target_channel_id: String,
    /// Subject 中的媒体发送者 ID
    pub source_channel_id: String,
    /// Play / Playback
    pub session_name: String,
    pub ssrc: u32,
    pub transport: MediaTransport,
    /// 设备主动连接平台（平台未声明 setup:active 时成立）
    pub tcp_active: bool,
    /// 媒体目的地址
    pub ip: String,
    pub port: u16,
    pub start_time: u64,
    pub stop_time: u64,
    pub download_speed: Option<u32>,

    /// 适配器监听 JT/T 1078 码流的端口，由会话钩子分配
    pub source_stream_port: u16,
    /// JT/T 1078 终端号和逻辑通道
    pub sim: String,
    pub channel: u8,
    /// 预先登记到 PS 流映射的流类型
    pub stream_types: Vec<StreamType>,
    pub payload_types: PayloadTypeMap,

    /// 原始 SDP offer，用于生成应答
    pub offer: SdpSession,
}

impl SessionDescriptor {
    /// 从 INVITE 构造并校验
    pub fn from_invite(req: &SipRequest) -> Result<Self> {
        let call_id = req
            .call_id()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GbError::Decode("INVITE without Call-ID".to_string()))?
            .to_string();

        let body = req
            .body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| GbError::Sdp("INVITE without SDP body".to_string()))?;
        let offer = SdpSession::parse(body)?;

        // Subject: 发送者ID:序号,接收者ID:序号
        let (sender, receiver) = parse_subject(req.header("Subject"));

        let requester_id = receiver
            .or_else(|| req.header("From").and_then(uri_user))
            .unwrap_or_default()
            .to_string();
        let source_channel_id = sender.unwrap_or_default().to_string();
        let target_channel_id = uri_user(&req.uri)
            .or(sender)
            .unwrap_or_default()
            .to_string();

        Self::from_offer(call_id, requester_id, target_channel_id, source_channel_id, offer)
    }

    pub fn from_offer(
        call_id: String,
        requester_id: String,
        target_channel_id: String,
        source_channel_id: String,
        offer: SdpSession,
    ) -> Result<Self> {
        if requester_id.is_empty() {
            return Err(GbError::Decode("requester id missing".to_string()));
        }
        if target_channel_id.is_empty() {
            return Err(GbError::Decode("channel id not resolved".to_string()));
        }

        let media = offer
            .video()
            .ok_or_else(|| GbError::Sdp("no media description".to_string()))?;
        if media.port == 0 {
            return Err(GbError::Sdp("media port is 0".to_string()));
        }
        if !media.formats.iter().any(|f| SUPPORTED_FORMATS.contains(f)) {
            return Err(GbError::Sdp(format!("no supported media format in {:?}", media.formats)));
        }
        if offer.connection.address.is_empty() {
            return Err(GbError::Sdp("connection address missing".to_string()));
        }

        let transport = if media.is_tcp() {
            MediaTransport::Tcp
        } else {
            MediaTransport::Udp
        };
        let tcp_active = !offer
            .setup()
            .map(|s| s.eq_ignore_ascii_case("active"))
            .unwrap_or(false);

        Ok(Self {
            call_id,
            requester_id,
            target_channel_id,
            source_channel_id,
            session_name: offer.session_name.clone(),
            ssrc: offer.ssrc.unwrap_or_else(rand::random),
            transport,
            tcp_active,
            ip: offer.connection.address.clone(),
            port: media.port,
            start_time: offer.start_time,
            stop_time: offer.stop_time,
            download_speed: offer.download_speed(),
            source_stream_port: 0,
            sim: String::new(),
            channel: 0,
            stream_types: Vec::new(),
            payload_types: PayloadTypeMap::from_rtpmaps(&media.rtpmap),
            offer,
        })
    }

    /// 媒体目的地址
    pub fn destination(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 会话路径，回调和日志中标识会话
    pub fn path(&self) -> String {
        format!("{}/{}", self.target_channel_id, self.ssrc)
    }
}

fn parse_subject(subject: Option<&str>) -> (Option<&str>, Option<&str>) {
    let Some(subject) = subject else {
        return (None, None);
    };

    let mut parts = subject.split(',').map(|part| {
        let id = part.split(':').next().unwrap_or_default().trim();
        (!id.is_empty()).then_some(id)
    });
    let sender = parts.next().flatten();
    let receiver = parts.next().flatten();
    (sender, receiver)
}
