// GB28181 点播 SDP
// INVITE 中的会话描述解析，以及 200 OK 携带的应答生成

use crate::error::{GbError, Result};

/// SDP 会话描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpSession {
    pub version: u8,

    /// o= 的用户名（国标中为发起方 ID）
    pub session_id: String,

    /// Play / Playback / Download
    pub session_name: String,

    pub connection: SdpConnection,

    /// t= 起止时间（实时点播为 0 0）
    pub start_time: u64,
    pub stop_time: u64,

    /// u= 回放通道 URI
    pub uri: Option<String>,

    /// SSRC（GB28181 使用 y= 行携带 SSRC）
    pub ssrc: Option<u32>,

    /// f= 媒体参数
    pub media_format: Option<String>,

    /// 会话级 a= 属性
    pub attributes: Vec<String>,

    pub media: Vec<SdpMedia>,
}

/// SDP 连接信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpConnection {
    /// 网络类型（IN）
    pub network_type: String,

    /// 地址类型（IP4/IP6）
    pub address_type: String,

    pub address: String,
}

/// SDP 媒体描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMedia {
    /// 媒体类型（video/audio）
    pub media_type: String,

    pub port: u16,

    /// 传输协议（RTP/AVP、TCP/RTP/AVP）
    pub protocol: String,

    /// 格式列表
    pub formats: Vec<u8>,

    pub rtpmap: Vec<RtpMap>,

    /// 其余 a= 属性（不含 rtpmap）
    pub attributes: Vec<String>,
}

/// RTP 映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,

    /// 编码名称（PS/H264/MPEG4）
    pub encoding_name: String,

    pub clock_rate: u32,
}

impl SdpMedia {
    /// 取属性值，如 `setup:active` 中的 `active`
    pub fn attribute(&self, name: &str) -> Option<&str> {
        find_attribute(&self.attributes, name)
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol.to_ascii_uppercase().starts_with("TCP")
    }
}

fn find_attribute<'a>(attributes: &'a [String], name: &str) -> Option<&'a str> {
    attributes.iter().find_map(|attr| {
        let (key, value) = attr.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}

impl SdpSession {
    pub fn new(session_id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            version: 0,
            session_id: session_id.into(),
            session_name: "Play".to_string(),
            connection: SdpConnection {
                network_type: "IN".to_string(),
                address_type: "IP4".to_string(),
                address: ip.into(),
            },
            start_time: 0,
            stop_time: 0,
            uri: None,
            ssrc: None,
            media_format: None,
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// 第一个视频媒体描述（没有时取第一个媒体）
    pub fn video(&self) -> Option<&SdpMedia> {
        self.media
            .iter()
            .find(|m| m.media_type.eq_ignore_ascii_case("video"))
            .or_else(|| self.media.first())
    }

    /// 媒体级优先，其次会话级属性
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.video()
            .and_then(|m| m.attribute(name))
            .or_else(|| find_attribute(&self.attributes, name))
    }

    /// a=downloadspeed:N
    pub fn download_speed(&self) -> Option<u32> {
        self.attribute("downloadspeed").and_then(|v| v.parse().ok())
    }

    /// a=setup:active|passive
    pub fn setup(&self) -> Option<&str> {
        self.attribute("setup")
    }

    /// 构造设备侧应答：发送 PS 流，TCP 主动连接
    pub fn answer(offer: &SdpSession, device_id: &str, device_ip: &str, port: u16, ssrc: u32) -> Self {
        let mut answer = SdpSession::new(device_id, device_ip);
        answer.session_name = offer.session_name.clone();
        answer.start_time = offer.start_time;
        answer.stop_time = offer.stop_time;
        answer.ssrc = Some(ssrc);
        answer.media_format = Some("v/////a///".to_string());

        let (protocol, tcp) = match offer.video() {
            Some(m) if m.is_tcp() => ("TCP/RTP/AVP".to_string(), true),
            _ => ("RTP/AVP".to_string(), false),
        };

        let ps_pt = offer
            .video()
            .and_then(|m| m.rtpmap.iter().find(|r| r.encoding_name.eq_ignore_ascii_case("PS")))
            .map(|r| r.payload_type)
            .unwrap_or(96);

        let mut attributes = vec!["sendonly".to_string()];
        if tcp {
            attributes.push("setup:active".to_string());
            attributes.push("connection:new".to_string());
        }

        answer.media.push(SdpMedia {
            media_type: "video".to_string(),
            port,
            protocol,
            formats: vec![ps_pt],
            rtpmap: vec![RtpMap {
                payload_type: ps_pt,
                encoding_name: "PS".to_string(),
                clock_rate: 90000,
            }],
            attributes,
        });

        answer
    }

    /// 生成 SDP 字符串
    pub fn to_sdp_string(&self) -> String {
        let mut sdp = String::new();

        sdp.push_str(&format!("v={}\r\n", self.version));
        sdp.push_str(&format!(
            "o={} 0 0 {} {} {}\r\n",
            self.session_id,
            self.connection.network_type,
            self.connection.address_type,
            self.connection.address
        ));
        sdp.push_str(&format!("s={}\r\n", self.session_name));
        if let Some(uri) = &self.uri {
            sdp.push_str(&format!("u={}\r\n", uri));
        }
        sdp.push_str(&format!(
            "c={} {} {}\r\n",
            self.connection.network_type,
            self.connection.address_type,
            self.connection.address
        ));
        sdp.push_str(&format!("t={} {}\r\n", self.start_time, self.stop_time));

        for attr in &self.attributes {
            sdp.push_str(&format!("a={}\r\n", attr));
        }

        for media in &self.media {
            let formats: Vec<String> = media.formats.iter().map(|f| f.to_string()).collect();
            sdp.push_str(&format!(
                "m={} {} {} {}\r\n",
                media.media_type,
                media.port,
                media.protocol,
                formats.join(" ")
            ));

            for attr in &media.attributes {
                sdp.push_str(&format!("a={}\r\n", attr));
            }
            for rtpmap in &media.rtpmap {
                sdp.push_str(&format!(
                    "a=rtpmap:{} {}/{}\r\n",
                    rtpmap.payload_type, rtpmap.encoding_name, rtpmap.clock_rate
                ));
            }
        }

        // y= / f= 是国标扩展行，放在最后
        if let Some(ssrc) = self.ssrc {
            sdp.push_str(&format!("y={:010}\r\n", ssrc));
        }
        if let Some(f) = &self.media_format {
            sdp.push_str(&format!("f={}\r\n", f));
        }

        sdp
    }

    /// 从字符串解析 SDP
    pub fn parse(sdp: &str) -> Result<Self> {
        let mut session = SdpSession::new(String::new(), String::new());
        session.session_name.clear();

        let mut current_media: Option<SdpMedia> = None;
        let mut seen_version = false;

        for line in sdp.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            match key {
                "v" => {
                    session.version = value
                        .trim()
                        .parse()
                        .map_err(|_| GbError::Sdp(format!("invalid version line: {}", line)))?;
                    seen_version = true;
                }
                "o" => {
                    if let Some(id) = value.split_whitespace().next() {
                        session.session_id = id.to_string();
                    }
                }
                "s" => session.session_name = value.trim().to_string(),
                "u" => session.uri = Some(value.trim().to_string()),
                "c" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 3 {
                        return Err(GbError::Sdp(format!("invalid connection line: {}", line)));
                    }
                    session.connection.network_type = parts[0].to_string();
                    session.connection.address_type = parts[1].to_string();
                    session.connection.address = parts[2].to_string();
                }
                "t" => {
                    let mut parts = value.split_whitespace();
                    session.start_time = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    session.stop_time = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                "y" => {
                    let v = value.trim();
                    session.ssrc = Some(
                        v.parse::<u32>()
                            .map_err(|_| GbError::Sdp(format!("invalid ssrc: {}", v)))?,
                    );
                }
                "f" => session.media_format = Some(value.trim().to_string()),
                "m" => {
                    if let Some(media) = current_media.take() {
                        session.media.push(media);
                    }

                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 3 {
                        return Err(GbError::Sdp(format!("invalid media line: {}", line)));
                    }
                    let port = parts[1]
                        .split('/')
                        .next()
                        .and_then(|p| p.parse::<u16>().ok())
                        .ok_or_else(|| GbError::Sdp(format!("invalid media port: {}", parts[1])))?;

                    current_media = Some(SdpMedia {
                        media_type: parts[0].to_string(),
                        port,
                        protocol: parts[2].to_string(),
                        formats: parts[3..].iter().filter_map(|s| s.parse().ok()).collect(),
                        rtpmap: Vec::new(),
                        attributes: Vec::new(),
                    });
                }
                "a" => match current_media.as_mut() {
                    Some(media) => {
                        if let Some(map) = value.strip_prefix("rtpmap:").and_then(parse_rtpmap) {
                            media.rtpmap.push(map);
                        } else {
                            media.attributes.push(value.trim().to_string());
                        }
                    }
                    None => session.attributes.push(value.trim().to_string()),
                },
                _ => {}
            }
        }

        if let Some(media) = current_media {
            session.media.push(media);
        }

        if !seen_version {
            return Err(GbError::Sdp("missing v= line".to_string()));
        }

        Ok(session)
    }
}

fn parse_rtpmap(value: &str) -> Option<RtpMap> {
    let (pt, rest) = value.trim().split_once(' ')?;
    let mut codec = rest.trim().split('/');
    let encoding_name = codec.next()?.to_string();
    let clock_rate = codec.next().and_then(|c| c.parse().ok()).unwrap_or(90000);

    Some(RtpMap {
        payload_type: pt.parse().ok()?,
        encoding_name,
        clock_rate,
    })
}
