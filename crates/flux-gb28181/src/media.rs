// 媒体类型映射
//
// JT/T 1078 负载类型 -> PS 流类型 / 流 ID -> RTP 负载类型

use crate::sip::sdp::RtpMap;
use flux_jt1078::Codec;
use std::collections::HashMap;
use std::fmt;

/// PS 视频流 ID
pub const VIDEO_STREAM_ID: u8 = 0xE0;

/// PS 音频流 ID
pub const AUDIO_STREAM_ID: u8 = 0xC0;

/// 未知编码时使用的动态负载类型
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// 可封装进 PS 的基本流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    H264,
    H265,
    G711A,
    G711U,
    Aac,
}

impl StreamType {
    pub fn from_codec(codec: Codec) -> Self {
        match codec {
            Codec::H264 => Self::H264,
            Codec::H265 => Self::H265,
            Codec::G711A => Self::G711A,
            Codec::G711U => Self::G711U,
            Codec::Aac => Self::Aac,
        }
    }

    /// 配置文件中的名称（不区分大小写）
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" => Some(Self::H264),
            "h265" | "hevc" => Some(Self::H265),
            "g711a" | "pcma" => Some(Self::G711A),
            "g711u" | "pcmu" => Some(Self::G711U),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    /// PSM 中的 stream_type
    pub fn ps_stream_type(self) -> u8 {
        match self {
            Self::H264 => 0x1B,
            Self::H265 => 0x24,
            Self::G711A => 0x90,
            Self::G711U => 0x91,
            Self::Aac => 0x0F,
        }
    }

    pub fn stream_id(self) -> u8 {
        if self.is_video() {
            VIDEO_STREAM_ID
        } else {
            AUDIO_STREAM_ID
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    /// 国标推荐的 RTP 负载类型
    pub fn default_payload_type(self) -> u8 {
        match self {
            Self::H264 => 98,
            Self::H265 => 100,
            Self::G711A => 8,
            Self::G711U => 0,
            Self::Aac => DEFAULT_PAYLOAD_TYPE,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::H264 => "H264",
            Self::H265 => "H265",
            Self::G711A => "G711A",
            Self::G711U => "G711U",
            Self::Aac => "AAC",
        };
        f.write_str(name)
    }
}

/// 会话级 RTP 负载类型映射
///
/// 平台在 SDP 中通过 `a=rtpmap:<pt> PS/90000` 指定 PS 负载类型时优先使用；
/// 其次是按编码单独覆盖的值；最后回落到国标推荐值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadTypeMap {
    ps: Option<u8>,
    overrides: HashMap<StreamType, u8>,
}

impl PayloadTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 SDP rtpmap 列表中提取 PS 负载类型
    pub fn from_rtpmaps(maps: &[RtpMap]) -> Self {
        let ps = maps
            .iter()
            .find(|m| m.encoding_name.eq_ignore_ascii_case("PS"))
            .map(|m| m.payload_type);
        Self {
            ps,
            overrides: HashMap::new(),
        }
    }

    pub fn with_ps(mut self, payload_type: u8) -> Self {
        self.ps = Some(payload_type & 0x7F);
        self
    }

    pub fn set(&mut self, stream: StreamType, payload_type: u8) {
        self.overrides.insert(stream, payload_type & 0x7F);
    }

    pub fn ps(&self) -> Option<u8> {
        self.ps
    }

    pub fn resolve(&self, stream: Option<StreamType>) -> u8 {
        if let Some(pt) = self.ps {
            return pt;
        }
        match stream {
            Some(s) => self
                .overrides
                .get(&s)
                .copied()
                .unwrap_or_else(|| s.default_payload_type()),
            None => DEFAULT_PAYLOAD_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_mapping() {
        let video = StreamType::from_codec(Codec::H265);
        assert_eq!(video.ps_stream_type(), 0x24);
        assert_eq!(video.stream_id(), VIDEO_STREAM_ID);

        let audio = StreamType::from_codec(Codec::G711U);
        assert_eq!(audio.ps_stream_type(), 0x91);
        assert_eq!(audio.stream_id(), AUDIO_STREAM_ID);
    }

    #[test]
    fn test_fallback_payload_types() {
        let map = PayloadTypeMap::new();
        assert_eq!(map.resolve(Some(StreamType::H264)), 98);
        assert_eq!(map.resolve(Some(StreamType::H265)), 100);
        assert_eq!(map.resolve(Some(StreamType::G711A)), 8);
        assert_eq!(map.resolve(Some(StreamType::G711U)), 0);
        assert_eq!(map.resolve(None), 96);
    }

    #[test]
    fn test_sdp_ps_entry_wins() {
        let maps = vec![
            RtpMap {
                payload_type: 98,
                encoding_name: "H264".to_string(),
                clock_rate: 90000,
            },
            RtpMap {
                payload_type: 96,
                encoding_name: "PS".to_string(),
                clock_rate: 90000,
            },
        ];
        let mut map = PayloadTypeMap::from_rtpmaps(&maps);
        map.set(StreamType::H264, 120);
        assert_eq!(map.resolve(Some(StreamType::H264)), 96);
        assert_eq!(map.resolve(Some(StreamType::G711A)), 96);
    }

    #[test]
    fn test_names() {
        assert_eq!(StreamType::from_name("HEVC"), Some(StreamType::H265));
        assert_eq!(StreamType::from_name("pcma"), Some(StreamType::G711A));
        assert_eq!(StreamType::from_name("mp3"), None);
    }
}
