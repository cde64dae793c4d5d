// JT/T 1078 码流帧
//
// 帧头布局（大端）：
//   0..4   魔数 0x30316364
//   4      V(2) P(1) X(1) CC(4)
//   5      M(1) PT(7)
//   6..8   包序号
//   8..14  SIM 卡号（BCD）
//   14     逻辑通道号
//   15     数据类型(4) 分包处理标记(4)
//   [8]    时间戳（透传数据没有）
//   [2+2]  Last I Frame Interval / Last Frame Interval（仅视频帧）
//   2      数据体长度
//   N      数据体

use crate::bcd::{self, SIM_BCD_LEN};
use crate::error::{FrameError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// 帧头魔数
pub const MAGIC: u32 = 0x3031_6364;

/// 固定帧头长度（到数据类型字节为止）
pub const FIXED_HEADER_LEN: usize = 16;

/// 数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    I = 0,
    P = 1,
    B = 2,
    Audio = 3,
    Passthrough = 4,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::I),
            1 => Ok(Self::P),
            2 => Ok(Self::B),
            3 => Ok(Self::Audio),
            4 => Ok(Self::Passthrough),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::I | Self::P | Self::B)
    }

    pub fn is_key_frame(self) -> bool {
        self == Self::I
    }

    /// 透传数据不带时间戳
    pub fn has_timestamp(self) -> bool {
        self != Self::Passthrough
    }
}

/// 分包处理标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpacketType {
    Atomic = 0,
    First = 1,
    Last = 2,
    Middle = 3,
}

impl SubpacketType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Atomic),
            1 => Ok(Self::First),
            2 => Ok(Self::Last),
            3 => Ok(Self::Middle),
            other => Err(FrameError::UnknownSubpacketType(other)),
        }
    }
}

/// 负载编码（JT/T 1078 表 12 中本系统支持的部分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    G711A,
    G711U,
    Aac,
}

impl Codec {
    pub fn from_payload_type(pt: u8) -> Option<Self> {
        match pt {
            98 => Some(Self::H264),
            99 => Some(Self::H265),
            6 => Some(Self::G711A),
            7 => Some(Self::G711U),
            19 => Some(Self::Aac),
            _ => None,
        }
    }

    pub fn payload_type(self) -> u8 {
        match self {
            Self::H264 => 98,
            Self::H265 => 99,
            Self::G711A => 6,
            Self::G711U => 7,
            Self::Aac => 19,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }
}

/// 帧头前两个标志字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags {
    /// 2 bits，固定为 2
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    /// 4 bits
    pub csrc_count: u8,
    pub marker: bool,
    /// 7 bits
    pub payload_type: u8,
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 1,
            marker: false,
            payload_type: Codec::H264.payload_type(),
        }
    }
}

impl FrameFlags {
    pub fn from_bytes(b0: u8, b1: u8) -> Self {
        Self {
            version: (b0 >> 6) & 0x03,
            padding: (b0 & 0x20) != 0,
            extension: (b0 & 0x10) != 0,
            csrc_count: b0 & 0x0F,
            marker: (b1 & 0x80) != 0,
            payload_type: b1 & 0x7F,
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        let b0 = ((self.version & 0x03) << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0F);
        let b1 = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        [b0, b1]
    }

    pub fn codec(&self) -> Option<Codec> {
        Codec::from_payload_type(self.payload_type)
    }
}

/// 视频帧附带的帧间隔（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameIntervals {
    pub last_key_frame: u16,
    pub last_frame: u16,
}

/// 一个 JT/T 1078 码流帧（可能是分包）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFrame {
    pub flags: FrameFlags,
    pub sequence: u16,
    /// 12 位 SIM 卡号
    pub sim: String,
    pub logical_channel: u8,
    pub frame_type: FrameType,
    pub subpacket: SubpacketType,
    /// 毫秒时间戳；透传数据为 None
    pub timestamp: Option<u64>,
    /// 仅视频帧携带
    pub intervals: Option<FrameIntervals>,
    pub body: Bytes,
}

impl TransportFrame {
    pub fn new(
        frame_type: FrameType,
        logical_channel: u8,
        sequence: u16,
        timestamp: Option<u64>,
        body: Bytes,
    ) -> Self {
        Self {
            flags: FrameFlags::default(),
            sequence,
            sim: "0".repeat(SIM_BCD_LEN * 2),
            logical_channel,
            frame_type,
            subpacket: SubpacketType::Atomic,
            timestamp: if frame_type.has_timestamp() {
                Some(timestamp.unwrap_or(0))
            } else {
                None
            },
            intervals: frame_type.is_video().then(FrameIntervals::default),
            body,
        }
    }

    pub fn with_sim(mut self, sim: impl Into<String>) -> Self {
        self.sim = sim.into();
        self
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.flags.payload_type = payload_type & 0x7F;
        self
    }

    pub fn with_subpacket(mut self, subpacket: SubpacketType) -> Self {
        self.subpacket = subpacket;
        self
    }

    pub fn with_intervals(mut self, intervals: FrameIntervals) -> Self {
        if self.frame_type.is_video() {
            self.intervals = Some(intervals);
        }
        self
    }

    pub fn codec(&self) -> Option<Codec> {
        self.flags.codec()
    }

    /// 当前帧头占用的字节数
    pub fn header_len(&self) -> usize {
        header_len_for(self.frame_type)
    }

    /// 从缓冲区头部解码一帧，返回帧和消耗的字节数
    ///
    /// 数据不足时返回 `HeaderTooShort` / `BodyTooShort`，缓冲区保持不变，
    /// 调用方追加数据后重试即可。
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(FrameError::HeaderTooShort {
                needed: FIXED_HEADER_LEN,
                available: buf.len(),
            });
        }

        let mut cur = buf;
        let magic = cur.get_u32();
        if magic != MAGIC {
            return Err(FrameError::UnqualifiedData(magic));
        }

        let b0 = cur.get_u8();
        let b1 = cur.get_u8();
        let flags = FrameFlags::from_bytes(b0, b1);
        let sequence = cur.get_u16();

        let sim = bcd::decode(&cur[..SIM_BCD_LEN])?;
        cur.advance(SIM_BCD_LEN);

        let logical_channel = cur.get_u8();
        let type_byte = cur.get_u8();
        let frame_type = FrameType::from_u8(type_byte >> 4)?;
        let subpacket = SubpacketType::from_u8(type_byte & 0x0F)?;

        let header_len = header_len_for(frame_type);
        if buf.len() < header_len {
            return Err(FrameError::HeaderTooShort {
                needed: header_len,
                available: buf.len(),
            });
        }

        let timestamp = frame_type.has_timestamp().then(|| cur.get_u64());
        let intervals = frame_type.is_video().then(|| FrameIntervals {
            last_key_frame: cur.get_u16(),
            last_frame: cur.get_u16(),
        });

        let body_len = cur.get_u16() as usize;
        let total = header_len + body_len;
        if buf.len() < total {
            return Err(FrameError::BodyTooShort {
                needed: total,
                available: buf.len(),
            });
        }

        let frame = Self {
            flags,
            sequence,
            sim,
            logical_channel,
            frame_type,
            subpacket,
            timestamp,
            intervals,
            body: Bytes::copy_from_slice(&buf[header_len..total]),
        };

        Ok((frame, total))
    }

    /// 编码为线路格式
    pub fn encode(&self) -> Result<Bytes> {
        if self.body.len() > u16::MAX as usize {
            return Err(FrameError::BodyTooLarge(self.body.len()));
        }

        let sim = bcd::encode(&self.sim, SIM_BCD_LEN)?;
        let mut out = BytesMut::with_capacity(self.header_len() + self.body.len());

        out.put_u32(MAGIC);
        out.put_slice(&self.flags.to_bytes());
        out.put_u16(self.sequence);
        out.put_slice(&sim);
        out.put_u8(self.logical_channel);
        out.put_u8(((self.frame_type as u8) << 4) | (self.subpacket as u8));

        if self.frame_type.has_timestamp() {
            out.put_u64(self.timestamp.unwrap_or(0));
        }
        if self.frame_type.is_video() {
            let intervals = self.intervals.unwrap_or_default();
            out.put_u16(intervals.last_key_frame);
            out.put_u16(intervals.last_frame);
        }

        out.put_u16(self.body.len() as u16);
        out.put_slice(&self.body);

        Ok(out.freeze())
    }

    /// 按最大数据体长度拆分为 First/Middle*/Last 分包；不超长时原样返回
    pub fn fragment(&self, max_body: usize) -> Vec<TransportFrame> {
        let max_body = max_body.max(1);
        if self.body.len() <= max_body {
            return vec![self.clone().with_subpacket(SubpacketType::Atomic)];
        }

        let count = self.body.len().div_ceil(max_body);
        (0..count)
            .map(|i| {
                let start = i * max_body;
                let end = (start + max_body).min(self.body.len());
                let subpacket = match i {
                    0 => SubpacketType::First,
                    n if n == count - 1 => SubpacketType::Last,
                    _ => SubpacketType::Middle,
                };
                let mut part = self.clone().with_subpacket(subpacket);
                part.sequence = self.sequence.wrapping_add(i as u16);
                part.body = self.body.slice(start..end);
                part
            })
            .collect()
    }
}

fn header_len_for(frame_type: FrameType) -> usize {
    let mut len = FIXED_HEADER_LEN + 2;
    if frame_type.has_timestamp() {
        len += 8;
    }
    if frame_type.is_video() {
        len += 4;
    }
    len
}
