// PS 包基础定义
// MPEG-PS (Program Stream) 起始码、流 ID 与 33 位时间戳的位打包

use bytes::{BufMut, BytesMut};

/// PS 包起始码
pub const PS_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

pub const PACK_HEADER_ID: u8 = 0xBA;
pub const SYSTEM_HEADER_ID: u8 = 0xBB;
pub const STREAM_MAP_ID: u8 = 0xBC;

/// 33 位时钟掩码
pub const CLOCK_MASK: u64 = 0x1_FFFF_FFFF;

/// PS 包类型，仅用于测试中回读复用流
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsPacketType {
    /// Pack Header (0xBA)
    PackHeader,

    /// System Header (0xBB)
    SystemHeader,

    /// Program Stream Map (0xBC)
    ProgramStreamMap,

    /// Video Stream (0xE0-0xEF)
    Video,

    /// Audio Stream (0xC0-0xDF)
    Audio,

    Unknown,
}

#[cfg(test)]
impl PsPacketType {
    pub fn from_stream_id(stream_id: u8) -> Self {
        match stream_id {
            PACK_HEADER_ID => Self::PackHeader,
            SYSTEM_HEADER_ID => Self::SystemHeader,
            STREAM_MAP_ID => Self::ProgramStreamMap,
            0xE0..=0xEF => Self::Video,
            0xC0..=0xDF => Self::Audio,
            _ => Self::Unknown,
        }
    }
}

/// 查找 PS 起始码
#[cfg(test)]
pub fn find_start_code(data: &[u8], start: usize) -> Option<usize> {
    if start + 3 > data.len() {
        return None;
    }

    (start..=data.len() - 3).find(|&i| data[i..i + 3] == PS_START_CODE)
}

/// 写入 PES 头中的 PTS（'0010' 前缀，5 字节）
pub fn put_pts(buf: &mut BytesMut, pts: u64) {
    let pts = pts & CLOCK_MASK;
    buf.put_u8(0x20 | (((pts >> 29) & 0x0E) as u8) | 0x01);
    buf.put_u8(((pts >> 22) & 0xFF) as u8);
    buf.put_u8((((pts >> 14) & 0xFE) as u8) | 0x01);
    buf.put_u8(((pts >> 7) & 0xFF) as u8);
    buf.put_u8((((pts << 1) & 0xFE) as u8) | 0x01);
}

/// 解析 PTS/DTS
#[cfg(test)]
pub fn parse_timestamp(data: &[u8], offset: usize) -> Option<u64> {
    if offset + 5 > data.len() {
        return None;
    }

    let b0 = data[offset] as u64;
    let b1 = data[offset + 1] as u64;
    let b2 = data[offset + 2] as u64;
    let b3 = data[offset + 3] as u64;
    let b4 = data[offset + 4] as u64;

    let pts = ((b0 & 0x0E) << 29)
        | ((b1 & 0xFF) << 22)
        | ((b2 & 0xFE) << 14)
        | ((b3 & 0xFF) << 7)
        | ((b4 & 0xFE) >> 1);

    Some(pts)
}

/// 写入 pack header 中的 SCR（6 字节，扩展部分固定为 0）
pub fn put_scr(buf: &mut BytesMut, scr: u64) {
    let scr = scr & CLOCK_MASK;
    buf.put_u8(0x40 | ((((scr >> 30) & 0x07) as u8) << 3) | 0x04 | (((scr >> 28) & 0x03) as u8));
    buf.put_u8(((scr >> 20) & 0xFF) as u8);
    buf.put_u8(((((scr >> 15) & 0x1F) as u8) << 3) | 0x04 | (((scr >> 13) & 0x03) as u8));
    buf.put_u8(((scr >> 5) & 0xFF) as u8);
    buf.put_u8((((scr & 0x1F) as u8) << 3) | 0x04);
    buf.put_u8(0x01);
}

/// 解析 SCR 基值
#[cfg(test)]
pub fn parse_scr(data: &[u8], offset: usize) -> Option<u64> {
    if offset + 6 > data.len() {
        return None;
    }

    let b = &data[offset..offset + 6];
    let scr = (((b[0] as u64 >> 3) & 0x07) << 30)
        | ((b[0] as u64 & 0x03) << 28)
        | ((b[1] as u64) << 20)
        | (((b[2] as u64 >> 3) & 0x1F) << 15)
        | ((b[2] as u64 & 0x03) << 13)
        | ((b[3] as u64) << 5)
        | ((b[4] as u64 >> 3) & 0x1F);

    Some(scr)
}
