// RTP 数据包
// RFC 3550 - RTP: A Transport Protocol for Real-Time Applications

use bytes::{BufMut, Bytes, BytesMut};

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;

/// RTP 头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// 版本（2 bits）
    pub version: u8,

    /// 填充标志（1 bit）
    pub padding: bool,

    /// 扩展标志（1 bit）
    pub extension: bool,

    /// CSRC 计数（4 bits）
    pub csrc_count: u8,

    /// 标记位（1 bit）
    pub marker: bool,

    /// 负载类型（7 bits）
    pub payload_type: u8,

    pub sequence: u16,

    pub timestamp: u32,

    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// 从字节数组解析 RTP 头部
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LEN {
            return None;
        }

        let byte0 = data[0];
        let byte1 = data[1];

        Some(Self {
            version: (byte0 >> 6) & 0x03,
            padding: (byte0 & 0x20) != 0,
            extension: (byte0 & 0x10) != 0,
            csrc_count: byte0 & 0x0F,
            marker: (byte1 & 0x80) != 0,
            payload_type: byte1 & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// 写入固定 12 字节头（不含 CSRC 列表）
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(
            ((self.version & 0x03) << 6)
                | ((self.padding as u8) << 5)
                | ((self.extension as u8) << 4)
                | (self.csrc_count & 0x0F),
        );
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// 获取头部长度（字节）
    pub fn header_len(&self) -> usize {
        RTP_HEADER_LEN + (self.csrc_count as usize * 4)
    }
}

/// RTP 数据包
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,

    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// 从字节数组解析 RTP 数据包
    pub fn from_bytes(data: Bytes) -> Option<Self> {
        let header = RtpHeader::from_bytes(&data)?;
        let header_len = header.header_len();

        if data.len() < header_len {
            return None;
        }

        let payload = data.slice(header_len..);

        Some(Self { header, payload })
    }

    /// 编码为 RTP 报文
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        self.header.write_to(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }

    /// 是否为标记包（帧的最后一个分片）
    pub fn is_marker(&self) -> bool {
        self.header.marker
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_header_parsing() {
        let data = vec![
            0x80, // V=2, P=0, X=0, CC=0
            0x60, // M=0, PT=96
            0x00, 0x01, // Sequence = 1
            0x00, 0x00, 0x00, 0x64, // Timestamp = 100
            0x12, 0x34, 0x56, 0x78, // SSRC
        ];

        let header = RtpHeader::from_bytes(&data).unwrap();

        assert_eq!(header.version, 2);
        assert!(!header.padding);
        assert!(!header.extension);
        assert_eq!(header.csrc_count, 0);
        assert!(!header.marker);
        assert_eq!(header.payload_type, 96);
        assert_eq!(header.sequence, 1);
        assert_eq!(header.timestamp, 100);
        assert_eq!(header.ssrc, 0x12345678);
    }

    #[test]
    fn test_rtp_header_writing() {
        let mut header = RtpHeader::new(96, 1, 100, 0x12345678);
        header.marker = true;

        let mut buf = BytesMut::new();
        header.write_to(&mut buf);

        assert_eq!(
            &buf[..],
            &[0x80, 0xE0, 0x00, 0x01, 0x00, 0x00, 0x00, 0x64, 0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(RtpHeader::from_bytes(&buf), Some(header));
    }

    #[test]
    fn test_rtp_packet_roundtrip() {
        let packet = RtpPacket::new(RtpHeader::new(8, 65535, 7, 1), Bytes::from_static(b"Hello RTP"));
        let parsed = RtpPacket::from_bytes(packet.to_bytes()).unwrap();

        assert_eq!(parsed.sequence(), 65535);
        assert_eq!(parsed.timestamp(), 7);
        assert_eq!(parsed.payload_type(), 8);
        assert!(!parsed.is_marker());
        assert_eq!(&parsed.payload()[..], b"Hello RTP");
    }

    #[test]
    fn test_short_packet() {
        assert!(RtpPacket::from_bytes(Bytes::from_static(&[0x80, 0x60, 0x00])).is_none());
    }
}
