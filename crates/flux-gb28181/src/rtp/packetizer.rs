// RTP 打包器
//
// 把一帧 PS 数据切成不超过 1350 字节的分片，每片一个 RTP 包，
// 并加上 2 字节大端长度前缀用于 TCP 传输。只有最后一片置 marker。

use super::packet::{RtpHeader, RTP_HEADER_LEN};
use bytes::{BufMut, Bytes, BytesMut};

/// 单个 RTP 包的最大负载
pub const MAX_RTP_PAYLOAD: usize = 1350;

#[derive(Debug, Clone)]
pub struct RtpPacketizer {
    ssrc: u32,
    sequence: u16,
    max_payload: usize,
}

impl RtpPacketizer {
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            sequence: 0,
            max_payload: MAX_RTP_PAYLOAD,
        }
    }

    pub fn with_initial_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.clamp(1, MAX_RTP_PAYLOAD);
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// 下一个包将使用的序号
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// 打包一帧，返回带长度前缀的 RTP 包
    pub fn packetize(&mut self, payload: &[u8], timestamp: u32, payload_type: u8) -> Vec<Bytes> {
        if payload.is_empty() {
            return Vec::new();
        }

        let count = payload.len().div_ceil(self.max_payload);
        let mut packets = Vec::with_capacity(count);

        for (i, chunk) in payload.chunks(self.max_payload).enumerate() {
            let mut header = RtpHeader::new(payload_type, self.sequence, timestamp, self.ssrc);
            header.marker = i + 1 == count;
            self.sequence = self.sequence.wrapping_add(1);

            let rtp_len = RTP_HEADER_LEN + chunk.len();
            let mut buf = BytesMut::with_capacity(2 + rtp_len);
            buf.put_u16(rtp_len as u16);
            header.write_to(&mut buf);
            buf.put_slice(chunk);
            packets.push(buf.freeze());
        }

        packets
    }
}
