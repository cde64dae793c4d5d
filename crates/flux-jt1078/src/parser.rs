// 按连接维护的拼包状态机
//
// 输入任意切分的 TCP 字节流，输出拼好的完整帧：
// Atomic 直接输出并清掉同类型的累积；First 开始新的累积；Middle 追加；Last 追加并输出。
// 单个累积超过上限时整体丢弃，之后的 Middle / Last 按孤包处理，直到下一个 First。

use crate::error::Result;
use crate::frame::{FrameType, SubpacketType, TransportFrame};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;

/// 单个拼包单元的默认上限
pub const MAX_UNIT_SIZE: usize = 4 * 1024 * 1024;

pub struct FrameParser {
    /// 尚未解码的字节
    buffer: BytesMut,

    /// 按数据类型累积中的分包数据体
    partial: HashMap<FrameType, BytesMut>,

    max_unit: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            partial: HashMap::new(),
            max_unit: MAX_UNIT_SIZE,
        }
    }

    pub fn with_max_unit(mut self, max_unit: usize) -> Self {
        self.max_unit = max_unit;
        self
    }

    /// 追加收到的字节
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// 拉取下一个完整帧
    ///
    /// 返回 `Ok(None)` 表示需要更多数据；返回 `Err` 表示流已不可恢复
    /// （魔数不符等），调用方应结束该连接。
    pub fn next_frame(&mut self) -> Result<Option<TransportFrame>> {
        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            let (frame, consumed) = match TransportFrame::decode(&self.buffer) {
                Ok(decoded) => decoded,
                Err(e) if e.is_incomplete() => return Ok(None),
                Err(e) => return Err(e),
            };
            self.buffer.advance(consumed);

            if let Some(complete) = self.reassemble(frame) {
                return Ok(Some(complete));
            }
        }
    }

    /// 追加字节并取出当前所有完整帧
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<TransportFrame>> {
        self.feed(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// 缓冲区中未解码的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 正在累积的分包数量
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.partial.clear();
    }

    fn reassemble(&mut self, mut frame: TransportFrame) -> Option<TransportFrame> {
        match frame.subpacket {
            SubpacketType::Atomic => {
                if let Some(stale) = self.partial.remove(&frame.frame_type) {
                    tracing::debug!(
                        target: "jt1078",
                        frame_type = ?frame.frame_type,
                        dropped = stale.len(),
                        "Unfinished subpackets dropped by atomic frame",
                    );
                }
                Some(frame)
            }
            SubpacketType::First => {
                if frame.body.len() > self.max_unit {
                    self.drop_oversized(&frame, frame.body.len());
                    return None;
                }
                let mut body = BytesMut::with_capacity(frame.body.len() * 4);
                body.extend_from_slice(&frame.body);
                if self.partial.insert(frame.frame_type, body).is_some() {
                    tracing::debug!(
                        target: "jt1078",
                        frame_type = ?frame.frame_type,
                        "Unfinished subpackets dropped by new first subpacket",
                    );
                }
                None
            }
            SubpacketType::Middle => {
                let Some(body) = self.partial.get_mut(&frame.frame_type) else {
                    tracing::debug!(
                        target: "jt1078",
                        frame_type = ?frame.frame_type,
                        sequence = frame.sequence,
                        "Orphan middle subpacket discarded",
                    );
                    return None;
                };
                let size = body.len() + frame.body.len();
                if size > self.max_unit {
                    self.drop_oversized(&frame, size);
                    return None;
                }
                body.extend_from_slice(&frame.body);
                None
            }
            SubpacketType::Last => {
                let Some(mut body) = self.partial.remove(&frame.frame_type) else {
                    tracing::debug!(
                        target: "jt1078",
                        frame_type = ?frame.frame_type,
                        sequence = frame.sequence,
                        "Orphan last subpacket discarded",
                    );
                    return None;
                };
                let size = body.len() + frame.body.len();
                if size > self.max_unit {
                    self.drop_oversized(&frame, size);
                    return None;
                }
                body.extend_from_slice(&frame.body);
                frame.body = body.freeze();
                frame.subpacket = SubpacketType::Atomic;
                Some(frame)
            }
        }
    }

    fn drop_oversized(&mut self, frame: &TransportFrame, size: usize) {
        self.partial.remove(&frame.frame_type);
        tracing::warn!(
            target: "jt1078",
            frame_type = ?frame.frame_type,
            sequence = frame.sequence,
            size,
            max = self.max_unit,
            "Oversized unit discarded",
        );
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use bytes::Bytes;

    fn encode_all(frames: &[TransportFrame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| f.encode().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_atomic_frame_passes_through() {
        let frame = TransportFrame::new(FrameType::Audio, 1, 1, Some(10), Bytes::from_static(b"abc"));
        let mut parser = FrameParser::new();
        let frames = parser.decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(frames, vec![frame]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_reassembly_across_reads() {
        let whole = TransportFrame::new(FrameType::I, 1, 0, Some(1000), Bytes::from(vec![0x55u8; 2500]));
        let bytes = encode_all(&whole.fragment(950));

        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        for chunk in bytes.chunks(333) {
            out.extend(parser.decode(chunk).unwrap());
        }

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body, whole.body);
        assert_eq!(out[0].subpacket, SubpacketType::Atomic);
        assert_eq!(parser.pending(), 0);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_interleaved_audio_and_video() {
        let video = TransportFrame::new(FrameType::P, 1, 0, Some(1), Bytes::from(vec![1u8; 30]));
        let audio = TransportFrame::new(FrameType::Audio, 1, 9, Some(1), Bytes::from_static(b"aa"));
        let parts = video.fragment(10);

        let mut stream = Vec::new();
        stream.push(parts[0].clone());
        stream.push(audio.clone());
        stream.extend(parts[1..].iter().cloned());

        let mut parser = FrameParser::new();
        let out = parser.decode(&encode_all(&stream)).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], audio);
        assert_eq!(out[1].body, video.body);
    }

    #[test]
    fn test_orphan_last_is_discarded() {
        let frame = TransportFrame::new(FrameType::P, 1, 0, Some(1), Bytes::from_static(b"tail"))
            .with_subpacket(SubpacketType::Last);
        let mut parser = FrameParser::new();
        assert!(parser.decode(&frame.encode().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_partial_data_is_kept() {
        let frame = TransportFrame::new(FrameType::I, 1, 0, Some(1), Bytes::from_static(b"0123456789"));
        let bytes = frame.encode().unwrap();

        let mut parser = FrameParser::new();
        assert!(parser.decode(&bytes[..12]).unwrap().is_empty());
        assert_eq!(parser.buffered(), 12);
        assert!(parser.decode(&bytes[12..bytes.len() - 3]).unwrap().is_empty());

        let out = parser.decode(&bytes[bytes.len() - 3..]).unwrap();
        assert_eq!(out, vec![frame]);
    }

    #[test]
    fn test_atomic_clears_unfinished_unit() {
        let first = TransportFrame::new(FrameType::I, 1, 0, Some(1), Bytes::from_static(b"stale-"))
            .with_subpacket(SubpacketType::First);
        let atomic = TransportFrame::new(FrameType::I, 1, 1, Some(2), Bytes::from_static(b"ATOMIC"));
        let last = TransportFrame::new(FrameType::I, 1, 2, Some(3), Bytes::from_static(b"tail"))
            .with_subpacket(SubpacketType::Last);

        let mut parser = FrameParser::new();
        let out = parser.decode(&encode_all(&[first, atomic.clone(), last])).unwrap();

        assert_eq!(out, vec![atomic]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_oversized_unit_is_discarded() {
        let part = |sub, seq| {
            TransportFrame::new(FrameType::P, 1, seq, Some(1), Bytes::from(vec![7u8; 40])).with_subpacket(sub)
        };

        let mut parser = FrameParser::new().with_max_unit(100);
        let out = parser
            .decode(&encode_all(&[
                part(SubpacketType::First, 0),
                part(SubpacketType::Middle, 1),
                part(SubpacketType::Middle, 2),
            ]))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(parser.pending(), 0);

        // 后续分包按孤包丢弃，直到下一个 First
        let out = parser
            .decode(&encode_all(&[part(SubpacketType::Middle, 3), part(SubpacketType::Last, 4)]))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(parser.pending(), 0);

        let out = parser
            .decode(&encode_all(&[part(SubpacketType::First, 5), part(SubpacketType::Last, 6)]))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body.len(), 80);
    }

    #[test]
    fn test_bad_magic_is_terminal() {
        let mut parser = FrameParser::new();
        let err = parser.decode(&[0u8; 32]).unwrap_err();
        assert_eq!(err, FrameError::UnqualifiedData(0));
    }
}
