// JT/T 1078 帧 -> PS -> RTP over TCP

use crate::media::{PayloadTypeMap, StreamType};
use crate::ps::packet::CLOCK_MASK;
use crate::ps::PsMuxer;
use crate::rtp::RtpPacketizer;
use crate::session::SessionDescriptor;
use bytes::Bytes;
use flux_jt1078::TransportFrame;

/// 帧时间戳与本地时钟相差超过该值时改用本地时钟
pub const MAX_CLOCK_DRIFT_MS: u64 = 10_000;

/// 90kHz 时钟
const CLOCK_TICKS_PER_MS: u64 = 90;

pub struct FramePackager {
    muxer: PsMuxer,
    packetizer: RtpPacketizer,
    payload_types: PayloadTypeMap,
}

impl FramePackager {
    pub fn new(descriptor: &SessionDescriptor) -> Self {
        Self {
            muxer: PsMuxer::with_streams(&descriptor.stream_types),
            packetizer: RtpPacketizer::new(descriptor.ssrc),
            payload_types: descriptor.payload_types.clone(),
        }
    }

    pub fn with_packetizer(mut self, packetizer: RtpPacketizer) -> Self {
        self.packetizer = packetizer;
        self
    }

    /// 封装一个完整帧，返回带长度前缀的 RTP 包
    pub fn package(&mut self, frame: &TransportFrame) -> Vec<Bytes> {
        self.package_at(frame, chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn package_at(&mut self, frame: &TransportFrame, now_ms: u64) -> Vec<Bytes> {
        if !frame.frame_type.has_timestamp() {
            tracing::debug!(target: "gb28181::stream", len = frame.body.len(), "Passthrough data skipped");
            return Vec::new();
        }

        let Some(codec) = frame.codec() else {
            tracing::debug!(
                target: "gb28181::stream",
                payload_type = frame.flags.payload_type,
                "Unsupported payload type skipped",
            );
            return Vec::new();
        };

        let stream = StreamType::from_codec(codec);
        let pts = presentation_timestamp(frame.timestamp, now_ms);
        let ps = self.muxer.mux(stream, frame.frame_type.is_key_frame(), pts, &frame.body);

        let payload_type = self.payload_types.resolve(Some(stream));
        self.packetizer.packetize(&ps, pts as u32, payload_type)
    }

    pub fn streams(&self) -> &[StreamType] {
        self.muxer.streams()
    }
}

/// 毫秒时间戳 -> 33 位 90kHz PTS；缺失或漂移过大时用本地时钟
pub fn presentation_timestamp(timestamp: Option<u64>, now_ms: u64) -> u64 {
    let ms = match timestamp {
        Some(ts) if ts.abs_diff(now_ms) <= MAX_CLOCK_DRIFT_MS => ts,
        _ => now_ms,
    };
    ms.wrapping_mul(CLOCK_TICKS_PER_MS) & CLOCK_MASK
}
