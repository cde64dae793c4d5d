// PS 封装器
//
// 每帧输出：pack header [+ system header + PSM（仅关键帧）] + PES...
// PSM 连同 CRC 缓存，只有流表变化时才重算。

use super::packet::{put_pts, put_scr, PACK_HEADER_ID, PS_START_CODE, STREAM_MAP_ID, SYSTEM_HEADER_ID};
use crate::media::StreamType;
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_MPEG_2};

const PSM_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// program_mux_rate（单位 50 字节/秒）
pub const MUX_RATE: u32 = 6106;

pub const PACK_HEADER_LEN: usize = 14;
pub const SYSTEM_HEADER_LEN: usize = 18;

/// PES 头中 PES_packet_length 之后的固定部分（3 字节标志 + 5 字节 PTS）
const PES_HEADER_TAIL: usize = 8;

/// 单个 PES 包可承载的最大负载
pub const PES_MAX_PAYLOAD: usize = u16::MAX as usize - PES_HEADER_TAIL;

#[derive(Debug, Clone)]
pub struct PsMuxer {
    /// 视频在前、音频在后，每类最多一项
    streams: Vec<StreamType>,
    stream_map: Option<Bytes>,
}

impl PsMuxer {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            stream_map: None,
        }
    }

    pub fn with_streams(streams: &[StreamType]) -> Self {
        let mut muxer = Self::new();
        for stream in streams {
            muxer.register(*stream);
        }
        muxer
    }

    pub fn streams(&self) -> &[StreamType] {
        &self.streams
    }

    /// 登记一路流；同类（音/视频）的旧项被替换。返回流表是否发生变化
    pub fn register(&mut self, stream: StreamType) -> bool {
        if self.streams.contains(&stream) {
            return false;
        }

        match self.streams.iter().position(|s| s.is_video() == stream.is_video()) {
            Some(idx) => self.streams[idx] = stream,
            None if stream.is_video() => self.streams.insert(0, stream),
            None => self.streams.push(stream),
        }
        self.stream_map = None;
        true
    }

    /// 封装一个完整的基本流单元
    pub fn mux(&mut self, stream: StreamType, key_frame: bool, pts: u64, payload: &[u8]) -> Bytes {
        self.register(stream);

        let pes_count = payload.len().div_ceil(PES_MAX_PAYLOAD).max(1);
        let mut buf = BytesMut::with_capacity(
            PACK_HEADER_LEN + SYSTEM_HEADER_LEN + 64 + pes_count * 14 + payload.len(),
        );

        write_pack_header(&mut buf, pts);
        if key_frame {
            write_system_header(&mut buf);
            let map = self.stream_map();
            buf.put_slice(&map);
        }
        write_pes(&mut buf, stream.stream_id(), pts, payload);

        buf.freeze()
    }

    /// 当前流表对应的 PSM（含 CRC）
    pub fn stream_map(&mut self) -> Bytes {
        if let Some(map) = &self.stream_map {
            return map.clone();
        }

        let map = build_stream_map(&self.streams);
        self.stream_map = Some(map.clone());
        map
    }
}

impl Default for PsMuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack header：起始码 + SCR + mux rate + 无填充
pub fn write_pack_header(buf: &mut BytesMut, scr: u64) {
    buf.put_slice(&PS_START_CODE);
    buf.put_u8(PACK_HEADER_ID);
    put_scr(buf, scr);
    buf.put_u8((MUX_RATE >> 14) as u8);
    buf.put_u8((MUX_RATE >> 6) as u8);
    buf.put_u8((((MUX_RATE & 0x3F) << 2) | 0x03) as u8);
    // reserved(5) + pack_stuffing_length(3) = 0
    buf.put_u8(0xF8);
}

/// System header：一路视频 + 一路音频的缓冲区上界
pub fn write_system_header(buf: &mut BytesMut) {
    buf.put_slice(&PS_START_CODE);
    buf.put_u8(SYSTEM_HEADER_ID);
    buf.put_u16(12);
    // marker + rate_bound(22) + marker
    buf.put_slice(&[0x80, 0x2F, 0xB5]);
    // audio_bound=1, fixed=0, CSPS=0
    buf.put_u8(0x04);
    // audio/video lock, marker, video_bound=1
    buf.put_u8(0xE1);
    // packet_rate_restriction=0, reserved
    buf.put_u8(0x7F);
    // 视频：P-STD scale=1, size=2048（x1024）
    buf.put_slice(&[0xE0, 0xE8, 0x00]);
    // 音频：P-STD scale=0, size=32（x128）
    buf.put_slice(&[0xC0, 0xC0, 0x20]);
}

/// PSM：每个流 4 字节（stream_type, stream_id, es_info_length=0），末尾 CRC32
pub fn build_stream_map(streams: &[StreamType]) -> Bytes {
    let es_map_len = streams.len() * 4;
    let mut buf = BytesMut::with_capacity(16 + es_map_len);

    buf.put_slice(&PS_START_CODE);
    buf.put_u8(STREAM_MAP_ID);
    buf.put_u16((10 + es_map_len) as u16);
    // current_next_indicator=1, version=0
    buf.put_u8(0xE0);
    buf.put_u8(0xFF);
    // program_stream_info_length
    buf.put_u16(0);
    buf.put_u16(es_map_len as u16);
    for stream in streams {
        buf.put_u8(stream.ps_stream_type());
        buf.put_u8(stream.stream_id());
        buf.put_u16(0);
    }

    let crc = PSM_CRC.checksum(&buf);
    buf.put_u32(crc);
    buf.freeze()
}

/// PES：负载超过单包上限时拆成多个带相同 PTS 的 PES 包
pub fn write_pes(buf: &mut BytesMut, stream_id: u8, pts: u64, payload: &[u8]) {
    if payload.is_empty() {
        write_pes_packet(buf, stream_id, pts, payload);
        return;
    }

    for chunk in payload.chunks(PES_MAX_PAYLOAD) {
        write_pes_packet(buf, stream_id, pts, chunk);
    }
}

fn write_pes_packet(buf: &mut BytesMut, stream_id: u8, pts: u64, payload: &[u8]) {
    buf.put_slice(&PS_START_CODE);
    buf.put_u8(stream_id);
    buf.put_u16((PES_HEADER_TAIL + payload.len()) as u16);
    // '10' + 无加扰/无优先级
    buf.put_u8(0x80);
    // PTS_DTS_flags = '10'
    buf.put_u8(0x80);
    buf.put_u8(5);
    put_pts(buf, pts);
    buf.put_slice(payload);
}
