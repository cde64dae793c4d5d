// 流适配器端到端：本地 TCP 源 -> 适配器 -> 本地 TCP 目的地
use bytes::{Buf, Bytes, BytesMut};
use flux_gb28181::rtp::RtpPacket;
use flux_gb28181::session::{EndCallback, SessionDescriptor};
use flux_gb28181::sip::sdp::{SdpMedia, SdpSession};
use flux_gb28181::stream::{StreamAdapter, StreamConfig};
use flux_jt1078::{Codec, FrameType, TransportFrame};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn descriptor(destination_port: u16) -> SessionDescriptor {
    let mut offer = SdpSession::new("34020000002000000001", "127.0.0.1");
    offer.ssrc = Some(1234);
    offer.media.push(SdpMedia {
        media_type: "video".to_string(),
        port: destination_port,
        protocol: "TCP/RTP/AVP".to_string(),
        formats: vec![96],
        rtpmap: Vec::new(),
        attributes: Vec::new(),
    });
    SessionDescriptor::from_offer(
        "call-e2e".to_string(),
        "34020000002000000001".to_string(),
        "34020000001310000001".to_string(),
        String::new(),
        offer,
    )
    .unwrap()
}

fn config() -> StreamConfig {
    StreamConfig {
        bind_ip: "127.0.0.1".to_string(),
        connect_timeout: Duration::from_secs(2),
        ..StreamConfig::default()
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// 按 2 字节长度前缀拆出 RTP 包
fn split_rtp(mut data: BytesMut) -> Vec<RtpPacket> {
    let mut packets = Vec::new();
    while data.len() >= 2 {
        let len = u16::from_be_bytes([data[0], data[1]]) as usize;
        assert!(data.len() >= 2 + len, "truncated RTP packet");
        data.advance(2);
        let packet = data.split_to(len).freeze();
        packets.push(RtpPacket::from_bytes(packet).unwrap());
    }
    assert!(data.is_empty());
    packets
}

#[tokio::test]
async fn relays_frames_as_ps_over_rtp() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let desc = descriptor(destination.local_addr().unwrap().port());

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    let on_end: EndCallback = Box::new(move |reason: &str| sink.lock().unwrap().push(reason.to_string()));
    let adapter = StreamAdapter::start(&desc, config(), on_end).await.unwrap();

    let platform = tokio::spawn(async move {
        let (mut conn, _) = destination.accept().await.unwrap();
        let mut received = BytesMut::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = conn.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    let ts = now_ms();
    let key_frame = TransportFrame::new(FrameType::I, 1, 0, Some(ts), Bytes::from(vec![0x65u8; 5000]))
        .with_payload_type(Codec::H264.payload_type());
    let audio = TransportFrame::new(FrameType::Audio, 1, 10, Some(ts + 20), Bytes::from(vec![0xD5u8; 320]))
        .with_payload_type(Codec::G711A.payload_type());

    let mut wire = BytesMut::new();
    for part in key_frame.fragment(900) {
        wire.extend_from_slice(&part.encode().unwrap());
    }
    wire.extend_from_slice(&audio.encode().unwrap());

    let mut source = TcpStream::connect(adapter.local_addr()).await.unwrap();
    // 任意切分写入
    for chunk in wire.chunks(333) {
        source.write_all(chunk).await.unwrap();
    }
    source.shutdown().await.unwrap();
    drop(source);

    let received = tokio::time::timeout(Duration::from_secs(5), platform).await.unwrap().unwrap();
    let packets = split_rtp(received);

    // 关键帧拆为多个 RTP 包，音频一个
    assert!(packets.len() >= 5);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.header.version, 2);
        assert_eq!(packet.header.sequence, i as u16);
        assert_eq!(packet.header.ssrc, 1234);
    }

    let markers: Vec<usize> = packets
        .iter()
        .enumerate()
        .filter(|(_, p)| p.header.marker)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(markers, vec![packets.len() - 2, packets.len() - 1]);

    let video_pts = (ts * 90) & 0x1_FFFF_FFFF;
    assert_eq!(packets[0].header.timestamp, video_pts as u32);
    assert_eq!(packets[0].header.payload_type, 98);
    assert_eq!(&packets[0].payload[..4], &[0x00, 0x00, 0x01, 0xBA]);
    assert_eq!(&packets[0].payload[14..18], &[0x00, 0x00, 0x01, 0xBB]);

    let audio_packet = packets.last().unwrap();
    assert_eq!(audio_packet.header.payload_type, 8);
    assert_eq!(&audio_packet.payload[14..18], &[0x00, 0x00, 0x01, 0xC0]);

    // 视频负载完整到达
    let video_bytes: usize = packets[..packets.len() - 1].iter().map(|p| p.payload.len()).sum();
    assert!(video_bytes > 5000);

    for _ in 0..50 {
        if adapter.is_stopped() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(*reasons.lock().unwrap(), vec!["source closed".to_string()]);

    adapter.stop("bye");
    assert_eq!(reasons.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn corrupt_source_ends_session() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let desc = descriptor(destination.local_addr().unwrap().port());

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    let on_end: EndCallback = Box::new(move |reason: &str| sink.lock().unwrap().push(reason.to_string()));
    let adapter = StreamAdapter::start(&desc, config(), on_end).await.unwrap();

    let platform = tokio::spawn(async move {
        let (mut conn, _) = destination.accept().await.unwrap();
        let mut buf = Vec::new();
        let _ = conn.read_to_end(&mut buf).await;
        buf
    });

    let mut source = TcpStream::connect(adapter.local_addr()).await.unwrap();
    source.write_all(&[0xAB; 64]).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), platform).await.unwrap().unwrap();
    assert!(received.is_empty());

    let reasons = reasons.lock().unwrap();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("decode error"));
}

#[tokio::test]
async fn destination_close_tears_down() {
    let destination = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let desc = descriptor(destination.local_addr().unwrap().port());

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    let on_end: EndCallback = Box::new(move |reason: &str| sink.lock().unwrap().push(reason.to_string()));
    let adapter = StreamAdapter::start(&desc, config(), on_end).await.unwrap();

    let _source = TcpStream::connect(adapter.local_addr()).await.unwrap();
    let (conn, _) = destination.accept().await.unwrap();
    drop(conn);

    for _ in 0..100 {
        if adapter.is_stopped() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(adapter.is_stopped());
    assert_eq!(*reasons.lock().unwrap(), vec!["destination closed".to_string()]);
}
