// 单会话 TCP 中继
//
// 监听 JT/T 1078 码流端口，只接受第一个连接；连接建立后拨号平台媒体端口。
// 读任务：解析帧 -> 封装 PS/RTP -> 有界队列（满时阻塞读，不丢数据）。
// 写任务：从队列取出写往平台。任一侧出错或显式停止都会结束整个会话，
// 结束回调只触发一次。

use super::packager::FramePackager;
use crate::error::{GbError, Result};
use crate::session::{AdapterFactory, EndCallback, SessionDescriptor, SessionStream};
use async_trait::async_trait;
use bytes::Bytes;
use flux_jt1078::FrameParser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

pub const REASON_SOURCE_CLOSED: &str = "source closed";
pub const REASON_DESTINATION_CLOSED: &str = "destination closed";

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// 读写任务之间的队列容量（RTP 包个数）
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    /// 码流监听地址
    pub bind_ip: String,
    pub read_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            connect_timeout: Duration::from_secs(5),
            bind_ip: "0.0.0.0".to_string(),
            read_buffer: 64 * 1024,
        }
    }
}

/// 一次性收尾：发停止信号并调用结束回调
struct Teardown {
    fired: AtomicBool,
    stop_tx: watch::Sender<bool>,
    on_end: Mutex<Option<EndCallback>>,
}

impl Teardown {
    fn new(on_end: EndCallback) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            fired: AtomicBool::new(false),
            stop_tx,
            on_end: Mutex::new(Some(on_end)),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// 首次调用返回 true
    fn fire(&self, reason: &str) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.stop_tx.send_replace(true);
        let callback = self.on_end.lock().ok().and_then(|mut guard| guard.take());
        if let Some(callback) = callback {
            callback(reason);
        }
        true
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

pub struct StreamAdapter {
    call_id: String,
    local_addr: SocketAddr,
    teardown: Arc<Teardown>,
}

impl StreamAdapter {
    /// 绑定监听端口并在后台运行会话；绑定失败时不会调用 `on_end`
    pub async fn start(descriptor: &SessionDescriptor, config: StreamConfig, on_end: EndCallback) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_ip, descriptor.source_stream_port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| GbError::Transport(format!("Failed to listen on {}: {}", bind, e)))?;
        let local_addr = listener.local_addr()?;

        if !descriptor.tcp_active {
            tracing::info!(
                target: "gb28181::stream",
                call_id = %descriptor.call_id,
                "Platform offered setup:active, device still dials the destination",
            );
        }

        let teardown = Arc::new(Teardown::new(on_end));
        let span = tracing::info_span!(
            "gb28181.stream.session",
            call_id = %descriptor.call_id,
            path = %descriptor.path(),
            listen = %local_addr,
            destination = %descriptor.destination(),
        );

        tokio::spawn(run_session(listener, descriptor.clone(), config, teardown.clone()).instrument(span));

        tracing::info!(target: "gb28181::stream", call_id = %descriptor.call_id, listen = %local_addr, "Stream adapter listening");

        Ok(Self {
            call_id: descriptor.call_id.clone(),
            local_addr,
            teardown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn is_stopped(&self) -> bool {
        self.teardown.is_fired()
    }

    pub fn stop(&self, reason: &str) {
        if self.teardown.fire(reason) {
            tracing::info!(target: "gb28181::stream", call_id = %self.call_id, %reason, "Stream adapter stopped");
        }
    }
}

impl SessionStream for StreamAdapter {
    fn stop(&self, reason: &str) {
        StreamAdapter::stop(self, reason);
    }
}

async fn run_session(listener: TcpListener, descriptor: SessionDescriptor, config: StreamConfig, teardown: Arc<Teardown>) {
    let mut stop_rx = teardown.subscribe();

    let inbound = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, remote)) => {
                tracing::info!(target: "gb28181::stream", %remote, "Source connected");
                stream
            }
            Err(e) => {
                tracing::warn!(target: "gb28181::stream", "Accept failed: {}", e);
                teardown.fire(&format!("accept failed: {}", e));
                return;
            }
        },
        _ = stop_requested(&mut stop_rx) => return,
    };
    // 只接受一个连接
    drop(listener);

    let destination = descriptor.destination();
    let outbound = tokio::select! {
        dialed = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&destination)) => match dialed {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(target: "gb28181::stream", %destination, "Connect failed: {}", e);
                teardown.fire(&format!("connect failed: {}", e));
                return;
            }
            Err(_) => {
                tracing::warn!(target: "gb28181::stream", %destination, "Connect timed out");
                teardown.fire("connect timeout");
                return;
            }
        },
        _ = stop_requested(&mut stop_rx) => return,
    };
    let _ = outbound.set_nodelay(true);
    tracing::info!(target: "gb28181::stream", %destination, "Destination connected");

    let (tx, rx) = mpsc::channel::<Bytes>(config.queue_capacity.max(1));
    let (out_read, out_write) = outbound.into_split();
    let packager = FramePackager::new(&descriptor);

    let reader = tokio::spawn(
        read_loop(inbound, packager, tx, teardown.clone(), stop_rx.clone(), config.read_buffer)
            .instrument(tracing::Span::current()),
    );
    let writer = tokio::spawn(
        write_loop(out_write, out_read, rx, teardown.clone(), stop_rx).instrument(tracing::Span::current()),
    );

    let _ = tokio::join!(reader, writer);
    tracing::debug!(target: "gb28181::stream", "Session tasks finished");
}

async fn read_loop(
    mut inbound: TcpStream,
    mut packager: FramePackager,
    tx: mpsc::Sender<Bytes>,
    teardown: Arc<Teardown>,
    mut stop_rx: watch::Receiver<bool>,
    read_buffer: usize,
) {
    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; read_buffer.max(1024)];
    let mut frames: u64 = 0;

    let failure = 'read: loop {
        let n = tokio::select! {
            read = inbound.read(&mut buf) => match read {
                Ok(0) => break 'read None,
                Ok(n) => n,
                // 连接重置按正常结束处理
                Err(e) => {
                    tracing::debug!(target: "gb28181::stream", "Source read ended: {}", e);
                    break 'read None;
                }
            },
            _ = stop_requested(&mut stop_rx) => return,
        };

        parser.feed(&buf[..n]);
        loop {
            let frame = match parser.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => break 'read Some(format!("decode error: {}", e)),
            };
            frames += 1;

            for chunk in packager.package(&frame) {
                tokio::select! {
                    sent = tx.send(chunk) => {
                        // 写任务已退出，由其负责收尾
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = stop_requested(&mut stop_rx) => return,
                }
            }
        }
    };

    match failure {
        Some(reason) => {
            tracing::warn!(target: "gb28181::stream", frames, "Source stream rejected: {}", reason);
            teardown.fire(&reason);
        }
        // 关闭发送端，写任务清空队列后收尾
        None => tracing::info!(target: "gb28181::stream", frames, "Source disconnected"),
    }
}

async fn write_loop(
    mut out_write: OwnedWriteHalf,
    mut out_read: OwnedReadHalf,
    mut rx: mpsc::Receiver<Bytes>,
    teardown: Arc<Teardown>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut probe = [0u8; 512];
    let mut sent: u64 = 0;

    let reason = loop {
        let chunk = tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break REASON_SOURCE_CLOSED.to_string(),
            },
            // 平台不会回传数据，读到 EOF 即对端关闭
            read = out_read.read(&mut probe) => match read {
                Ok(0) | Err(_) => break REASON_DESTINATION_CLOSED.to_string(),
                Ok(_) => continue,
            },
            _ = stop_requested(&mut stop_rx) => return,
        };

        let written = tokio::select! {
            written = out_write.write_all(&chunk) => written,
            _ = stop_requested(&mut stop_rx) => return,
        };
        if let Err(e) = written {
            break format!("write error: {}", e);
        }
        sent += 1;
    };

    let _ = out_write.shutdown().await;
    tracing::info!(target: "gb28181::stream", packets = sent, %reason, "Destination writer finished");
    teardown.fire(&reason);
}

/// 为编排器创建 `StreamAdapter`
pub struct StreamAdapterFactory {
    config: StreamConfig,
}

impl StreamAdapterFactory {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AdapterFactory for StreamAdapterFactory {
    async fn create(&self, descriptor: &SessionDescriptor, on_end: EndCallback) -> Result<Box<dyn SessionStream>> {
        let adapter = StreamAdapter::start(descriptor, self.config.clone(), on_end).await?;
        Ok(Box::new(adapter))
    }
}
