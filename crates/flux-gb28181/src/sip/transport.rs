// SIP 传输抽象
//
// 信令逻辑只依赖 `SipTransport`：发送请求并等待最终响应、发送响应、
// 按方法注册入站请求处理器。测试中用内存实现替换。

use super::message::{SipMessage, SipMethod, SipRequest, SipResponse};
use crate::error::{GbError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// 入站请求及其来源地址
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub request: SipRequest,
    pub source: SocketAddr,
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_request(&self, incoming: IncomingRequest);
}

#[async_trait]
pub trait SipTransport: Send + Sync {
    /// 发送请求并等待最终响应（忽略 1xx），超时返回 `GbError::Timeout`
    async fn send_request(&self, request: SipRequest, timeout: Duration) -> Result<SipResponse>;

    async fn send_response(&self, response: SipResponse, destination: SocketAddr) -> Result<()>;

    /// 同一方法重复注册时替换旧处理器
    fn register_handler(&self, method: SipMethod, handler: Arc<dyn RequestHandler>);
}

struct PendingTransaction {
    /// Call-ID + CSeq，用于对端响应缺少 branch 时匹配
    fallback_key: String,
    tx: oneshot::Sender<SipResponse>,
}

/// 基于 UDP 的 SIP 传输，所有请求都发往上级平台
pub struct UdpSipTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    pending: DashMap<String, PendingTransaction>,
    handlers: DashMap<SipMethod, Arc<dyn RequestHandler>>,
    stop_tx: watch::Sender<bool>,
}

impl UdpSipTransport {
    pub async fn bind(local: &str, remote: &str) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| GbError::Transport(format!("Failed to bind UDP socket {}: {}", local, e)))?;

        let remote: SocketAddr = tokio::net::lookup_host(remote)
            .await
            .map_err(|e| GbError::Transport(format!("Invalid platform address {}: {}", remote, e)))?
            .next()
            .ok_or_else(|| GbError::Transport(format!("Platform address not resolved: {}", remote)))?;

        tracing::info!(target: "gb28181::sip", local = %local, remote = %remote, "SIP transport bound");

        let (stop_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            remote,
            pending: DashMap::new(),
            handlers: DashMap::new(),
            stop_tx,
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// 启动接收循环
    pub fn spawn_receiver(self: &Arc<Self>) -> JoinHandle<()> {
        let transport = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];

            loop {
                tokio::select! {
                    received = transport.socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, addr)) => transport.handle_datagram(&buf[..len], addr).await,
                            Err(e) => {
                                tracing::warn!(target: "gb28181::sip", "Failed to receive UDP packet: {}", e);
                            }
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            // 丢弃等待中的事务，等待方立即得到错误
            transport.pending.clear();
            tracing::info!(target: "gb28181::sip", "SIP transport receiver stopped");
        })
    }

    /// 停止接收循环并释放处理器
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.handlers.clear();
    }

    async fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }

        let message = match SipMessage::parse(data) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(target: "gb28181::sip", remote = %source, "Failed to parse SIP message: {}", e);
                return;
            }
        };

        match message {
            SipMessage::Response(resp) => self.complete_transaction(resp),
            SipMessage::Request(req) => {
                let handler = self.handlers.get(&req.method).map(|h| h.value().clone());
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            handler.on_request(IncomingRequest { request: req, source }).await;
                        });
                    }
                    None if req.method == SipMethod::Ack => {}
                    None => {
                        tracing::debug!(target: "gb28181::sip", method = %req.method, "No handler registered");
                        let resp = SipResponse::from_request(&req, 405, "Method Not Allowed");
                        if let Err(e) = self.send_response(resp, source).await {
                            tracing::warn!(target: "gb28181::sip", "Failed to send 405: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn complete_transaction(&self, resp: SipResponse) {
        if resp.is_provisional() {
            return;
        }

        let key = resp
            .via_branch()
            .filter(|b| self.pending.contains_key(*b))
            .map(str::to_string)
            .or_else(|| {
                let fallback = fallback_key(resp.call_id(), resp.cseq());
                self.pending
                    .iter()
                    .find(|entry| entry.value().fallback_key == fallback)
                    .map(|entry| entry.key().clone())
            });

        let Some(key) = key else {
            tracing::debug!(
                target: "gb28181::sip",
                status = resp.status_code,
                call_id = ?resp.call_id(),
                "Response without pending transaction dropped",
            );
            return;
        };

        if let Some((_, pending)) = self.pending.remove(&key) {
            let _ = pending.tx.send(resp);
        }
    }
}

fn fallback_key(call_id: Option<&str>, cseq: Option<(u32, &str)>) -> String {
    match cseq {
        Some((seq, method)) => format!("{}|{} {}", call_id.unwrap_or_default(), seq, method),
        None => format!("{}|", call_id.unwrap_or_default()),
    }
}

#[async_trait]
impl SipTransport for UdpSipTransport {
    async fn send_request(&self, request: SipRequest, timeout: Duration) -> Result<SipResponse> {
        let data = request.to_bytes()?;
        let fallback = fallback_key(request.call_id(), request.cseq());
        let key = request.via_branch().map(str::to_string).unwrap_or_else(|| fallback.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            key.clone(),
            PendingTransaction {
                fallback_key: fallback,
                tx,
            },
        );

        if let Err(e) = self.socket.send_to(&data, self.remote).await {
            self.pending.remove(&key);
            return Err(GbError::Transport(format!("Failed to send {}: {}", request.method, e)));
        }

        tracing::debug!(target: "gb28181::sip", method = %request.method, remote = %self.remote, "SIP request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(GbError::Transport("SIP transport stopped".to_string())),
            Err(_) => {
                self.pending.remove(&key);
                Err(GbError::Timeout)
            }
        }
    }

    async fn send_response(&self, response: SipResponse, destination: SocketAddr) -> Result<()> {
        let data = response.to_bytes()?;
        self.socket
            .send_to(&data, destination)
            .await
            .map_err(|e| GbError::Transport(format!("Failed to send response: {}", e)))?;

        tracing::debug!(
            target: "gb28181::sip",
            remote = %destination,
            status = response.status_code,
            "SIP response sent",
        );
        Ok(())
    }

    fn register_handler(&self, method: SipMethod, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(method, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Collect(mpsc::UnboundedSender<IncomingRequest>);

    #[async_trait]
    impl RequestHandler for Collect {
        async fn on_request(&self, incoming: IncomingRequest) {
            let _ = self.0.send(incoming);
        }
    }

    fn request(branch: &str) -> SipRequest {
        let mut req = SipRequest::new(SipMethod::Message, "sip:34020000002000000001@3402000000");
        req.add_header("Via", format!("SIP/2.0/UDP 127.0.0.1:5060;branch={}", branch));
        req.add_header("From", "<sip:34020000001320000001@3402000000>;tag=a");
        req.add_header("To", "<sip:34020000002000000001@3402000000>");
        req.add_header("Call-ID", "c1");
        req.add_header("CSeq", "5 MESSAGE");
        req
    }

    #[tokio::test]
    async fn test_request_response_by_branch() {
        let platform = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let platform_addr = platform.local_addr().unwrap().to_string();
        let transport = UdpSipTransport::bind("127.0.0.1:0", &platform_addr).await.unwrap();
        let receiver = transport.spawn_receiver();

        let peer = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, from) = platform.recv_from(&mut buf).await.unwrap();
            let req = SipRequest::parse(&buf[..len]).unwrap();

            let trying = SipResponse::from_request(&req, 100, "Trying");
            platform.send_to(&trying.to_bytes().unwrap(), from).await.unwrap();
            let ok = SipResponse::from_request(&req, 200, "OK");
            platform.send_to(&ok.to_bytes().unwrap(), from).await.unwrap();
        });

        let resp = transport
            .send_request(request("z9hG4bKt1"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status_code, 200);

        peer.await.unwrap();
        transport.stop();
        receiver.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let platform = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpSipTransport::bind("127.0.0.1:0", &platform.local_addr().unwrap().to_string())
            .await
            .unwrap();
        let _receiver = transport.spawn_receiver();

        let err = transport
            .send_request(request("z9hG4bKt2"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, GbError::Timeout));
        assert!(transport.pending.is_empty());
        transport.stop();
    }

    #[tokio::test]
    async fn test_inbound_dispatch_and_405() {
        let platform = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpSipTransport::bind("127.0.0.1:0", &platform.local_addr().unwrap().to_string())
            .await
            .unwrap();
        let device_addr = transport.local_addr().unwrap();
        let _receiver = transport.spawn_receiver();

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.register_handler(SipMethod::Message, Arc::new(Collect(tx)));

        platform
            .send_to(&request("z9hG4bKin").to_bytes().unwrap(), device_addr)
            .await
            .unwrap();
        let incoming = rx.recv().await.unwrap();
        assert_eq!(incoming.request.method, SipMethod::Message);
        assert_eq!(incoming.source, platform.local_addr().unwrap());

        let mut options = request("z9hG4bKopt");
        options.method = SipMethod::Options;
        platform.send_to(&options.to_bytes().unwrap(), device_addr).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = platform.recv_from(&mut buf).await.unwrap();
        let resp = SipResponse::parse(&buf[..len]).unwrap();
        assert_eq!(resp.status_code, 405);
        transport.stop();
    }
}
