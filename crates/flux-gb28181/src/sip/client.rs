// 设备侧信令客户端
//
// - 注册 / 心跳循环（Registrar）
// - 入站 INVITE / ACK / BYE 转交会话编排
// - 入站 MESSAGE 查询：先回 200，再用新的 MESSAGE 事务发送应答

use super::agent::{new_tag, UserAgent};
use super::identity::{DeviceIdentity, PlatformIdentity, SignalingConfig};
use super::manscdp::{self, ManscdpCommand};
use super::message::{SipMethod, SipRequest, SipResponse};
use super::registrar::{Registrar, RegistrationStatus};
use super::sdp::SdpSession;
use super::transport::{IncomingRequest, RequestHandler, SipTransport};
use crate::session::{SessionDescriptor, SessionHandle};
use async_trait::async_trait;
use chrono::Local;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// SDP 应答中的媒体端口；设备主动连接平台，端口不会被使用
const ANSWER_MEDIA_PORT: u16 = 9;

pub struct SignalingClient {
    agent: Arc<UserAgent>,
    transport: Arc<dyn SipTransport>,
    sessions: SessionHandle,
    config: SignalingConfig,

    registrar: Mutex<Option<Registrar>>,
    status_rx: watch::Receiver<RegistrationStatus>,
    register_tx: mpsc::Sender<()>,
    register_rx: Mutex<Option<mpsc::Receiver<()>>>,

    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SignalingClient {
    pub fn new(
        device: DeviceIdentity,
        platform: PlatformIdentity,
        config: SignalingConfig,
        transport: Arc<dyn SipTransport>,
        sessions: SessionHandle,
    ) -> Arc<Self> {
        let agent = Arc::new(UserAgent::new(device, platform, config.user_agent.clone()));
        let registrar = Registrar::new(agent.clone(), transport.clone(), config.clone());
        let status_rx = registrar.subscribe();
        let (register_tx, register_rx) = mpsc::channel(1);
        let (stop_tx, _) = watch::channel(false);

        Arc::new(Self {
            agent,
            transport,
            sessions,
            config,
            registrar: Mutex::new(Some(registrar)),
            status_rx,
            register_tx,
            register_rx: Mutex::new(Some(register_rx)),
            stop_tx,
            task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// 注册入站处理器并启动注册循环
    pub async fn start(self: &Arc<Self>) {
        let (Some(registrar), Some(register_rx)) =
            (self.registrar.lock().await.take(), self.register_rx.lock().await.take())
        else {
            tracing::warn!(target: "gb28181::sip", "Signaling client already started");
            return;
        };

        let dispatch: Arc<dyn RequestHandler> = Arc::new(Dispatch(Arc::downgrade(self)));
        for method in [SipMethod::Invite, SipMethod::Ack, SipMethod::Bye, SipMethod::Message] {
            self.transport.register_handler(method, dispatch.clone());
        }

        let task = tokio::spawn(registrar.run(register_rx, self.stop_tx.subscribe()));
        *self.task.lock().await = Some(task);

        tracing::info!(
            target: "gb28181::sip",
            device_id = %self.agent.device().id,
            platform = %self.agent.platform().address(),
            "Signaling client started",
        );
    }

    /// 立即触发一次注册（不等待定时器）
    pub fn register_now(&self) {
        let _ = self.register_tx.try_send(());
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RegistrationStatus> {
        self.status_rx.clone()
    }

    pub fn device(&self) -> &DeviceIdentity {
        self.agent.device()
    }

    /// 停止注册循环（在线时先注销），可重复调用
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        tracing::info!(target: "gb28181::sip", "Signaling client stopped");
    }

    async fn respond(&self, req: &SipRequest, status: u16, reason: &str, destination: SocketAddr) {
        let resp = SipResponse::from_request(req, status, reason);
        self.send_response(resp, destination).await;
    }

    async fn send_response(&self, resp: SipResponse, destination: SocketAddr) {
        if let Err(e) = self.transport.send_response(resp, destination).await {
            tracing::warn!(target: "gb28181::sip", %destination, "Failed to send response: {}", e);
        }
    }

    async fn handle_invite(&self, incoming: IncomingRequest) {
        let req = &incoming.request;
        let mut descriptor = match SessionDescriptor::from_invite(req) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(target: "gb28181::sip", "Rejecting INVITE: {}", e);
                self.respond(req, 400, "Bad Request", incoming.source).await;
                return;
            }
        };

        let device = self.agent.device();
        match device.channel(&descriptor.target_channel_id) {
            Some(channel) => descriptor.channel = channel.logical_channel,
            None if descriptor.target_channel_id == device.id || device.channels.is_empty() => {}
            None => {
                tracing::warn!(
                    target: "gb28181::sip",
                    channel = %descriptor.target_channel_id,
                    "INVITE for unknown channel",
                );
                self.respond(req, 404, "Not Found", incoming.source).await;
                return;
            }
        }

        let answer = SdpSession::answer(
            &descriptor.offer,
            &device.id,
            &device.local_ip,
            ANSWER_MEDIA_PORT,
            descriptor.ssrc,
        );
        let mut resp = SipResponse::from_request(req, 200, "OK").with_to_tag(&new_tag());
        resp.add_header("Contact", format!("<{}>", device.contact_uri()));
        resp.add_header("User-Agent", self.config.user_agent.as_str());
        resp.set_body(answer.to_sdp_string(), "application/sdp");

        tracing::info!(
            target: "gb28181::sip",
            call_id = %descriptor.call_id,
            channel = %descriptor.target_channel_id,
            transport = %descriptor.transport,
            ssrc = descriptor.ssrc,
            "INVITE accepted",
        );

        // 先入队 Invite，保证编排器先于 ACK 看到描述
        self.sessions.invite(descriptor);
        self.send_response(resp, incoming.source).await;
    }

    async fn handle_message(&self, incoming: IncomingRequest) {
        let req = &incoming.request;
        let body = req.body.as_deref().unwrap_or_default();

        let message = match manscdp::parse(body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(target: "gb28181::sip", "Invalid MESSAGE body: {}", e);
                self.respond(req, 400, "Bad Request", incoming.source).await;
                return;
            }
        };

        let device = self.agent.device();
        let sn = message.sn.unwrap_or(0);
        let reply = match message.command() {
            None => {
                tracing::debug!(target: "gb28181::sip", cmd_type = %message.cmd_type, "Unsupported MESSAGE command");
                self.respond(req, 404, "Not Found", incoming.source).await;
                return;
            }
            Some(ManscdpCommand::Keepalive) => None,
            Some(ManscdpCommand::DeviceInfo) => Some(manscdp::device_info_response(sn, device)),
            Some(ManscdpCommand::DeviceStatus) => Some(manscdp::device_status_response(sn, &device.id, Local::now())),
            Some(ManscdpCommand::Catalog) => Some(manscdp::catalog_response(sn, device)),
        };

        self.respond(req, 200, "OK", incoming.source).await;

        let Some(xml) = reply else {
            return;
        };

        // 应答走新的 MESSAGE 事务
        let agent = self.agent.clone();
        let transport = self.transport.clone();
        let timeout = self.config.request_timeout;
        let cmd_type = message.cmd_type.clone();
        let span = tracing::info_span!("gb28181.sip.query_reply", cmd_type = %cmd_type, sn);

        tokio::spawn(
            async move {
                let request = agent.message_request(agent.next_cseq(), xml);
                match transport.send_request(request, timeout).await {
                    Ok(resp) if resp.is_success() => {
                        tracing::debug!(target: "gb28181::sip", "Query reply delivered");
                    }
                    Ok(resp) => {
                        tracing::warn!(target: "gb28181::sip", status = resp.status_code, "Query reply rejected");
                    }
                    Err(e) => tracing::warn!(target: "gb28181::sip", "Failed to send query reply: {}", e),
                }
            }
            .instrument(span),
        );
    }
}

/// 入站请求分发；只持有客户端弱引用，避免与传输层循环引用
struct Dispatch(Weak<SignalingClient>);

#[async_trait]
impl RequestHandler for Dispatch {
    async fn on_request(&self, incoming: IncomingRequest) {
        let Some(client) = self.0.upgrade() else {
            return;
        };
        if client.stopped.load(Ordering::SeqCst) {
            return;
        }

        let method = incoming.request.method;
        let call_id = incoming.request.call_id().unwrap_or_default().to_string();
        let span = tracing::info_span!("gb28181.sip.request", %method, %call_id, remote = %incoming.source);

        async move {
            match method {
                SipMethod::Invite => client.handle_invite(incoming).await,
                SipMethod::Ack => client.sessions.ack(&call_id),
                SipMethod::Bye => {
                    client.sessions.bye(&call_id);
                    client.respond(&incoming.request, 200, "OK", incoming.source).await;
                }
                SipMethod::Message => client.handle_message(incoming).await,
                _ => {
                    client
                        .respond(&incoming.request, 405, "Method Not Allowed", incoming.source)
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }
}
