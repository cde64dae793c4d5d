// 注册 / 心跳状态机
//
// Unregistered -> Registering -> Online
//                      |  401/407
//                      v
//               ReAuthenticating -> Online
//
// 连续心跳失败达到上限后转为离线并立即重新注册一次。
// 所有错误只记录日志，下一个周期重试。

use super::agent::{new_call_id, new_tag, UserAgent};
use super::digest::{generate_cnonce, DigestChallenge, DigestCredentials};
use super::identity::SignalingConfig;
use super::manscdp;
use super::message::SipResponse;
use super::transport::SipTransport;
use crate::error::{GbError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPhase {
    Unregistered,
    Registering,
    Online,
    ReAuthenticating,
}

/// 对外发布的注册状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub phase: RegistrationPhase,
    pub online: bool,
    pub keepalive_failures: u32,
}

impl Default for RegistrationStatus {
    fn default() -> Self {
        Self {
            phase: RegistrationPhase::Unregistered,
            online: false,
            keepalive_failures: 0,
        }
    }
}

pub struct Registrar {
    agent: Arc<UserAgent>,
    transport: Arc<dyn SipTransport>,
    config: SignalingConfig,
    /// REGISTER 刷新沿用同一 Call-ID 和 From tag
    call_id: String,
    from_tag: String,
    phase: RegistrationPhase,
    failures: u32,
    status_tx: watch::Sender<RegistrationStatus>,
}

impl Registrar {
    pub fn new(agent: Arc<UserAgent>, transport: Arc<dyn SipTransport>, config: SignalingConfig) -> Self {
        let call_id = new_call_id(&agent.device().local_ip);
        let (status_tx, _) = watch::channel(RegistrationStatus::default());

        Self {
            agent,
            transport,
            config,
            call_id,
            from_tag: new_tag(),
            phase: RegistrationPhase::Unregistered,
            failures: 0,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status_tx.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.phase == RegistrationPhase::Online
    }

    fn set_phase(&mut self, phase: RegistrationPhase) {
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(RegistrationStatus {
            phase: self.phase,
            online: self.phase == RegistrationPhase::Online,
            keepalive_failures: self.failures,
        });
    }

    /// 注册（必要时完成 Digest 鉴权）
    pub async fn register(&mut self) -> Result<()> {
        let span = tracing::info_span!(
            "gb28181.sip.register",
            device_id = %self.agent.device().id,
            expires = self.config.register_expires,
        );

        self.set_phase(RegistrationPhase::Registering);
        let expires = self.config.register_expires;
        let result = self.send_register(expires).instrument(span).await;

        match &result {
            Ok(()) => {
                self.failures = 0;
                self.set_phase(RegistrationPhase::Online);
                tracing::info!(target: "gb28181::sip", device_id = %self.agent.device().id, "Registered to platform");
            }
            Err(e) => {
                self.set_phase(RegistrationPhase::Unregistered);
                tracing::warn!(target: "gb28181::sip", "Registration failed: {}", e);
            }
        }

        result
    }

    /// 注销（Expires=0），仅在线时发送
    pub async fn unregister(&mut self) -> Result<()> {
        if !self.is_online() {
            return Ok(());
        }

        let span = tracing::info_span!("gb28181.sip.unregister", device_id = %self.agent.device().id);
        let result = self.send_register(0).instrument(span).await;
        self.set_phase(RegistrationPhase::Unregistered);

        match &result {
            Ok(()) => tracing::info!(target: "gb28181::sip", "Unregistered from platform"),
            Err(e) => tracing::warn!(target: "gb28181::sip", "Unregister failed: {}", e),
        }
        result
    }

    async fn send_register(&mut self, expires: u32) -> Result<()> {
        let req = self
            .agent
            .register_request(self.agent.next_cseq(), &self.call_id, &self.from_tag, expires, None);
        let resp = self.transport.send_request(req, self.config.request_timeout).await?;

        let resp = match resp.status_code {
            401 | 407 => {
                if expires > 0 {
                    self.set_phase(RegistrationPhase::ReAuthenticating);
                }
                tracing::debug!(target: "gb28181::sip", status = resp.status_code, "Digest challenge received");
                let authorization = self.authorization(&resp)?;
                let req = self.agent.register_request(
                    self.agent.next_cseq(),
                    &self.call_id,
                    &self.from_tag,
                    expires,
                    Some(authorization),
                );
                self.transport.send_request(req, self.config.request_timeout).await?
            }
            _ => resp,
        };

        if resp.is_success() {
            Ok(())
        } else if matches!(resp.status_code, 401 | 407) {
            Err(GbError::Auth(format!("credentials rejected: {} {}", resp.status_code, resp.reason_phrase)))
        } else {
            Err(GbError::Sip {
                status: resp.status_code,
                reason: resp.reason_phrase,
            })
        }
    }

    /// 根据质询计算鉴权头部，返回 (头部名, 值)
    fn authorization(&self, challenge: &SipResponse) -> Result<(&'static str, String)> {
        let (challenge_header, auth_header) = if challenge.status_code == 407 {
            ("Proxy-Authenticate", "Proxy-Authorization")
        } else {
            ("WWW-Authenticate", "Authorization")
        };

        let value = challenge
            .header(challenge_header)
            .ok_or_else(|| GbError::Auth(format!("{} without {}", challenge.status_code, challenge_header)))?;
        let challenge = DigestChallenge::parse(value)?;

        let platform = self.agent.platform();
        let credentials = DigestCredentials::compute(
            &challenge,
            &self.agent.device().id,
            &platform.password,
            "REGISTER",
            &platform.sip_uri(),
            &generate_cnonce(),
        );
        Ok((auth_header, credentials.to_header()))
    }

    /// 发送一次心跳；失败累计到上限时离线并重新注册一次
    pub async fn keepalive(&mut self) -> Result<()> {
        let sn = self.agent.next_cseq();
        let span = tracing::info_span!("gb28181.sip.keepalive", sn, device_id = %self.agent.device().id);
        let req = self
            .agent
            .message_request(sn, manscdp::keepalive(sn, &self.agent.device().id));

        let result = match self
            .transport
            .send_request(req, self.config.request_timeout)
            .instrument(span)
            .await
        {
            Ok(resp) if resp.is_success() => Ok(()),
            Ok(resp) => Err(GbError::Sip {
                status: resp.status_code,
                reason: resp.reason_phrase,
            }),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                if self.failures > 0 {
                    tracing::info!(target: "gb28181::sip", "Keepalive recovered");
                }
                self.failures = 0;
                self.publish();
            }
            Err(e) => {
                self.failures += 1;
                tracing::warn!(
                    target: "gb28181::sip",
                    failures = self.failures,
                    "Keepalive failed: {}",
                    e
                );

                if self.failures >= self.config.max_keepalive_failures {
                    tracing::warn!(target: "gb28181::sip", "Platform unreachable, going offline");
                    self.failures = 0;
                    self.set_phase(RegistrationPhase::Unregistered);
                    let _ = self.register().await;
                } else {
                    self.publish();
                }
            }
        }

        result
    }

    /// 定时器周期：在线发心跳，否则注册
    pub async fn tick(&mut self) {
        if self.is_online() {
            let _ = self.keepalive().await;
        } else {
            let _ = self.register().await;
        }
    }

    /// 注册 / 心跳循环，停止时尽力注销
    pub async fn run(mut self, mut register_now: mpsc::Receiver<()>, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.keepalive_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                Some(()) = register_now.recv() => {
                    let _ = self.register().await;
                    interval.reset();
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = self.unregister().await;
        tracing::info!(target: "gb28181::sip", "Registration loop stopped");
    }
}
