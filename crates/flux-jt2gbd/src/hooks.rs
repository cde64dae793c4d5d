// 会话钩子：ACK 时分配码流端口、补全 sim / 通道，开始和结束时回调外部服务

use crate::config::GatewayConfig;
use anyhow::Result;
use chrono::Utc;
use flux_gb28181::session::{SessionDescriptor, SessionHooks};
use flux_gb28181::StreamType;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// 码流监听端口池（闭区间），轮转分配以避开刚释放的端口
pub struct PortAllocator {
    start: u16,
    end: u16,
    state: Mutex<PortState>,
}

struct PortState {
    next: u16,
    in_use: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            state: Mutex::new(PortState {
                next: start,
                in_use: HashSet::new(),
            }),
        }
    }

    pub fn allocate(&self) -> Option<u16> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let size = (self.end - self.start) as usize + 1;

        for _ in 0..size {
            let port = state.next;
            state.next = if port >= self.end { self.start } else { port + 1 };
            if state.in_use.insert(port) {
                return Some(port);
            }
        }
        None
    }

    pub fn release(&self, port: u16) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_use.remove(&port);
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).in_use.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub event: &'static str,
    pub path: String,
    pub device_id: String,
    pub channel: String,
    pub logical_channel: u8,
    pub sim: String,
    pub port: u16,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: String,
}

impl SessionEvent {
    pub fn new(event: &'static str, device_id: &str, descriptor: &SessionDescriptor, reason: Option<&str>) -> Self {
        Self {
            event,
            path: descriptor.path(),
            device_id: device_id.to_string(),
            channel: descriptor.target_channel_id.clone(),
            logical_channel: descriptor.channel,
            sim: descriptor.sim.clone(),
            port: descriptor.source_stream_port,
            call_id: descriptor.call_id.clone(),
            reason: reason.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// 会话开始 / 结束的 HTTP 回调
#[derive(Clone)]
pub struct SessionCallback {
    endpoint: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SessionCallback {
    pub fn new(endpoint: Option<String>, timeout_ms: u64) -> Self {
        Self {
            endpoint: endpoint.filter(|s| !s.is_empty()),
            timeout: Duration::from_millis(timeout_ms),
            client: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn post(&self, event: &SessionEvent) {
        let Some(endpoint) = self.endpoint.as_ref() else {
            return;
        };

        match self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .json(event)
            .send()
            .await
        {
            Ok(resp) => {
                if !resp.status().is_success() {
                    tracing::warn!(
                        target: "jt2gbd",
                        "session callback failed: status={} event={} call_id={} endpoint={}",
                        resp.status(),
                        event.event,
                        event.call_id,
                        endpoint
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "jt2gbd",
                    "session callback error: {} event={} call_id={} endpoint={}",
                    e,
                    event.event,
                    event.call_id,
                    endpoint
                );
            }
        }
    }

    /// 不等待结果
    pub fn notify(&self, event: SessionEvent) {
        if !self.enabled() {
            return;
        }
        let callback = self.clone();
        tokio::spawn(async move {
            callback.post(&event).await;
        });
    }
}

struct ChannelBinding {
    sim: String,
    logical_channel: u8,
}

pub struct GatewayHooks {
    device_id: String,
    default_sim: String,
    channels: HashMap<String, ChannelBinding>,
    stream_types: Vec<StreamType>,
    ports: PortAllocator,
    callback: SessionCallback,
}

impl GatewayHooks {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let channels = config
            .channels
            .iter()
            .map(|c| {
                let binding = ChannelBinding {
                    sim: c.sim.clone().unwrap_or_else(|| config.device.sim.clone()),
                    logical_channel: c.channel,
                };
                (c.id.clone(), binding)
            })
            .collect();

        Ok(Self {
            device_id: config.device.id.clone(),
            default_sim: config.device.sim.clone(),
            channels,
            stream_types: config.stream_types()?,
            ports: PortAllocator::new(config.stream.port_start, config.stream.port_end),
            callback: SessionCallback::new(config.callback.url.clone(), config.callback.timeout_ms),
        })
    }
}

impl SessionHooks for GatewayHooks {
    fn prepare(&self, descriptor: &mut SessionDescriptor) -> bool {
        match self.channels.get(&descriptor.target_channel_id) {
            Some(binding) => {
                descriptor.sim = binding.sim.clone();
                descriptor.channel = binding.logical_channel;
            }
            None => {
                descriptor.sim = self.default_sim.clone();
                if descriptor.channel == 0 {
                    descriptor.channel = 1;
                }
            }
        }
        if descriptor.stream_types.is_empty() {
            descriptor.stream_types = self.stream_types.clone();
        }

        let Some(port) = self.ports.allocate() else {
            tracing::warn!(
                target: "jt2gbd",
                call_id = %descriptor.call_id,
                in_use = self.ports.in_use(),
                "No free stream port, streaming disabled",
            );
            return false;
        };
        descriptor.source_stream_port = port;
        true
    }

    fn on_start(&self, descriptor: &SessionDescriptor) {
        tracing::info!(
            target: "jt2gbd",
            path = %descriptor.path(),
            sim = %descriptor.sim,
            channel = descriptor.channel,
            port = descriptor.source_stream_port,
            "Session started",
        );
        self.callback
            .notify(SessionEvent::new("start", &self.device_id, descriptor, None));
    }

    fn on_end(&self, descriptor: &SessionDescriptor, reason: &str) {
        self.ports.release(descriptor.source_stream_port);
        tracing::info!(
            target: "jt2gbd",
            path = %descriptor.path(),
            port = descriptor.source_stream_port,
            ports_in_use = self.ports.in_use(),
            reason,
            "Session ended",
        );
        self.callback
            .notify(SessionEvent::new("stop", &self.device_id, descriptor, Some(reason)));
    }
}
