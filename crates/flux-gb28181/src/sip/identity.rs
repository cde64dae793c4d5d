// 设备 / 平台身份与信令参数
// 客户端构造后不再修改

use std::time::Duration;

/// 设备下的一个视频通道
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// 20 位国标通道编码
    pub id: String,
    pub name: String,
    /// 对应的 JT/T 1078 逻辑通道号
    pub logical_channel: u8,
}

/// 本端（模拟设备）身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// 20 位国标设备编码
    pub id: String,
    /// SIP 域
    pub domain: String,
    pub local_ip: String,
    pub local_port: u16,

    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,

    pub channels: Vec<ChannelInfo>,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, domain: impl Into<String>, local_ip: impl Into<String>, local_port: u16) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            local_ip: local_ip.into(),
            local_port,
            name: "JT1078 Gateway".to_string(),
            manufacturer: "flux".to_string(),
            model: "jt2gb".to_string(),
            firmware: env!("CARGO_PKG_VERSION").to_string(),
            channels: Vec::new(),
        }
    }

    pub fn with_channels(mut self, channels: Vec<ChannelInfo>) -> Self {
        self.channels = channels;
        self
    }

    /// sip:设备ID@域
    pub fn sip_uri(&self) -> String {
        format!("sip:{}@{}", self.id, self.domain)
    }

    /// Contact 使用的实际地址
    pub fn contact_uri(&self) -> String {
        format!("sip:{}@{}:{}", self.id, self.local_ip, self.local_port)
    }

    /// 行政区划：编码前 6 位
    pub fn civil_code(&self) -> &str {
        self.id.get(..6).unwrap_or(&self.id)
    }

    pub fn channel(&self, id: &str) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// 上级平台身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub id: String,
    pub domain: String,
    pub ip: String,
    pub port: u16,
    /// 注册密码，用于 Digest 鉴权
    pub password: String,
}

impl PlatformIdentity {
    pub fn sip_uri(&self) -> String {
        format!("sip:{}@{}", self.id, self.domain)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// 注册 / 心跳参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingConfig {
    pub keepalive_interval: Duration,
    /// REGISTER Expires（秒）
    pub register_expires: u32,
    /// 单个请求等待响应的上限
    pub request_timeout: Duration,
    /// 连续心跳失败多少次后判定离线
    pub max_keepalive_failures: u32,
    pub user_agent: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            register_expires: 3600,
            request_timeout: Duration::from_secs(5),
            max_keepalive_failures: 3,
            user_agent: format!("flux-jt2gb/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
