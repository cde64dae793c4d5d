use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use flux_gb28181::sip::{ChannelInfo, DeviceIdentity, PlatformIdentity, SignalingConfig};
use flux_gb28181::{StreamConfig, StreamType};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 环境变量前缀，层级用双下划线分隔：JT2GB_PLATFORM__PASSWORD
pub const ENV_PREFIX: &str = "JT2GB";

/// 网关配置
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub device: DeviceSection,
    pub platform: PlatformSection,
    #[serde(default)]
    pub sip: SipSection,
    #[serde(default)]
    pub channels: Vec<ChannelSection>,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub callback: CallbackSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSection {
    pub id: String,
    pub domain: String,
    /// 写入 Contact / SDP 的本机地址
    pub local_ip: String,
    #[serde(default = "default_sip_port")]
    pub local_port: u16,
    /// SIP 套接字绑定地址
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    /// JT/T 1078 终端手机号（12 位）
    #[serde(default)]
    pub sim: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    pub id: String,
    pub domain: String,
    pub ip: String,
    #[serde(default = "default_sip_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SipSection {
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_register_expires")]
    pub register_expires: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_keepalive_failures")]
    pub max_keepalive_failures: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for SipSection {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval(),
            register_expires: default_register_expires(),
            request_timeout_ms: default_request_timeout(),
            max_keepalive_failures: default_max_keepalive_failures(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    /// 20 位国标通道编码
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// JT/T 1078 逻辑通道号
    pub channel: u8,
    /// 覆盖设备级 sim
    #[serde(default)]
    pub sim: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    /// 码流监听端口范围（闭区间）
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    #[serde(default = "default_port_end")]
    pub port_end: u16,
    #[serde(default = "default_stream_types")]
    pub stream_types: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port_start: default_port_start(),
            port_end: default_port_end(),
            stream_types: default_stream_types(),
            connect_timeout_ms: default_connect_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_callback_timeout")]
    pub timeout_ms: u64,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_callback_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_sip_port() -> u16 {
    5060
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_keepalive_interval() -> u64 {
    60
}

fn default_register_expires() -> u32 {
    3600
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_max_keepalive_failures() -> u32 {
    3
}

fn default_port_start() -> u16 {
    30000
}

fn default_port_end() -> u16 {
    30100
}

fn default_stream_types() -> Vec<String> {
    vec!["h264".to_string(), "g711a".to_string()]
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_callback_timeout() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// JT2GB_* 环境变量覆盖
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl GatewayConfig {
    /// 加载 TOML 配置文件并叠加环境变量
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with(path, environment())
    }

    pub fn load_with<P: AsRef<Path>>(path: P, env: Environment) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow!("Config file not found: {}", path.display()));
        }

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .add_source(env)
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.device.id.len() != 20 || !self.device.id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("device.id must be a 20-digit code, got {:?}", self.device.id));
        }
        if self.platform.id.is_empty() || self.platform.ip.is_empty() {
            return Err(anyhow!("platform.id and platform.ip are required"));
        }
        if self.stream.port_start == 0 || self.stream.port_start > self.stream.port_end {
            return Err(anyhow!(
                "invalid stream port range {}..={}",
                self.stream.port_start,
                self.stream.port_end
            ));
        }
        if self.sip.keepalive_interval_secs == 0 {
            return Err(anyhow!("sip.keepalive_interval_secs must be greater than 0"));
        }
        if self.sip.max_keepalive_failures == 0 {
            return Err(anyhow!("sip.max_keepalive_failures must be greater than 0"));
        }
        self.stream_types()?;

        for channel in &self.channels {
            if channel.id.is_empty() {
                return Err(anyhow!("channel id must not be empty"));
            }
            if channel.sim.as_deref().unwrap_or(&self.device.sim).is_empty() {
                return Err(anyhow!("no sim configured for channel {}", channel.id));
            }
        }

        Ok(())
    }

    pub fn stream_types(&self) -> Result<Vec<StreamType>> {
        self.stream
            .stream_types
            .iter()
            .map(|name| StreamType::from_name(name).ok_or_else(|| anyhow!("unknown stream type: {}", name)))
            .collect()
    }

    pub fn sip_bind_addr(&self) -> String {
        format!("{}:{}", self.device.bind_ip, self.device.local_port)
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        let d = &self.device;
        let mut device = DeviceIdentity::new(&d.id, &d.domain, &d.local_ip, d.local_port).with_channels(
            self.channels
                .iter()
                .map(|c| ChannelInfo {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    logical_channel: c.channel,
                })
                .collect(),
        );

        if let Some(name) = &d.name {
            device.name = name.clone();
        }
        if let Some(manufacturer) = &d.manufacturer {
            device.manufacturer = manufacturer.clone();
        }
        if let Some(model) = &d.model {
            device.model = model.clone();
        }
        if let Some(firmware) = &d.firmware {
            device.firmware = firmware.clone();
        }
        device
    }

    pub fn platform_identity(&self) -> PlatformIdentity {
        let p = &self.platform;
        PlatformIdentity {
            id: p.id.clone(),
            domain: p.domain.clone(),
            ip: p.ip.clone(),
            port: p.port,
            password: p.password.clone(),
        }
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        let mut config = SignalingConfig {
            keepalive_interval: Duration::from_secs(self.sip.keepalive_interval_secs),
            register_expires: self.sip.register_expires,
            request_timeout: Duration::from_millis(self.sip.request_timeout_ms),
            max_keepalive_failures: self.sip.max_keepalive_failures,
            ..SignalingConfig::default()
        };
        if let Some(user_agent) = &self.sip.user_agent {
            config.user_agent = user_agent.clone();
        }
        config
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            queue_capacity: self.stream.queue_capacity,
            connect_timeout: Duration::from_millis(self.stream.connect_timeout_ms),
            bind_ip: self.stream.bind_ip.clone(),
            ..StreamConfig::default()
        }
    }
}
