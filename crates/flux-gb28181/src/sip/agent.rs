// 设备侧 UA：构造发往平台的请求
//
// 每个出站请求消耗一个 CSeq，客户端实例内严格递增。

use super::identity::{DeviceIdentity, PlatformIdentity};
use super::manscdp;
use super::message::{SipMethod, SipRequest};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct UserAgent {
    device: DeviceIdentity,
    platform: PlatformIdentity,
    user_agent: String,
    cseq: AtomicU32,
}

impl UserAgent {
    pub fn new(device: DeviceIdentity, platform: PlatformIdentity, user_agent: impl Into<String>) -> Self {
        Self {
            device,
            platform,
            user_agent: user_agent.into(),
            cseq: AtomicU32::new(1),
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn platform(&self) -> &PlatformIdentity {
        &self.platform
    }

    /// 取下一个 CSeq
    pub fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::SeqCst)
    }

    /// REGISTER；`authorization` 为 (头部名, 值)
    pub fn register_request(
        &self,
        cseq: u32,
        call_id: &str,
        from_tag: &str,
        expires: u32,
        authorization: Option<(&str, String)>,
    ) -> SipRequest {
        let mut req = self.base_request(SipMethod::Register, self.platform.sip_uri(), from_tag);
        req.add_header("To", format!("<{}>", self.device.sip_uri()));
        req.add_header("Call-ID", call_id);
        req.add_header("CSeq", format!("{} REGISTER", cseq));
        req.add_header("Contact", format!("<{}>", self.device.contact_uri()));
        req.add_header("Max-Forwards", "70");
        req.add_header("User-Agent", self.user_agent.as_str());
        req.add_header("Expires", expires.to_string());
        if let Some((name, value)) = authorization {
            req.add_header(name, value);
        }
        req
    }

    /// MANSCDP MESSAGE（心跳、查询应答），每次新的 Call-ID 和 From tag
    pub fn message_request(&self, cseq: u32, body: String) -> SipRequest {
        let call_id = new_call_id(&self.device.local_ip);
        let mut req = self.base_request(SipMethod::Message, self.platform.sip_uri(), &new_tag());
        req.add_header("To", format!("<{}>", self.platform.sip_uri()));
        req.add_header("Call-ID", call_id);
        req.add_header("CSeq", format!("{} MESSAGE", cseq));
        req.add_header("Max-Forwards", "70");
        req.add_header("User-Agent", self.user_agent.as_str());
        req.set_body(body, manscdp::CONTENT_TYPE);
        req
    }

    fn base_request(&self, method: SipMethod, uri: String, from_tag: &str) -> SipRequest {
        let mut req = SipRequest::new(method, uri);
        req.add_header(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};rport;branch={}",
                self.device.local_ip,
                self.device.local_port,
                new_branch()
            ),
        );
        req.add_header("From", format!("<{}>;tag={}", self.device.sip_uri(), from_tag));
        req
    }
}

/// RFC 3261 magic cookie 开头的 branch
pub fn new_branch() -> String {
    format!("z9hG4bK{:016x}", rand::thread_rng().gen::<u64>())
}

pub fn new_tag() -> String {
    format!("{:010}", rand::thread_rng().gen_range(0..10_000_000_000u64))
}

pub fn new_call_id(host: &str) -> String {
    format!("{:016x}@{}", rand::thread_rng().gen::<u64>(), host)
}
