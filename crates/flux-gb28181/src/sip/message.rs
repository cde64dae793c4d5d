// SIP 消息解析和生成
// 支持 GB28181 标准的 SIP 消息格式
//
// 头部保持原始顺序（Via 可重复），名称匹配不区分大小写并识别紧凑形式。
// 消息体在内部是 UTF-8，线路上按 Content-Type 转码，Content-Length 按编码后长度计算。

use super::charset;
use crate::error::{GbError, Result};
use bytes::Bytes;
use std::fmt;

pub const SIP_VERSION: &str = "SIP/2.0";

/// SIP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Message,
    Subscribe,
    Notify,
    Info,
    Options,
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Message => "MESSAGE",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Info => "INFO",
            SipMethod::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(SipMethod::Register),
            "INVITE" => Some(SipMethod::Invite),
            "ACK" => Some(SipMethod::Ack),
            "BYE" => Some(SipMethod::Bye),
            "CANCEL" => Some(SipMethod::Cancel),
            "MESSAGE" => Some(SipMethod::Message),
            "SUBSCRIBE" => Some(SipMethod::Subscribe),
            "NOTIFY" => Some(SipMethod::Notify),
            "INFO" => Some(SipMethod::Info),
            "OPTIONS" => Some(SipMethod::Options),
            _ => None,
        }
    }
}

/// 紧凑头部名 -> 完整头部名（RFC 3261 7.3.3）
fn canonical_name(name: &str) -> &str {
    match name {
        "i" | "I" => "Call-ID",
        "m" | "M" => "Contact",
        "e" | "E" => "Content-Encoding",
        "l" | "L" => "Content-Length",
        "c" | "C" => "Content-Type",
        "f" | "F" => "From",
        "s" | "S" => "Subject",
        "k" | "K" => "Supported",
        "t" | "T" => "To",
        "v" | "V" => "Via",
        other => other,
    }
}

fn same_header(a: &str, b: &str) -> bool {
    canonical_name(a).eq_ignore_ascii_case(canonical_name(b))
}

/// 有序头部表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第一个同名头部
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| same_header(k, name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| same_header(k, name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 追加头部（允许重复）
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// 替换第一个同名头部并删除其余同名项；不存在时追加
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter().position(|(k, _)| same_header(k, &name)) {
            Some(idx) => {
                self.entries[idx].1 = value;
                let mut seen = 0usize;
                self.entries.retain(|(k, _)| {
                    if same_header(k, &name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !same_header(k, name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 取头部参数，如 `<sip:a@b>;tag=123` 中的 tag
pub fn header_param<'a>(value: &'a str, param: &str) -> Option<&'a str> {
    value.split(';').skip(1).find_map(|part| {
        let (k, v) = part.split_once('=')?;
        if k.trim().eq_ignore_ascii_case(param) {
            Some(v.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

/// 从 URI 或 From/To 头部中提取用户部分（设备/平台 ID）
pub fn uri_user(value: &str) -> Option<&str> {
    let start = value.find("sip:")? + 4;
    let rest = &value[start..];
    let end = rest.find('@')?;
    let user = &rest[..end];
    if user.is_empty() {
        None
    } else {
        Some(user)
    }
}

/// 公共访问器，请求和响应共用
macro_rules! common_accessors {
    () => {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name)
        }

        /// 添加头部
        pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
            self.headers.add(name, value);
        }

        pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
            self.headers.set(name, value);
        }

        /// 设置消息体及其类型
        pub fn set_body(&mut self, body: impl Into<String>, content_type: &str) {
            self.headers.set("Content-Type", content_type);
            self.body = Some(body.into());
        }

        pub fn call_id(&self) -> Option<&str> {
            self.headers.get("Call-ID")
        }

        /// CSeq 序号和方法
        pub fn cseq(&self) -> Option<(u32, &str)> {
            let value = self.headers.get("CSeq")?;
            let (seq, method) = value.trim().split_once(char::is_whitespace)?;
            Some((seq.parse().ok()?, method.trim()))
        }

        /// 顶层 Via 的 branch
        pub fn via_branch(&self) -> Option<&str> {
            header_param(self.headers.get("Via")?, "branch")
        }

        pub fn from_tag(&self) -> Option<&str> {
            header_param(self.headers.get("From")?, "tag")
        }

        pub fn to_tag(&self) -> Option<&str> {
            header_param(self.headers.get("To")?, "tag")
        }

        pub fn content_type(&self) -> Option<&str> {
            self.headers.get("Content-Type")
        }
    };
}

/// SIP 请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl SipRequest {
    pub fn new(method: SipMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: SIP_VERSION.to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    common_accessors!();

    /// 编码为线路格式
    pub fn to_bytes(&self) -> Result<Bytes> {
        let start_line = format!("{} {} {}", self.method, self.uri, self.version);
        render(&start_line, &self.headers, self.body.as_deref())
    }

    /// 从线路字节解析 SIP 请求
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (start_line, headers, body) = split_message(data)?;

        let parts: Vec<&str> = start_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(GbError::Decode(format!("Invalid request line: {}", start_line)));
        }

        let method = SipMethod::parse(parts[0])
            .ok_or_else(|| GbError::Decode(format!("Unknown method: {}", parts[0])))?;

        Ok(Self {
            method,
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
            body,
        })
    }
}

/// SIP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    pub version: String,
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status_code: u16, reason_phrase: impl Into<String>) -> Self {
        Self {
            version: SIP_VERSION.to_string(),
            status_code,
            reason_phrase: reason_phrase.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// 按请求构造响应，复制 Via/From/To/Call-ID/CSeq
    pub fn from_request(req: &SipRequest, status_code: u16, reason_phrase: impl Into<String>) -> Self {
        let mut resp = Self::new(status_code, reason_phrase);
        for via in req.headers.get_all("Via") {
            resp.headers.add("Via", via);
        }
        for key in ["From", "To", "Call-ID", "CSeq"] {
            if let Some(value) = req.headers.get(key) {
                resp.headers.add(key, value);
            }
        }
        resp
    }

    /// To 没有 tag 时补上
    pub fn with_to_tag(mut self, tag: &str) -> Self {
        if let Some(to) = self.headers.get("To") {
            if header_param(to, "tag").is_none() {
                let tagged = format!("{};tag={}", to, tag);
                self.headers.set("To", tagged);
            }
        }
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status_code)
    }

    common_accessors!();

    pub fn to_bytes(&self) -> Result<Bytes> {
        let start_line = format!("{} {} {}", self.version, self.status_code, self.reason_phrase);
        render(&start_line, &self.headers, self.body.as_deref())
    }

    /// 从线路字节解析 SIP 响应
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (start_line, headers, body) = split_message(data)?;

        let parts: Vec<&str> = start_line.splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(GbError::Decode(format!("Invalid status line: {}", start_line)));
        }

        let status_code = parts[1]
            .parse::<u16>()
            .map_err(|_| GbError::Decode(format!("Invalid status code: {}", parts[1])))?;

        Ok(Self {
            version: parts[0].to_string(),
            status_code,
            reason_phrase: parts.get(2).copied().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// SIP 消息（请求或响应）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.starts_with(b"SIP/") {
            Ok(SipMessage::Response(SipResponse::parse(data)?))
        } else {
            Ok(SipMessage::Request(SipRequest::parse(data)?))
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            SipMessage::Request(req) => req.to_bytes(),
            SipMessage::Response(resp) => resp.to_bytes(),
        }
    }
}

fn render(start_line: &str, headers: &Headers, body: Option<&str>) -> Result<Bytes> {
    let encoded = match body {
        Some(b) => charset::encode_body(b, headers.get("Content-Type"))?,
        None => Vec::new(),
    };

    let mut head = String::with_capacity(256);
    head.push_str(start_line);
    head.push_str("\r\n");
    for (key, value) in headers.iter() {
        if same_header(key, "Content-Length") {
            continue;
        }
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", encoded.len()));

    let mut out = head.into_bytes();
    out.extend_from_slice(&encoded);
    Ok(Bytes::from(out))
}

fn split_message(data: &[u8]) -> Result<(String, Headers, Option<String>)> {
    let (head, body) = match find_subslice(data, b"\r\n\r\n") {
        Some(pos) => (&data[..pos], &data[pos + 4..]),
        None => match find_subslice(data, b"\n\n") {
            Some(pos) => (&data[..pos], &data[pos + 2..]),
            None => (data, &data[data.len()..]),
        },
    };

    let head = String::from_utf8_lossy(head);
    let mut lines = head.lines();
    let start_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| GbError::Decode("Empty SIP message".to_string()))?
        .to_string();

    let mut headers = Headers::new();
    let mut last: Option<(String, String)> = None;
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            // 折行
            if let Some((_, value)) = last.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((k, v)) = last.take() {
            headers.add(k, v);
        }
        if let Some((key, value)) = line.split_once(':') {
            last = Some((key.trim().to_string(), value.trim().to_string()));
        }
    }
    if let Some((k, v)) = last {
        headers.add(k, v);
    }

    let body = match headers.get("Content-Length").and_then(|l| l.trim().parse::<usize>().ok()) {
        Some(len) if len <= body.len() => &body[..len],
        _ => body,
    };

    let body = if body.is_empty() {
        None
    } else {
        Some(charset::decode_body(body, headers.get("Content-Type"))?)
    };

    Ok((start_line, headers, body))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_register() -> SipRequest {
        let mut req = SipRequest::new(SipMethod::Register, "sip:34020000002000000001@3402000000");
        req.add_header("Via", "SIP/2.0/UDP 192.168.1.100:5060;rport;branch=z9hG4bK123");
        req.add_header("From", "<sip:34020000001320000001@3402000000>;tag=abc");
        req.add_header("To", "<sip:34020000001320000001@3402000000>");
        req.add_header("Call-ID", "123456789@192.168.1.100");
        req.add_header("CSeq", "1 REGISTER");
        req
    }

    #[test]
    fn test_request_rendering_keeps_order() {
        let text = String::from_utf8(sample_register().to_bytes().unwrap().to_vec()).unwrap();

        assert!(text.starts_with("REGISTER sip:34020000002000000001@3402000000 SIP/2.0\r\n"));
        let via = text.find("Via:").unwrap();
        let from = text.find("From:").unwrap();
        let cseq = text.find("CSeq:").unwrap();
        assert!(via < from && from < cseq);
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn test_request_parsing() {
        let raw = "REGISTER sip:34020000002000000001@192.168.1.100:5060 SIP/2.0\r\n\
                   v: SIP/2.0/UDP 192.168.1.100:5060;branch=z9hG4bKabc\r\n\
                   From: <sip:34020000001320000001@3402000000>;tag=t1\r\n\
                   To: <sip:34020000001320000001@3402000000>\r\n\
                   call-id: 123456789@192.168.1.100\r\n\
                   CSeq: 7 REGISTER\r\n\
                   Content-Length: 0\r\n\
                   \r\n";

        let req = SipRequest::parse(raw.as_bytes()).unwrap();

        assert_eq!(req.method, SipMethod::Register);
        assert_eq!(req.uri, "sip:34020000002000000001@192.168.1.100:5060");
        assert_eq!(req.via_branch(), Some("z9hG4bKabc"));
        assert_eq!(req.call_id(), Some("123456789@192.168.1.100"));
        assert_eq!(req.cseq(), Some((7, "REGISTER")));
        assert_eq!(req.from_tag(), Some("t1"));
        assert_eq!(req.to_tag(), None);
        assert!(req.body.is_none());
    }

    #[test]
    fn test_gb_body_content_length() {
        let mut req = sample_register();
        req.method = SipMethod::Message;
        let xml = "<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n<Name>通道</Name>\r\n";
        req.set_body(xml, "Application/MANSCDP+xml");

        let wire = req.to_bytes().unwrap();
        let text = String::from_utf8_lossy(&wire);
        // 每个汉字 GB 编码 2 字节
        let expected_len = xml.len() - 2;
        assert!(text.contains(&format!("Content-Length: {}\r\n", expected_len)));

        let parsed = SipRequest::parse(&wire).unwrap();
        assert_eq!(parsed.body.as_deref(), Some(xml));
    }

    #[test]
    fn test_response_from_request() {
        let mut req = sample_register();
        req.add_header("Via", "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKproxy");

        let resp = SipResponse::from_request(&req, 200, "OK").with_to_tag("srv");
        assert_eq!(resp.headers.get_all("Via").count(), 2);
        assert_eq!(resp.to_tag(), Some("srv"));
        assert_eq!(resp.cseq(), Some((1, "REGISTER")));

        let wire = resp.to_bytes().unwrap();
        let parsed = SipMessage::parse(&wire).unwrap();
        match parsed {
            SipMessage::Response(r) => {
                assert_eq!(r.status_code, 200);
                assert_eq!(r.reason_phrase, "OK");
                assert!(r.is_success());
                assert_eq!(r.via_branch(), Some("z9hG4bK123"));
            }
            SipMessage::Request(_) => panic!("expected response"),
        }
    }

    #[test]
    fn test_header_set_replaces() {
        let mut headers = Headers::new();
        headers.add("Via", "a");
        headers.add("From", "f");
        headers.add("via", "b");
        headers.set("VIA", "c");

        assert_eq!(headers.get_all("Via").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_uri_user() {
        assert_eq!(uri_user("<sip:34020000001320000001@3402000000>;tag=1"), Some("34020000001320000001"));
        assert_eq!(uri_user("sip:34020000001320000001@10.0.0.1:5060"), Some("34020000001320000001"));
        assert_eq!(uri_user("<sip:@host>"), None);
        assert_eq!(uri_user("garbage"), None);
    }

    #[test]
    fn test_invalid_messages() {
        assert!(SipRequest::parse(b"").is_err());
        assert!(SipRequest::parse(b"FOO sip:a@b SIP/2.0\r\n\r\n").is_err());
        assert!(SipResponse::parse(b"SIP/2.0 abc OK\r\n\r\n").is_err());
    }
}
