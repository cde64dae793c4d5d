// REGISTER Digest 鉴权（RFC 2617 / RFC 3261 22.4）

use crate::error::{GbError, Result};
use rand::Rng;
use std::collections::HashMap;

/// 固定的 nonce-count：每个质询只应答一次
pub const NONCE_COUNT: &str = "00000001";

/// WWW-Authenticate / Proxy-Authenticate 质询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// 服务端提供的 qop 选项（逗号分隔）
    pub qop: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self> {
        let rest = header.trim();
        let rest = match rest.get(..7) {
            Some(scheme) if scheme.eq_ignore_ascii_case("Digest ") => &rest[7..],
            _ => return Err(GbError::Auth(format!("unsupported auth scheme: {}", header))),
        };

        let params = parse_digest_params(rest);
        let realm = params
            .get("realm")
            .cloned()
            .ok_or_else(|| GbError::Auth("challenge without realm".to_string()))?;
        let nonce = params
            .get("nonce")
            .cloned()
            .ok_or_else(|| GbError::Auth("challenge without nonce".to_string()))?;

        if let Some(alg) = params.get("algorithm") {
            if !alg.eq_ignore_ascii_case("MD5") {
                return Err(GbError::Auth(format!("unsupported digest algorithm: {}", alg)));
            }
        }

        Ok(Self {
            realm,
            nonce,
            opaque: params.get("opaque").cloned(),
            algorithm: params.get("algorithm").cloned(),
            qop: params.get("qop").cloned(),
        })
    }

    /// 服务端是否支持 qop=auth
    pub fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
            .unwrap_or(false)
    }
}

/// Authorization 头部内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: Option<String>,
    pub opaque: Option<String>,
    /// qop=auth 时携带 cnonce / nc
    pub qop: Option<String>,
    pub cnonce: String,
    pub nc: String,
}

impl DigestCredentials {
    pub fn compute(
        challenge: &DigestChallenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> Self {
        let qop = challenge.supports_auth_qop().then(|| "auth".to_string());
        let response = compute_digest_response(
            username,
            &challenge.realm,
            password,
            method,
            uri,
            &challenge.nonce,
            qop.as_deref().map(|q| (q, NONCE_COUNT, cnonce)),
        );

        Self {
            username: username.to_string(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            uri: uri.to_string(),
            response,
            algorithm: challenge.algorithm.clone(),
            opaque: challenge.opaque.clone(),
            qop,
            cnonce: cnonce.to_string(),
            nc: NONCE_COUNT.to_string(),
        }
    }

    pub fn to_header(&self) -> String {
        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.username, self.realm, self.nonce, self.uri, self.response
        );
        if let Some(alg) = &self.algorithm {
            value.push_str(&format!(", algorithm={}", alg));
        }
        if let Some(qop) = &self.qop {
            value.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop, self.nc, self.cnonce));
        }
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        value
    }
}

/// 新的客户端随机数
pub fn generate_cnonce() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// 解析 Digest 参数为键值对（值可带引号，引号内允许逗号）
fn parse_digest_params(value: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut rest = value.trim();

    while !rest.is_empty() {
        let Some(eq_idx) = rest.find('=') else {
            break;
        };
        let key = rest[..eq_idx].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq_idx + 1..].trim_start();

        let val = if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            let val = &quoted[..end];
            rest = quoted.get(end + 1..).unwrap_or("");
            val
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let val = rest[..end].trim();
            rest = &rest[end..];
            val
        };

        map.insert(key, val.to_string());
        rest = rest.trim_start().trim_start_matches(',').trim_start();
    }

    map
}

/// 计算 Digest 响应；`qop` 为 (qop, nc, cnonce)
fn compute_digest_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
    qop: Option<(&str, &str, &str)>,
) -> String {
    let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", username, realm, password)));
    let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));

    let source = match qop {
        Some((qop, nc, cnonce)) => format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2),
        None => format!("{}:{}:{}", ha1, nonce, ha2),
    };
    format!("{:x}", md5::compute(source))
}
