// MANSCDP 消息体字符集转换
//
// 国标 XML 消息体按 GB2312/GBK/GB18030 编码传输（声明多为 GB2312），
// 内部统一使用 UTF-8。GB18030 是前两者的超集，收发都按它处理；
// XML 声明为 UTF-8 时按 UTF-8 解码。

use crate::error::{GbError, Result};
use encoding_rs::GB18030;

/// 是否为需要 GB 字符集的消息体
pub fn is_manscdp(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("manscdp") || ct.contains("xml")
        })
        .unwrap_or(false)
}

/// 读取 XML 声明里的 encoding
pub fn declared_encoding(xml: &[u8]) -> Option<String> {
    let head_len = xml.len().min(128);
    let head = String::from_utf8_lossy(&xml[..head_len]);
    let decl_end = head.find("?>")?;
    let decl = &head[..decl_end];
    let start = decl.find("encoding=")? + "encoding=".len();
    let quote = decl[start..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &decl[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

pub fn encode_gb18030(text: &str) -> Result<Vec<u8>> {
    let (bytes, _, had_errors) = GB18030.encode(text);
    if had_errors {
        return Err(GbError::Charset("text not representable in GB18030".to_string()));
    }
    Ok(bytes.into_owned())
}

pub fn decode_gb18030(bytes: &[u8]) -> Result<String> {
    let (text, had_errors) = GB18030.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(GbError::Charset("malformed GB18030 sequence".to_string()));
    }
    Ok(text.into_owned())
}

/// 按 Content-Type 编码消息体
pub fn encode_body(body: &str, content_type: Option<&str>) -> Result<Vec<u8>> {
    if !is_manscdp(content_type) {
        return Ok(body.as_bytes().to_vec());
    }

    match declared_encoding(body.as_bytes()) {
        Some(enc) if enc.eq_ignore_ascii_case("utf-8") => Ok(body.as_bytes().to_vec()),
        _ => encode_gb18030(body),
    }
}

/// 按 Content-Type 解码消息体
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Result<String> {
    if !is_manscdp(content_type) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|e| GbError::Charset(format!("body is not UTF-8: {}", e)));
    }

    match declared_encoding(bytes) {
        Some(enc) if enc.eq_ignore_ascii_case("utf-8") => String::from_utf8(bytes.to_vec())
            .map_err(|e| GbError::Charset(format!("body is not UTF-8: {}", e))),
        _ => decode_gb18030(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML_CT: Option<&str> = Some("Application/MANSCDP+xml");

    #[test]
    fn test_declared_encoding() {
        let xml = br#"<?xml version="1.0" encoding="GB2312"?><Query/>"#;
        assert_eq!(declared_encoding(xml).as_deref(), Some("GB2312"));
        assert_eq!(declared_encoding(b"<Query/>"), None);
    }

    #[test]
    fn test_chinese_body_uses_gb() {
        let xml = "<?xml version=\"1.0\" encoding=\"GB2312\"?>\n<Name>通道1</Name>";
        let bytes = encode_body(xml, XML_CT).unwrap();

        // "通" 的 GBK 编码为 CD A8
        assert!(bytes.windows(2).any(|w| w == [0xCD, 0xA8]));
        assert_ne!(bytes, xml.as_bytes());
        assert_eq!(decode_body(&bytes, XML_CT).unwrap(), xml);
    }

    #[test]
    fn test_utf8_declaration_is_respected() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Name>通道1</Name>";
        let bytes = encode_body(xml, XML_CT).unwrap();
        assert_eq!(bytes, xml.as_bytes());
        assert_eq!(decode_body(&bytes, XML_CT).unwrap(), xml);
    }

    #[test]
    fn test_sdp_is_untouched() {
        let sdp = "v=0\r\n";
        assert_eq!(encode_body(sdp, Some("application/sdp")).unwrap(), sdp.as_bytes());
        assert!(decode_body(&[0xFF, 0xFE], Some("application/sdp")).is_err());
    }
}
