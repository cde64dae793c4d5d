// BCD 编码的终端 SIM 卡号（6 字节 / 12 位数字）

use crate::error::{FrameError, Result};

/// SIM 卡号 BCD 字节数
pub const SIM_BCD_LEN: usize = 6;

/// 数字字符串编码为 BCD，不足位数时左侧补 0
pub fn encode(digits: &str, len: usize) -> Result<Vec<u8>> {
    let max_digits = len * 2;
    if digits.len() > max_digits || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidSim(digits.to_string()));
    }

    let padded = format!("{:0>width$}", digits, width = max_digits);
    let out = padded
        .as_bytes()
        .chunks(2)
        .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
        .collect();

    Ok(out)
}

/// BCD 字节解码为数字字符串（保留前导 0）
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let hi = b >> 4;
        let lo = b & 0x0F;
        if hi > 9 || lo > 9 {
            return Err(FrameError::InvalidBcd(b));
        }
        out.push((b'0' + hi) as char);
        out.push((b'0' + lo) as char);
    }
    Ok(out)
}
