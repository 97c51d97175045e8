//! 十位 62 进制 ID 生成器
//!
//! 运行时为新安装的模块分配句柄时使用。
//! ID 格式：10 位 62 进制字符串（0-9, a-z, A-Z）

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// 使用时间戳与随机数组合。
///
/// # Example
///
/// ```
/// use chips_workspace::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    // 时钟回拨时退化为纯随机数
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let random: u64 = rng.gen();
    let mut value = timestamp ^ random;

    let mut result = String::with_capacity(ID_LENGTH);
    let mut digits = [0u8; ID_LENGTH];
    for digit in digits.iter_mut().rev() {
        *digit = BASE62_CHARS[(value % 62) as usize];
        value /= 62;
    }
    for digit in digits {
        result.push(digit as char);
    }
    result
}

/// 验证 ID 格式是否有效
///
/// ```
/// use chips_workspace::utils::id::is_valid_id;
///
/// assert!(is_valid_id("a1B2c3D4e5"));
/// assert!(!is_valid_id("too-short"));
/// ```
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// 生成 UUID v4 格式的 ID
///
/// 用于运行时通知的事件 ID
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
