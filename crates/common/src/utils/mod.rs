/// 工具函数集合

use uuid::Uuid;

/// 生成的客户端名称长度
const CLIENT_NAME_LEN: usize = 10;

/// 生成唯一 ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 生成初始客户端名称（UUID 的前 10 个字符）
pub fn generate_client_name() -> String {
    let mut name = generate_id();
    name.truncate(CLIENT_NAME_LEN);
    name
}

/// 截断过长的文本用于日志输出
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}
