use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("传输错误: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("RPC 错误: {0}")]
    Rpc(String),
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
