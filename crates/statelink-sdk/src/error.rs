use thiserror::Error;

/// 同步核心的统一错误类型
///
/// 按故障来源划分：网络瞬时故障、远端拒绝、限流、本地持久化、数据采集。
/// 子系统内任何错误都不应让宿主进程崩溃，调用方据此决定降级方式。
#[derive(Debug, Error)]
pub enum StateLinkError {
    /// 连接失败、DNS、连接被拒等瞬时网络故障
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// 远端返回非 2xx（429 除外）
    #[error("Remote rejected request with status {status}: {}", body.as_deref().unwrap_or("<empty body>"))]
    Rejected { status: u16, body: Option<String> },

    /// 远端返回 429
    #[error("Rate limited by remote on {0}")]
    RateLimited(String),

    #[error("KV store error: {0}")]
    KvStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    IO(String),

    /// 外部数据访问器失败
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl StateLinkError {
    /// 本周期跳过即可，不应修改本地状态
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StateLinkError::Transport(_) | StateLinkError::Timeout(_) | StateLinkError::RateLimited(_)
        )
    }

    /// 远端明确拒绝，本地缓存需回退到安全默认值
    pub fn is_rejection(&self) -> bool {
        matches!(self, StateLinkError::Rejected { .. })
    }

    /// HTTP 状态码（如果有）
    pub fn status(&self) -> Option<u16> {
        match self {
            StateLinkError::Rejected { status, .. } => Some(*status),
            StateLinkError::RateLimited(_) => Some(429),
            _ => None,
        }
    }
}

impl From<sled::Error> for StateLinkError {
    fn from(error: sled::Error) -> Self {
        StateLinkError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for StateLinkError {
    fn from(error: serde_json::Error) -> Self {
        StateLinkError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for StateLinkError {
    fn from(error: std::io::Error) -> Self {
        StateLinkError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for StateLinkError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            StateLinkError::Timeout(error.to_string())
        } else if error.is_decode() {
            StateLinkError::Serialization(error.to_string())
        } else {
            StateLinkError::Transport(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, StateLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StateLinkError::Timeout("read".into()).is_transient());
        assert!(StateLinkError::RateLimited("/player/update".into()).is_transient());
        assert!(!StateLinkError::KvStore("disk".into()).is_transient());

        let rejected = StateLinkError::Rejected { status: 403, body: Some("bad key".into()) };
        assert!(rejected.is_rejection());
        assert!(!rejected.is_transient());
        assert_eq!(rejected.status(), Some(403));
        assert!(rejected.to_string().contains("bad key"));

        let empty = StateLinkError::Rejected { status: 500, body: None };
        assert!(empty.to_string().contains("<empty body>"));
    }
}
