//! 日志初始化
//!
//! 宿主已经安装了全局 subscriber 时不会覆盖。

use tracing_subscriber::EnvFilter;

/// 未设置 RUST_LOG 时使用的过滤规则
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "statelink_sdk=debug,info"
    } else {
        "statelink_sdk=info,warn"
    }
}

/// 安装 fmt subscriber，返回是否由本次调用安装
pub fn init_logging(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
