//! 可观测性：tracing 订阅器初始化
//!
//! 日志写到 stderr（stdout 留给回复输出），级别默认 info，可用 RUST_LOG 覆盖。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_DIRECTIVE: &str = "info";

/// 构造过滤器：RUST_LOG 优先，否则使用 default_directive
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

/// 重复初始化（如测试中）时静默忽略
pub fn init_with(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
