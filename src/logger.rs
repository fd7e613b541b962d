//! 日志管理模块
//!
//! 库本身只通过 tracing 宏输出诊断信息，订阅器由调用方通过 [`init`] 安装。
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::EnvFilter;

/// 安装输出到 stderr 的 fmt 订阅器
///
/// `filter` 为 tracing 过滤表达式（如 `castpm=debug`），解析失败时回退到 `castpm=info`。
/// 重复调用不会报错。
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("castpm=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

static USERINFO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://[^/@\s]+@").expect("valid userinfo regex"));

static SECRET_QUERY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([?&](?:access[_-]?token|token|api[_-]?key|key|signature|sig|secret|password|x-amz-signature|x-amz-credential)=)[^&#\s]+",
    )
    .expect("valid query regex")
});

/// 对下载地址脱敏后再写入日志
///
/// 隐藏 URL 中的用户信息以及常见的凭据类查询参数（预签名 URL 等）。
pub fn redact_uri(uri: &str) -> String {
    let sanitized = USERINFO_RE.replace_all(uri, "://***@");
    SECRET_QUERY_RE
        .replace_all(&sanitized, "${1}***")
        .into_owned()
}
