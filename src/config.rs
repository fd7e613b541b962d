//! 运行配置
//!
//! 从环境变量读取基础目录和日志过滤规则：
//! - CASTPM_ROOT: 覆盖默认的 ~/.castpm
//! - CASTPM_LOG:  tracing 过滤表达式，默认 castpm=info

use std::path::PathBuf;

use tracing::debug;

use crate::plugin::installer::InstallError;

/// 覆盖基础目录的环境变量
pub const ROOT_ENV: &str = "CASTPM_ROOT";
/// 日志过滤环境变量
pub const LOG_ENV: &str = "CASTPM_LOG";
/// 插件管理工具自身的插件名，不允许通过自身卸载
pub const SELF_PLUGIN_NAME: &str = "castpm";
/// 宿主命令的子命令前缀
pub const HOST_COMMAND_PREFIX: &str = "proxycast";
/// 系统临时目录下的共享下载目录名
pub const DOWNLOAD_DIR_NAME: &str = "castpm-downloads";
/// HEAD 安装的版本标记
pub const HEAD_VERSION: &str = "HEAD";

const DEFAULT_ROOT_DIR: &str = ".castpm";
const DEFAULT_LOG_FILTER: &str = "castpm=info";

#[derive(Debug, Clone)]
pub struct Settings {
    /// 绝对路径形式的基础目录
    pub root: PathBuf,
    pub temp_dir: PathBuf,
    pub log_filter: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, InstallError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 使用自定义的变量查找函数构建配置
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InstallError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = match lookup(ROOT_ENV).filter(|v| !v.is_empty()) {
            Some(from_env) => {
                debug!("使用环境变量覆盖 {}={}", ROOT_ENV, from_env);
                PathBuf::from(from_env)
            }
            None => dirs::home_dir()
                .ok_or_else(|| InstallError::Config("无法获取用户主目录".to_string()))?
                .join(DEFAULT_ROOT_DIR),
        };

        let root = std::path::absolute(&root).map_err(|e| {
            InstallError::Config(format!("无法获取绝对路径 {}: {}", root.display(), e))
        })?;

        let log_filter = lookup(LOG_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            root,
            temp_dir: std::env::temp_dir(),
            log_filter,
        })
    }
}
