//! castpm: proxycast 插件安装核心
//!
//! 从插件描述下载归档，校验后解压到版本目录，并在 bin 目录中创建
//! `proxycast-<name>` 符号链接。

pub mod config;
pub mod logger;
pub mod plugin;

pub use config::Settings;
pub use plugin::installer::{
    BatchReport, InstallError, InstallOutcome, Paths, PluginInstaller, RemoveOutcome,
};
pub use plugin::{FileOperation, PlatformTarget, PluginDescriptor};
