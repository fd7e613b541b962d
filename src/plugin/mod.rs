//! 插件系统模块
//!
//! 负责插件的安装和卸载：
//! - 插件描述与下载目标解析
//! - 下载校验、解压和链接

pub mod installer;
mod types;

pub use installer::{InstallError, PluginInstaller};
pub use types::{DownloadTarget, FileOperation, PlatformTarget, PluginDescriptor};
