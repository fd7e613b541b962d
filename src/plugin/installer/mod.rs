//! 插件安装器模块
//!
//! 提供插件安装、卸载的核心功能：
//! - 下载并校验插件归档（sha256）
//! - 安全解压 ZIP / tar.gz
//! - 按文件操作把内容移动到版本目录
//! - 通过 bin 目录中的符号链接记录当前版本

mod downloader;
mod extractor;
mod file_ops;
mod installer;
mod link;
mod paths;
mod types;

pub use downloader::{
    download, verifier_for, Fetcher, HttpFetcher, PassthroughVerifier, Sha256Verifier, Verifier,
};
pub use extractor::{extract_archive, ArchiveFormat};
pub use file_ops::{apply_file_operations, move_to_install_dir};
pub use installer::PluginInstaller;
pub use link::{
    create_link, find_installed_version, link_path, plugin_name_to_bin, remove_link_if_exists,
    replace_link,
};
pub use paths::{executed_version, is_sub_path, normalize_path, realpath, Paths};
pub use types::{
    BatchReport, ErrorKind, InstallError, InstallOutcome, InstallStage, InstalledSummary,
    RemoveOutcome,
};
