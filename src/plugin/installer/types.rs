//! 插件安装器类型定义
//!
//! 定义安装相关的错误类型、安装/卸载结果和批量安装报告

use std::path::{Path, PathBuf};
use thiserror::Error;

/// 安装错误类型
///
/// 所有错误都会原样返回给调用方，安装器本身只记录日志
#[derive(Error, Debug)]
pub enum InstallError {
    /// 下载失败（网络或读取错误）
    #[error("下载失败 {uri}: {message}")]
    Fetch { uri: String, message: String },

    /// 校验和不匹配
    #[error("校验和不匹配: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// 不支持的归档格式或归档条目类型
    #[error("不支持的格式: {0}")]
    UnsupportedFormat(String),

    /// 文件系统操作失败
    #[error("{context} ({}): {source}", .path.display())]
    Filesystem {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 路径越界
    #[error("安全检查失败: {0}")]
    Security(String),

    /// 受保护的操作
    #[error("操作不允许: {0}")]
    ProtectedOperation(String),

    /// 插件描述无效
    #[error("插件描述无效: {0}")]
    InvalidDescriptor(String),

    /// 清单指向的可执行文件在解压目录中不存在
    #[error("无法创建符号链接, 解压后的归档中找不到可执行文件 {}", .0.display())]
    MissingBinary(PathBuf),

    /// 批量安装中部分插件失败
    #[error("部分插件安装失败: {0:?}")]
    BatchFailed(Vec<String>),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Verification,
    UnsupportedFormat,
    Filesystem,
    Security,
    ProtectedOperation,
    Other,
}

impl InstallError {
    /// 包装一个带路径上下文的 IO 错误
    pub fn fs(context: impl Into<String>, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        InstallError::Filesystem {
            context: context.into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Fetch { .. } => ErrorKind::Fetch,
            InstallError::ChecksumMismatch { .. } => ErrorKind::Verification,
            InstallError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            InstallError::Filesystem { .. } | InstallError::MissingBinary(_) => {
                ErrorKind::Filesystem
            }
            InstallError::Security(_) => ErrorKind::Security,
            InstallError::ProtectedOperation(_) => ErrorKind::ProtectedOperation,
            InstallError::InvalidDescriptor(_)
            | InstallError::BatchFailed(_)
            | InstallError::Config(_) => ErrorKind::Other,
        }
    }
}

/// 安装阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    CheckInstalled,
    ResolveTarget,
    Download,
    Extract,
    Move,
    Link,
    Done,
}

impl std::fmt::Display for InstallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallStage::CheckInstalled => write!(f, "check-installed"),
            InstallStage::ResolveTarget => write!(f, "resolve-target"),
            InstallStage::Download => write!(f, "download"),
            InstallStage::Extract => write!(f, "extract"),
            InstallStage::Move => write!(f, "move"),
            InstallStage::Link => write!(f, "link"),
            InstallStage::Done => write!(f, "done"),
        }
    }
}

/// 安装结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// 新安装完成
    Installed {
        version: String,
        /// bin 目录中的符号链接
        link: PathBuf,
    },
    /// 已有版本处于链接状态，未做任何修改
    AlreadyInstalled { version: String },
}

/// 卸载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { version: String },
    NotInstalled,
}

/// 批量安装中单个插件的成功记录
#[derive(Debug, Clone)]
pub struct InstalledSummary {
    pub name: String,
    pub version: String,
    pub caveats: Option<String>,
}

/// 批量安装报告
#[derive(Debug, Default)]
pub struct BatchReport {
    pub installed: Vec<InstalledSummary>,
    /// 已安装而跳过的插件
    pub skipped: Vec<String>,
    pub failed: Vec<(String, InstallError)>,
}

impl BatchReport {
    pub fn failed_names(&self) -> Vec<String> {
        self.failed.iter().map(|(name, _)| name.clone()).collect()
    }

    /// 有任何插件失败时转换为 `BatchFailed`
    pub fn into_result(self) -> Result<BatchReport, InstallError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(InstallError::BatchFailed(self.failed_names()))
        }
    }
}
