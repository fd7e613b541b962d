//! 目录布局
//!
//! 所有路径都是基础目录的纯函数，不持有任何可变状态：
//! - {base}/index            插件索引
//! - {base}/bin              插件可执行文件的符号链接
//! - {base}/store/{plugin}   插件安装目录
//! - {tmp}/castpm-downloads  临时下载目录

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::types::InstallError;
use crate::config::{Settings, DOWNLOAD_DIR_NAME, SELF_PLUGIN_NAME};

/// 插件目录布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base: PathBuf,
    tmp: PathBuf,
}

impl Paths {
    /// 以系统临时目录作为下载目录
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_temp(base, std::env::temp_dir())
    }

    pub fn with_temp(base: impl Into<PathBuf>, tmp: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            tmp: tmp.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_temp(settings.root.clone(), settings.temp_dir.clone())
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// 插件索引仓库所在目录
    ///
    /// e.g. {IndexPath}/plugins/{plugin}.yaml
    pub fn index_path(&self) -> PathBuf {
        self.base.join("index")
    }

    /// 插件可执行文件符号链接所在目录，需要加入 $PATH
    pub fn bin_path(&self) -> PathBuf {
        self.base.join("bin")
    }

    /// 共享的临时下载目录，按插件划分子目录由调用方完成
    pub fn download_path(&self) -> PathBuf {
        self.tmp.join(DOWNLOAD_DIR_NAME)
    }

    pub fn install_path(&self) -> PathBuf {
        self.base.join("store")
    }

    pub fn plugin_install_path(&self, plugin: &str) -> PathBuf {
        self.install_path().join(plugin)
    }

    pub fn plugin_version_install_path(&self, plugin: &str, version: &str) -> PathBuf {
        self.install_path().join(plugin).join(version)
    }
}

/// 词法规范化路径：去掉 `.`，折叠 `..`，不访问文件系统
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // 根目录之上没有父目录
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn absolute(path: &Path) -> Option<PathBuf> {
    std::path::absolute(path).ok().map(|p| normalize_path(&p))
}

/// 判断 `candidate` 是否位于 `base` 之下
///
/// 两个路径都会先转换为绝对路径并规范化。返回相对于 `base` 的路径段，
/// `candidate == base` 时返回空列表。
pub fn is_sub_path(base: &Path, candidate: &Path) -> Option<Vec<String>> {
    let base = absolute(base)?;
    let candidate = absolute(candidate)?;
    let rest = candidate.strip_prefix(&base).ok()?;
    Some(
        rest.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect(),
    )
}

/// 解析一层符号链接
///
/// 非符号链接返回规范化后的原路径；相对路径的符号链接视为错误。
pub fn realpath(path: &Path) -> Result<PathBuf, InstallError> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| InstallError::fs("读取路径信息失败", path, e))?;

    if !meta.file_type().is_symlink() {
        return Ok(normalize_path(path));
    }

    let target = fs::read_link(path).map_err(|e| InstallError::fs("读取符号链接失败", path, e))?;
    if !target.is_absolute() {
        return Err(InstallError::fs(
            "符号链接指向相对路径",
            path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("relative link target {}", target.display()),
            ),
        ));
    }
    Ok(normalize_path(&target))
}

/// 返回当前运行的 castpm 版本
///
/// 若 `execution_path` 解析后不在 `{install_path}/castpm/{version}/...` 之下，
/// 说明 castpm 不是以插件方式运行，返回 `None`。
pub fn executed_version<F>(
    install_path: &Path,
    execution_path: &Path,
    resolver: F,
) -> Result<Option<String>, InstallError>
where
    F: Fn(&Path) -> Result<PathBuf, InstallError>,
{
    let current = resolver(execution_path)?;
    let plugin_root = install_path.join(SELF_PLUGIN_NAME);

    match is_sub_path(&plugin_root, &current) {
        Some(elems) if elems.len() >= 2 => {
            debug!("当前运行的 {} 版本: {}", SELF_PLUGIN_NAME, elems[0]);
            Ok(Some(elems[0].clone()))
        }
        _ => Ok(None),
    }
}
