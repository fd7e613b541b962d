//! 插件安装器核心实现
//!
//! 安装流程: 检查已安装 → 解析下载目标 → 下载校验 → 解压 → 移动 → 链接
//!
//! bin 目录中的符号链接是唯一的安装记录，没有额外的注册表。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::downloader::{download, verifier_for, Fetcher, HttpFetcher};
use super::extractor::extract_archive;
use super::file_ops::{apply_file_operations, move_to_install_dir};
use super::link::{find_installed_version, link_path, remove_link_if_exists, replace_link};
use super::paths::{is_sub_path, Paths};
use super::types::{
    BatchReport, InstallError, InstallOutcome, InstallStage, InstalledSummary, RemoveOutcome,
};
use crate::config::SELF_PLUGIN_NAME;
use crate::logger::redact_uri;
use crate::plugin::{DownloadTarget, PluginDescriptor};

/// 插件安装器
///
/// 同一目录布局上的操作需要调用方串行执行。
pub struct PluginInstaller {
    paths: Paths,
    fetcher: Box<dyn Fetcher>,
}

/// 单次安装使用的临时目录，离开作用域时删除
struct DownloadDir {
    root: PathBuf,
}

impl DownloadDir {
    fn create(root: PathBuf) -> Result<Self, InstallError> {
        if root.exists() {
            debug!("删除残留的下载目录 {}", root.display());
            fs::remove_dir_all(&root)
                .map_err(|e| InstallError::fs("删除残留的下载目录失败", &root, e))?;
        }
        fs::create_dir_all(&root)
            .map_err(|e| InstallError::fs("创建下载目录失败", &root, e))?;
        Ok(Self { root })
    }

    fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }
}

impl Drop for DownloadDir {
    fn drop(&mut self) {
        let mut result = fs::remove_dir_all(&self.root);
        if matches!(&result, Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied) {
            // 归档中的只读目录会阻止删除，恢复属主权限后重试
            restore_owner_access(&self.root);
            result = fs::remove_dir_all(&self.root);
        }
        match result {
            Ok(()) => debug!("已清理下载目录 {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("清理下载目录 {} 失败: {}", self.root.display(), e),
        }
    }
}

/// 递归地给目录加上 u+rwx
#[cfg(unix)]
fn restore_owner_access(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = fs::symlink_metadata(dir) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }
    let mode = meta.permissions().mode() | 0o700;
    let _ = fs::set_permissions(dir, fs::Permissions::from_mode(mode));
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            restore_owner_access(&entry.path());
        }
    }
}

#[cfg(not(unix))]
fn restore_owner_access(_dir: &Path) {}

impl PluginInstaller {
    /// 创建使用 HTTP 下载的安装器
    pub fn new(paths: Paths) -> Result<Self, InstallError> {
        Ok(Self::with_fetcher(paths, Box::new(HttpFetcher::new()?)))
    }

    pub fn with_fetcher(paths: Paths, fetcher: Box<dyn Fetcher>) -> Self {
        Self { paths, fetcher }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// 当前处于链接状态的版本
    pub fn installed_version(&self, name: &str) -> Result<Option<String>, InstallError> {
        find_installed_version(&self.paths, name)
    }

    /// 安装插件
    ///
    /// 已有版本处于链接状态时直接返回 `AlreadyInstalled`，不做任何修改。
    pub fn install(
        &self,
        descriptor: &PluginDescriptor,
        force_head: bool,
    ) -> Result<InstallOutcome, InstallError> {
        let name = descriptor.name.as_str();

        debug!("[{}] {}", InstallStage::CheckInstalled, name);
        if let Some(version) = self.installed_version(name)? {
            info!("插件 {} 已安装 (版本 {})", name, version);
            return Ok(InstallOutcome::AlreadyInstalled { version });
        }

        debug!("[{}] {}", InstallStage::ResolveTarget, name);
        let target = descriptor.download_target(force_head)?;
        info!(
            "安装插件 {} 版本 {} ({})",
            name,
            target.version,
            redact_uri(&target.uri)
        );

        let link = self.install_target(name, &target)?;

        debug!("[{}] {}", InstallStage::Done, name);
        info!("插件 {} 安装完成: {}", name, link.display());
        Ok(InstallOutcome::Installed {
            version: target.version,
            link,
        })
    }

    fn install_target(&self, name: &str, target: &DownloadTarget) -> Result<PathBuf, InstallError> {
        let workdir = DownloadDir::create(self.paths.download_path().join(name))?;
        let archive_dir = workdir.archive_dir();
        let staging_dir = workdir.staging_dir();

        debug!("[{}] {}", InstallStage::Download, name);
        if target.is_head() {
            warn!("插件 {} 使用 HEAD 安装，跳过校验和检查", name);
        }
        let mut verifier = verifier_for(target.checksum.as_deref());
        let (body, size) = download(&target.uri, verifier.as_mut(), self.fetcher.as_ref())?;

        // 校验通过后才会解压
        debug!("[{}] {} -> {}", InstallStage::Extract, name, archive_dir.display());
        fs::create_dir_all(&archive_dir)
            .map_err(|e| InstallError::fs("创建解压目录失败", &archive_dir, e))?;
        extract_archive(&target.uri, &archive_dir, body, size)?;

        debug!("[{}] {}", InstallStage::Move, name);
        fs::create_dir_all(&staging_dir)
            .map_err(|e| InstallError::fs("创建暂存目录失败", &staging_dir, e))?;
        apply_file_operations(&archive_dir, &staging_dir, &target.files)?;

        let version_dir = self.paths.plugin_version_install_path(name, &target.version);
        let binary = contained_binary(&version_dir, &target.bin)?;
        move_to_install_dir(&staging_dir, &version_dir)?;

        debug!("[{}] {}", InstallStage::Link, name);
        let link = link_path(&self.paths, name);
        replace_link(&binary, &link)?;
        Ok(link)
    }

    /// 卸载插件及其所有版本
    pub fn remove(&self, name: &str) -> Result<RemoveOutcome, InstallError> {
        if name == SELF_PLUGIN_NAME {
            return Err(InstallError::ProtectedOperation(format!(
                "不能通过自身卸载 {}",
                SELF_PLUGIN_NAME
            )));
        }

        let Some(version) = self.installed_version(name)? else {
            info!("插件 {} 未安装", name);
            return Ok(RemoveOutcome::NotInstalled);
        };

        info!("卸载插件 {} (版本 {})", name, version);
        remove_link_if_exists(&link_path(&self.paths, name))?;

        let plugin_dir = self.paths.plugin_install_path(name);
        match fs::remove_dir_all(&plugin_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("插件目录 {} 不存在", plugin_dir.display());
            }
            Err(e) => return Err(InstallError::fs("删除插件目录失败", &plugin_dir, e)),
        }
        Ok(RemoveOutcome::Removed { version })
    }

    /// 依次安装多个插件
    ///
    /// 单个插件失败不会中断后续安装，失败记录在报告中。
    pub fn install_batch(
        &self,
        descriptors: &[PluginDescriptor],
        force_head: bool,
    ) -> Result<BatchReport, InstallError> {
        if force_head && descriptors.len() > 1 {
            return Err(InstallError::InvalidDescriptor(
                "HEAD 安装一次只能指定一个插件".to_string(),
            ));
        }

        let mut report = BatchReport::default();
        for descriptor in descriptors {
            match self.install(descriptor, force_head) {
                Ok(InstallOutcome::Installed { version, .. }) => {
                    if let Some(caveats) = descriptor.caveats.as_deref() {
                        info!("插件 {} 注意事项:\n{}", descriptor.name, caveats);
                    }
                    report.installed.push(InstalledSummary {
                        name: descriptor.name.clone(),
                        version,
                        caveats: descriptor.caveats.clone(),
                    });
                }
                Ok(InstallOutcome::AlreadyInstalled { .. }) => {
                    report.skipped.push(descriptor.name.clone());
                }
                Err(e) => {
                    warn!("安装插件 {} 失败: {}", descriptor.name, e);
                    report.failed.push((descriptor.name.clone(), e));
                }
            }
        }

        info!(
            "批量安装完成: 成功 {}, 跳过 {}, 失败 {}",
            report.installed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// 可执行文件必须位于版本目录之内
fn contained_binary(version_dir: &Path, bin: &str) -> Result<PathBuf, InstallError> {
    let binary = version_dir.join(bin);
    match is_sub_path(version_dir, &binary) {
        Some(elems) if !elems.is_empty() => Ok(super::paths::normalize_path(&binary)),
        _ => Err(InstallError::Security(format!(
            "可执行文件路径 {:?} 越出安装目录 {}",
            bin,
            version_dir.display()
        ))),
    }
}
