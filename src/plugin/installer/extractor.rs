//! 归档解压
//!
//! 按下载地址的文件名后缀选择解压方式（不探测内容）：
//! - `.zip`    → ZIP
//! - `.tar.gz` → gzip + tar
//!
//! 每个条目的目标路径都必须位于目标目录之下，越界条目直接拒绝。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::paths::is_sub_path;
use super::types::InstallError;

/// git archive 等工具生成的全局 PAX 头伪条目
const PAX_GLOBAL_HEADER: &str = "pax_global_header";

/// 只保留 rwx 权限位
const PERMISSION_BITS: u32 = 0o777;

#[cfg(unix)]
const S_IFMT: u32 = 0o170000;
#[cfg(unix)]
const S_IFLNK: u32 = 0o120000;

/// 归档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// 从文件名后缀检测格式
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        if file_name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if file_name.ends_with(".tar.gz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }

    /// 从下载地址检测格式，忽略查询参数和片段
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::from_file_name(&uri_file_name(uri))
    }
}

/// 下载地址的最后一个路径段
pub fn uri_file_name(uri: &str) -> String {
    if let Ok(url) = url::Url::parse(uri) {
        if let Some(last) = url.path_segments().and_then(|mut s| s.next_back()) {
            return last.to_string();
        }
    }
    uri.rsplit('/').next().unwrap_or(uri).to_string()
}

/// 按 `uri` 的后缀解压到 `target_dir`
pub fn extract_archive<R: Read + Seek>(
    uri: &str,
    target_dir: &Path,
    reader: R,
    size: u64,
) -> Result<(), InstallError> {
    let file_name = uri_file_name(uri);
    match ArchiveFormat::from_file_name(&file_name) {
        Some(ArchiveFormat::Zip) => {
            debug!("检测到 .zip 文件 ({} bytes)", size);
            extract_zip(target_dir, reader)
        }
        Some(ArchiveFormat::TarGz) => {
            debug!("检测到 .tar.gz 文件 ({} bytes)", size);
            extract_targz(target_dir, reader)
        }
        None => Err(InstallError::UnsupportedFormat(format!(
            "无法从下载地址的文件名推断归档类型 ({:?})，仅支持 .zip 和 .tar.gz",
            file_name
        ))),
    }
}

/// 计算条目在目标目录中的位置
///
/// 同时把 `/` 和 `\` 视为分隔符，结果必须是 `target_dir` 的子路径。
pub fn entry_destination(target_dir: &Path, entry_name: &str) -> Result<PathBuf, InstallError> {
    let mut relative = PathBuf::new();
    if entry_name.starts_with('/') || entry_name.starts_with('\\') {
        relative.push(std::path::MAIN_SEPARATOR_STR);
    }
    for segment in entry_name.split(['/', '\\']).filter(|s| !s.is_empty()) {
        relative.push(segment);
    }

    let dest = target_dir.join(&relative);
    match is_sub_path(target_dir, &dest) {
        Some(_) => Ok(dest),
        None => Err(InstallError::Security(format!(
            "归档条目 {:?} 越出目标目录 {}",
            entry_name,
            target_dir.display()
        ))),
    }
}

/// 解压 ZIP 文件
///
/// ZIP 的中央目录在文件末尾，因此需要可随机访问的 reader。
pub fn extract_zip<R: Read + Seek>(target_dir: &Path, reader: R) -> Result<(), InstallError> {
    debug!("解压 zip 到 {}", target_dir.display());
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| InstallError::UnsupportedFormat(format!("无法读取 ZIP 文件: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            InstallError::UnsupportedFormat(format!("无法读取 ZIP 条目 {}: {}", i, e))
        })?;

        let name = entry.name().to_string();
        let path = entry_destination(target_dir, &name)?;
        let mode = entry.unix_mode();
        trace!("zip: 处理 {:?} (mode={:?})", name, mode.map(|m| format!("{:o}", m)));

        #[cfg(unix)]
        {
            if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                return Err(InstallError::UnsupportedFormat(format!(
                    "ZIP 条目 {:?} 是符号链接，不支持",
                    name
                )));
            }
        }

        if entry.is_dir() {
            create_dir(&path, mode.unwrap_or(0o755))?;
            continue;
        }

        // 每个条目结束时立即关闭文件句柄，避免条目过多时句柄耗尽
        write_file(&path, &mut entry, mode.unwrap_or(0o644))?;
    }

    debug!("zip 解压到 {} 完成", target_dir.display());
    Ok(())
}

/// 解压 tar.gz 文件
///
/// 只接受目录和普通文件，其他类型（符号链接、硬链接、设备文件等）整体拒绝。
pub fn extract_targz<R: Read>(target_dir: &Path, reader: R) -> Result<(), InstallError> {
    debug!("tar: 解压到 {}", target_dir.display());
    let gz = flate2::read::GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);

    let entries = archive
        .entries()
        .map_err(|e| InstallError::UnsupportedFormat(format!("无法读取 tar.gz: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| InstallError::UnsupportedFormat(format!("tar 解压错误: {}", e)))?;

        let name = entry
            .path()
            .map_err(|e| InstallError::UnsupportedFormat(format!("tar 条目路径无效: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().unwrap_or(0o644);
        trace!("tar: 处理 {:?} (type={:?}, mode={:o})", name, entry_type, mode);

        if entry_type == tar::EntryType::XGlobalHeader || name == PAX_GLOBAL_HEADER {
            trace!("tar: 跳过 pax_global_header");
            continue;
        }

        let path = entry_destination(target_dir, &name)?;
        match entry_type {
            tar::EntryType::Directory => create_dir(&path, mode)?,
            tar::EntryType::Regular => write_file(&path, &mut entry, mode)?,
            other => {
                return Err(InstallError::UnsupportedFormat(format!(
                    "无法处理 tar 中 {:?} 的条目类型 {:?}",
                    name, other
                )))
            }
        }
    }

    debug!("tar 解压到 {} 完成", target_dir.display());
    Ok(())
}

/// 只对新建的目录应用归档中的权限，已存在的目录（包括目标目录本身）保持不变
fn create_dir(path: &Path, mode: u32) -> Result<(), InstallError> {
    if path.is_dir() {
        trace!("目录 {} 已存在，不修改权限", path.display());
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| InstallError::fs("无法创建解压目录", path, e))?;
    set_mode(path, mode)
}

fn write_file<R: Read>(path: &Path, src: &mut R, mode: u32) -> Result<(), InstallError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| InstallError::fs("无法创建解压目录", parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode & PERMISSION_BITS);
    }

    let mut dst: File = options
        .open(path)
        .map_err(|e| InstallError::fs("无法在解压目录中创建文件", path, e))?;
    io::copy(src, &mut dst).map_err(|e| InstallError::fs("无法写入解压文件", path, e))?;
    drop(dst);

    set_mode(path, mode)
}

/// 显式设置权限，不受 umask 影响
///
/// setuid、setgid 和 sticky 位一律丢弃。
fn set_mode(path: &Path, mode: u32) -> Result<(), InstallError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & PERMISSION_BITS))
            .map_err(|e| InstallError::fs("无法设置文件权限", path, e))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
