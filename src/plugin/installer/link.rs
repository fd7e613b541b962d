//! 符号链接管理
//!
//! bin 目录下每个已链接的插件对应一个符号链接，链接目标所在的版本目录
//! 即为当前生效的版本。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::paths::{is_sub_path, realpath, Paths};
use super::types::InstallError;
use crate::config::HOST_COMMAND_PREFIX;

pub fn is_windows() -> bool {
    cfg!(windows)
}

/// 插件名对应的链接文件名
///
/// 连字符替换为下划线，加上宿主命令前缀，Windows 下追加 `.exe`。
pub fn plugin_name_to_bin(name: &str, is_windows: bool) -> String {
    let mut bin = format!("{}-{}", HOST_COMMAND_PREFIX, name.replace('-', "_"));
    if is_windows {
        bin.push_str(".exe");
    }
    bin
}

pub fn link_path(paths: &Paths, plugin: &str) -> PathBuf {
    paths.bin_path().join(plugin_name_to_bin(plugin, is_windows()))
}

/// 路径处是否已有符号链接
///
/// 不存在时返回 `false`；存在但不是符号链接时报错，不覆盖用户文件。
fn existing_link(path: &Path) -> Result<bool, InstallError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            trace!("{} 处没有文件", path.display());
            return Ok(false);
        }
        Err(e) => return Err(InstallError::fs("读取符号链接失败", path, e)),
    };

    if !meta.file_type().is_symlink() {
        return Err(InstallError::fs(
            "文件不是符号链接",
            path,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("unexpected file type {:?}", meta.file_type()),
            ),
        ));
    }
    Ok(true)
}

/// 删除已存在的符号链接
///
/// 路径不存在时什么也不做；存在但不是符号链接时报错。
pub fn remove_link_if_exists(path: &Path) -> Result<(), InstallError> {
    if !existing_link(path)? {
        return Ok(());
    }
    fs::remove_file(path).map_err(|e| InstallError::fs("删除符号链接失败", path, e))?;
    trace!("已删除符号链接 {}", path.display());
    Ok(())
}

/// 创建指向 `binary` 的符号链接
///
/// `binary` 必须存在，清单指向不存在的文件属于打包错误。
pub fn create_link(binary: &Path, link: &Path) -> Result<(), InstallError> {
    if !binary.exists() {
        return Err(InstallError::MissingBinary(binary.to_path_buf()));
    }

    debug!("创建符号链接 {} -> {}", link.display(), binary.display());
    symlink(binary, link).map_err(|e| InstallError::fs("创建符号链接失败", link, e))?;
    Ok(())
}

/// 用指向 `binary` 的新链接替换 `link`
///
/// 先在同一目录创建临时链接，再 rename 覆盖旧链接，任何时刻 `link` 都指向
/// 旧版本或新版本之一。
pub fn replace_link(binary: &Path, link: &Path) -> Result<(), InstallError> {
    if let Some(dir) = link.parent() {
        fs::create_dir_all(dir).map_err(|e| InstallError::fs("创建 bin 目录失败", dir, e))?;
    }
    existing_link(link)?;

    let file_name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = link.with_file_name(format!(".{}.tmp", file_name));
    remove_link_if_exists(&tmp)?;
    create_link(binary, &tmp)?;

    if let Err(e) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(InstallError::fs("替换符号链接失败", link, e));
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

/// 通过 bin 目录中的链接查找插件当前生效的版本
///
/// 没有链接时返回 `None`；链接指向安装目录之外时报错。
pub fn find_installed_version(paths: &Paths, plugin: &str) -> Result<Option<String>, InstallError> {
    let link = link_path(paths, plugin);
    match fs::symlink_metadata(&link) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(InstallError::fs("读取插件链接失败", &link, e)),
    }

    let target = realpath(&link)?;
    let elems = is_sub_path(&paths.install_path(), &target).ok_or_else(|| {
        InstallError::fs(
            "插件链接未指向安装目录",
            &link,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("link target {}", target.display()),
            ),
        )
    })?;

    // {install}/{plugin}/{version}/...
    match elems.as_slice() {
        [name, version, _, ..] if name == plugin => Ok(Some(version.clone())),
        _ => Err(InstallError::fs(
            "插件链接指向的版本目录无效",
            &link,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("link target {}", target.display()),
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plugin_name_to_bin() {
        assert_eq!(plugin_name_to_bin("foo", false), "proxycast-foo");
        assert_eq!(plugin_name_to_bin("foo-bar", false), "proxycast-foo_bar");
        assert_eq!(plugin_name_to_bin("foo-bar", true), "proxycast-foo_bar.exe");
        assert_eq!(plugin_name_to_bin("a-b-c", true), "proxycast-a_b_c.exe");
    }

    #[test]
    fn test_remove_link_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(remove_link_if_exists(&dir.path().join("nothing")).is_ok());
    }

    #[test]
    fn test_remove_link_refuses_regular_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("proxycast-foo");
        fs::write(&file, b"user binary").unwrap();

        let err = remove_link_if_exists(&file).unwrap_err();
        assert!(matches!(err, InstallError::Filesystem { .. }));
        assert!(file.exists());
    }

    #[test]
    fn test_create_link_missing_binary() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("proxycast-foo");
        let err = create_link(&dir.path().join("missing"), &link).unwrap_err();
        assert!(matches!(err, InstallError::MissingBinary(_)));
        assert!(fs::symlink_metadata(&link).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_replace_link() {
        let dir = TempDir::new().unwrap();
        let v1 = dir.path().join("v1");
        let v2 = dir.path().join("v2");
        fs::write(&v1, b"1").unwrap();
        fs::write(&v2, b"2").unwrap();
        let link = dir.path().join("bin").join("proxycast-foo");

        replace_link(&v1, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), v1);

        replace_link(&v2, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), v2);
        assert_eq!(fs::read(&link).unwrap(), b"2");
        assert_eq!(fs::read_dir(dir.path().join("bin")).unwrap().count(), 1);
    }

    #[test]
    fn test_replace_link_refuses_regular_file() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("v1");
        fs::write(&binary, b"1").unwrap();
        let link = dir.path().join("bin").join("proxycast-foo");
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        fs::write(&link, b"user binary").unwrap();

        let err = replace_link(&binary, &link).unwrap_err();
        assert!(matches!(err, InstallError::Filesystem { .. }));
        assert_eq!(fs::read(&link).unwrap(), b"user binary");
        assert_eq!(fs::read_dir(dir.path().join("bin")).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_replace_link_missing_binary_keeps_old_link() {
        let dir = TempDir::new().unwrap();
        let v1 = dir.path().join("v1");
        fs::write(&v1, b"1").unwrap();
        let link = dir.path().join("bin").join("proxycast-foo");
        replace_link(&v1, &link).unwrap();

        let err = replace_link(&dir.path().join("missing"), &link).unwrap_err();
        assert!(matches!(err, InstallError::MissingBinary(_)));
        assert_eq!(fs::read(&link).unwrap(), b"1");
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_dangling_link() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("gone"), &link).unwrap();
        remove_link_if_exists(&link).unwrap();
        assert!(fs::symlink_metadata(&link).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_installed_version() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_temp(dir.path(), dir.path().join("tmp"));
        assert_eq!(find_installed_version(&paths, "foo-bar").unwrap(), None);

        let version_dir = paths.plugin_version_install_path("foo-bar", "v1.2.3");
        fs::create_dir_all(&version_dir).unwrap();
        let binary = version_dir.join("foo");
        fs::write(&binary, b"#!/bin/sh").unwrap();
        replace_link(&binary, &link_path(&paths, "foo-bar")).unwrap();

        assert_eq!(
            find_installed_version(&paths, "foo-bar").unwrap().as_deref(),
            Some("v1.2.3")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_find_installed_version_foreign_link() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_temp(dir.path(), dir.path().join("tmp"));
        let elsewhere = dir.path().join("elsewhere");
        fs::write(&elsewhere, b"x").unwrap();
        replace_link(&elsewhere, &link_path(&paths, "foo")).unwrap();

        assert!(find_installed_version(&paths, "foo").is_err());
    }
}
