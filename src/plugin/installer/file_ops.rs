//! 安装文件操作
//!
//! 按清单声明的顺序把解压目录中的内容移动到暂存目录，再把暂存目录整体
//! 移动到最终的版本目录。所有源路径和目标路径都必须分别位于解压目录和
//! 暂存目录之下。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::paths::{is_sub_path, normalize_path};
use super::types::InstallError;
use crate::plugin::FileOperation;

/// 依次执行文件操作，`src_root` 为解压目录，`dst_root` 为暂存目录
pub fn apply_file_operations(
    src_root: &Path,
    dst_root: &Path,
    ops: &[FileOperation],
) -> Result<(), InstallError> {
    for op in ops {
        debug!("执行文件操作 {:?}", op);
        match op {
            FileOperation::Move { from, to } => move_matches(src_root, dst_root, from, to)?,
            FileOperation::Rename { from, to } => rename_one(src_root, dst_root, from, to)?,
        }
    }
    Ok(())
}

fn contained(root: &Path, relative: &str, what: &str) -> Result<PathBuf, InstallError> {
    let path = normalize_path(&root.join(relative));
    match is_sub_path(root, &path) {
        Some(_) => Ok(path),
        None => Err(InstallError::Security(format!(
            "文件操作的{} {:?} 越出目录 {}",
            what,
            relative,
            root.display()
        ))),
    }
}

fn move_matches(
    src_root: &Path,
    dst_root: &Path,
    from: &str,
    to: &str,
) -> Result<(), InstallError> {
    // 先校验模式本身，避免 `..` 把匹配范围带出解压目录
    contained(src_root, from, "源路径")?;
    let dst_dir = contained(dst_root, to, "目标路径")?;

    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&src_root.to_string_lossy()),
        from
    );
    let matches = glob::glob(&pattern)
        .map_err(|e| {
            InstallError::InvalidDescriptor(format!("无效的 glob 模式 {:?}: {}", from, e))
        })?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            let source = std::io::Error::new(e.error().kind(), e.error().to_string());
            InstallError::fs("读取解压目录失败", e.path(), source)
        })?;

    if matches.is_empty() {
        return Err(InstallError::InvalidDescriptor(format!(
            "归档中没有文件匹配模式 {:?}",
            from
        )));
    }

    fs::create_dir_all(&dst_dir).map_err(|e| InstallError::fs("创建暂存目录失败", &dst_dir, e))?;
    for src in matches {
        if is_sub_path(src_root, &src).is_none() {
            return Err(InstallError::Security(format!(
                "匹配结果 {} 越出解压目录",
                src.display()
            )));
        }
        let Some(name) = src.file_name() else {
            continue;
        };
        let dst = dst_dir.join(name);
        trace!("移动 {} -> {}", src.display(), dst.display());
        rename_no_clobber(&src, &dst)?;
    }
    Ok(())
}

fn rename_one(src_root: &Path, dst_root: &Path, from: &str, to: &str) -> Result<(), InstallError> {
    let src = contained(src_root, from, "源路径")?;
    let dst = contained(dst_root, to, "目标路径")?;

    if fs::symlink_metadata(&src).is_err() {
        return Err(InstallError::InvalidDescriptor(format!(
            "归档中不存在 {:?}",
            from
        )));
    }

    // 重命名为暂存目录本身时，暂存目录必须为空
    if is_sub_path(dst_root, &dst).is_some_and(|elems| elems.is_empty()) {
        if dst.exists() {
            fs::remove_dir(&dst).map_err(|e| InstallError::fs("暂存目录非空", &dst, e))?;
        }
    } else if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| InstallError::fs("创建暂存目录失败", parent, e))?;
    }

    trace!("重命名 {} -> {}", src.display(), dst.display());
    rename_no_clobber(&src, &dst)
}

fn rename_no_clobber(src: &Path, dst: &Path) -> Result<(), InstallError> {
    if fs::symlink_metadata(dst).is_ok() {
        return Err(InstallError::fs(
            "目标路径已存在",
            dst,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file operation conflict"),
        ));
    }
    fs::rename(src, dst).map_err(|e| InstallError::fs("移动文件失败", src, e))
}

/// 把暂存目录移动到最终安装位置
///
/// 优先使用 rename；临时目录与安装目录不在同一文件系统时退回到递归复制。
/// 同一版本残留的未链接目录会被替换。
pub fn move_to_install_dir(staging: &Path, install_dir: &Path) -> Result<(), InstallError> {
    if let Some(parent) = install_dir.parent() {
        fs::create_dir_all(parent).map_err(|e| InstallError::fs("创建安装目录失败", parent, e))?;
    }
    if install_dir.exists() {
        debug!("替换残留的版本目录 {}", install_dir.display());
        fs::remove_dir_all(install_dir)
            .map_err(|e| InstallError::fs("删除残留的版本目录失败", install_dir, e))?;
    }

    match fs::rename(staging, install_dir) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("rename 失败 ({})，改为复制 {}", e, staging.display());
            if let Err(err) = copy_dir_recursive(staging, install_dir) {
                let _ = fs::remove_dir_all(install_dir);
                return Err(err);
            }
            fs::remove_dir_all(staging)
                .map_err(|e| InstallError::fs("删除暂存目录失败", staging, e))
        }
    }
}

/// 递归复制目录，保留权限
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), InstallError> {
    fs::create_dir_all(dst).map_err(|e| InstallError::fs("创建目录失败", dst, e))?;

    let entries = fs::read_dir(src).map_err(|e| InstallError::fs("读取目录失败", src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| InstallError::fs("读取目录失败", src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| InstallError::fs("读取文件类型失败", &src_path, e))?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            // fs::copy 会一并复制权限位
            fs::copy(&src_path, &dst_path)
                .map_err(|e| InstallError::fs("复制文件失败", &src_path, e))?;
        } else {
            return Err(InstallError::UnsupportedFormat(format!(
                "无法复制非普通文件 {}",
                src_path.display()
            )));
        }
    }

    let perms = fs::metadata(src)
        .map_err(|e| InstallError::fs("读取目录权限失败", src, e))?
        .permissions();
    fs::set_permissions(dst, perms).map_err(|e| InstallError::fs("设置目录权限失败", dst, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("archive");
        let dst = dir.path().join("staging");
        fs::create_dir_all(src.join("demo-v1/bin")).unwrap();
        fs::write(src.join("demo-v1/bin/demo"), b"bin").unwrap();
        fs::write(src.join("demo-v1/LICENSE"), b"license").unwrap();
        fs::write(src.join("README.md"), b"readme").unwrap();
        (dir, src, dst)
    }

    fn mv(from: &str, to: &str) -> FileOperation {
        FileOperation::Move {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn rename(from: &str, to: &str) -> FileOperation {
        FileOperation::Rename {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn test_default_moves_everything() {
        let (_dir, src, dst) = setup();
        apply_file_operations(&src, &dst, &FileOperation::default_set()).unwrap();
        assert!(dst.join("demo-v1/bin/demo").exists());
        assert!(dst.join("README.md").exists());
        assert!(!src.join("README.md").exists());
    }

    #[test]
    fn test_rename_root_folder() {
        let (_dir, src, dst) = setup();
        apply_file_operations(&src, &dst, &[rename("demo-v1", ".")]).unwrap();
        assert_eq!(fs::read(dst.join("bin/demo")).unwrap(), b"bin");
        assert!(dst.join("LICENSE").exists());
        assert!(!dst.join("README.md").exists());
    }

    #[test]
    fn test_composed_operations_in_order() {
        let (_dir, src, dst) = setup();
        apply_file_operations(
            &src,
            &dst,
            &[mv("demo-v1/bin/*", "."), mv("demo-v1/LICENSE", "doc")],
        )
        .unwrap();
        assert!(dst.join("demo").exists());
        assert!(dst.join("doc/LICENSE").exists());
    }

    #[test]
    fn test_no_match_is_error() {
        let (_dir, src, dst) = setup();
        let err = apply_file_operations(&src, &dst, &[mv("*.exe", ".")]).unwrap_err();
        assert!(matches!(err, InstallError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_escaping_operations_rejected() {
        let (_dir, src, dst) = setup();
        let err = apply_file_operations(&src, &dst, &[mv("../*", ".")]).unwrap_err();
        assert!(matches!(err, InstallError::Security(_)));

        let err = apply_file_operations(&src, &dst, &[mv("README.md", "../out")]).unwrap_err();
        assert!(matches!(err, InstallError::Security(_)));

        let err = apply_file_operations(&src, &dst, &[rename("demo-v1", "../../x")]).unwrap_err();
        assert!(matches!(err, InstallError::Security(_)));
    }

    #[test]
    fn test_conflicting_move_rejected() {
        let (_dir, src, dst) = setup();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("README.md"), b"existing").unwrap();
        let err = apply_file_operations(&src, &dst, &[mv("README.md", ".")]).unwrap_err();
        assert!(matches!(err, InstallError::Filesystem { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir_recursive_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, src, _dst) = setup();
        let bin = src.join("demo-v1/bin/demo");
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        let out = dir.path().join("copy");
        copy_dir_recursive(&src, &out).unwrap();
        let mode = fs::metadata(out.join("demo-v1/bin/demo"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read(out.join("README.md")).unwrap(), b"readme");
    }

    #[test]
    fn test_move_to_install_dir_replaces_stale() {
        let (dir, src, _dst) = setup();
        let install = dir.path().join("store/demo/v1");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("stale"), b"old").unwrap();

        move_to_install_dir(&src, &install).unwrap();
        assert!(!install.join("stale").exists());
        assert!(install.join("README.md").exists());
        assert!(!src.exists());
    }
}
