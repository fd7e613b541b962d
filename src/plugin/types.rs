//! 插件描述类型定义
//!
//! 描述由外部解析器（索引扫描、平台选择）产出，本模块只负责把它解析为
//! 一次具体的下载目标，不关心清单文件格式本身。

use serde::{Deserialize, Serialize};

use crate::config::HEAD_VERSION;
use crate::plugin::installer::InstallError;

/// 已按当前平台选定的插件描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginDescriptor {
    /// 插件名称（唯一标识）
    pub name: String,
    /// 安装后展示给用户的注意事项
    #[serde(default)]
    pub caveats: Option<String>,
    /// 当前平台的下载目标
    pub target: PlatformTarget,
}

/// 单个平台的下载信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlatformTarget {
    /// 展示版本，例如 `v1.0.0`；缺省时以校验和作为版本目录名
    #[serde(default)]
    pub version: Option<String>,
    /// 固定版本的下载地址
    #[serde(default)]
    pub uri: Option<String>,
    /// `uri` 对应归档的 sha256（十六进制）
    #[serde(default)]
    pub sha256: Option<String>,
    /// 不校验的最新版本下载地址
    #[serde(default)]
    pub head: Option<String>,
    /// 解压后移动到安装目录的文件操作，按顺序执行
    #[serde(default)]
    pub files: Vec<FileOperation>,
    /// 可执行文件相对于安装目录的路径
    pub bin: String,
}

/// 文件操作
///
/// `from` 相对于解压目录，`to` 相对于安装目录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FileOperation {
    /// 将匹配 glob 模式的所有路径移动到目标目录下
    Move { from: String, to: String },
    /// 将单个路径（文件或根目录）重命名为目标路径
    Rename { from: String, to: String },
}

impl FileOperation {
    /// 未声明文件操作时的默认行为：移动解压目录下的全部内容
    pub fn default_set() -> Vec<FileOperation> {
        vec![FileOperation::Move {
            from: "*".to_string(),
            to: ".".to_string(),
        }]
    }
}

/// 解析后的下载目标
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTarget {
    /// 版本目录名：`HEAD`、展示版本或校验和
    pub version: String,
    pub uri: String,
    /// `None` 表示不校验（HEAD 安装）
    pub checksum: Option<String>,
    pub files: Vec<FileOperation>,
    pub bin: String,
}

impl DownloadTarget {
    pub fn is_head(&self) -> bool {
        self.checksum.is_none()
    }
}

impl PluginDescriptor {
    /// 校验名称并选出下载目标
    ///
    /// `force_head` 时必须提供 HEAD 地址；否则优先使用带校验和的固定版本，
    /// 只有 HEAD 地址时退回 HEAD 安装。
    pub fn download_target(&self, force_head: bool) -> Result<DownloadTarget, InstallError> {
        validate_segment("插件名称", &self.name)?;

        let target = &self.target;
        if target.bin.trim().is_empty() {
            return Err(InstallError::InvalidDescriptor(format!(
                "插件 {} 未声明可执行文件路径 (bin)",
                self.name
            )));
        }

        let files = if target.files.is_empty() {
            FileOperation::default_set()
        } else {
            target.files.clone()
        };

        if force_head {
            let head = target.head.as_ref().ok_or_else(|| {
                InstallError::InvalidDescriptor(format!(
                    "插件 {} 未声明 HEAD 地址，无法强制 HEAD 安装",
                    self.name
                ))
            })?;
            return Ok(self.head_target(head, files));
        }

        if let Some(uri) = target.uri.as_ref() {
            let sha256 = target
                .sha256
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    InstallError::InvalidDescriptor(format!(
                        "插件 {} 的固定版本缺少 sha256",
                        self.name
                    ))
                })?;
            let version = target.version.clone().unwrap_or_else(|| sha256.clone());
            validate_segment("插件版本", &version)?;
            if version == HEAD_VERSION {
                return Err(InstallError::InvalidDescriptor(format!(
                    "插件 {} 的固定版本不能使用保留名 {}",
                    self.name, HEAD_VERSION
                )));
            }
            return Ok(DownloadTarget {
                version,
                uri: uri.clone(),
                checksum: Some(sha256.clone()),
                files,
                bin: target.bin.clone(),
            });
        }

        match target.head.as_ref() {
            Some(head) => Ok(self.head_target(head, files)),
            None => Err(InstallError::InvalidDescriptor(format!(
                "插件 {} 没有可用的下载地址",
                self.name
            ))),
        }
    }

    fn head_target(&self, head: &str, files: Vec<FileOperation>) -> DownloadTarget {
        DownloadTarget {
            version: HEAD_VERSION.to_string(),
            uri: head.to_string(),
            checksum: None,
            files,
            bin: self.target.bin.clone(),
        }
    }
}

/// 名称和版本会直接作为目录名使用，只允许单个普通路径段
fn validate_segment(what: &str, value: &str) -> Result<(), InstallError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if invalid {
        return Err(InstallError::InvalidDescriptor(format!(
            "{} 无效: {:?}",
            what, value
        )));
    }
    Ok(())
}
