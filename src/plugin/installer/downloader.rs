//! 插件下载器
//!
//! 一次读取下载流，同时写入内存缓冲区和校验器，读完后再校验。
//! 整个归档保存在内存中，校验通过之前不会开始解压。

use std::io::{Cursor, Read};

use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use super::types::InstallError;
use crate::logger::redact_uri;

const READ_CHUNK_SIZE: usize = 32 * 1024;

/// 获取下载内容
pub trait Fetcher {
    fn get(&self, uri: &str) -> Result<Box<dyn Read>, InstallError>;
}

/// 阻塞式 HTTP GET
///
/// 不设置超时和重试，使用 reqwest 的默认值。
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, InstallError> {
        let client = Client::builder()
            .user_agent(concat!("castpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallError::Fetch {
                uri: String::new(),
                message: format!("无法创建 HTTP 客户端: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, uri: &str) -> Result<Box<dyn Read>, InstallError> {
        let fetch_err = |message: String| InstallError::Fetch {
            uri: redact_uri(uri),
            message,
        };

        let response = self
            .client
            .get(uri)
            .send()
            .map_err(|e| fetch_err(format!("下载请求失败: {}", e)))?;

        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }

        debug!(
            "下载响应 {} ({} bytes)",
            response.status(),
            response.content_length().unwrap_or(0)
        );
        Ok(Box::new(response))
    }
}

/// 流式校验器
pub trait Verifier {
    fn consume(&mut self, chunk: &[u8]);
    fn verify(&self) -> Result<(), InstallError>;
}

/// sha256 校验器
pub struct Sha256Verifier {
    hasher: Sha256,
    expected: String,
}

impl Sha256Verifier {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            hasher: Sha256::new(),
            expected: expected.into(),
        }
    }
}

impl Verifier for Sha256Verifier {
    fn consume(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    fn verify(&self) -> Result<(), InstallError> {
        let actual = hex::encode(self.hasher.clone().finalize());
        if actual.eq_ignore_ascii_case(self.expected.trim()) {
            return Ok(());
        }
        warn!("校验和不匹配: 期望 {}, 实际 {}", self.expected, actual);
        Err(InstallError::ChecksumMismatch {
            expected: self.expected.clone(),
            actual,
        })
    }
}

/// 不做校验，用于 HEAD 安装
#[derive(Debug, Default)]
pub struct PassthroughVerifier;

impl Verifier for PassthroughVerifier {
    fn consume(&mut self, _chunk: &[u8]) {}

    fn verify(&self) -> Result<(), InstallError> {
        Ok(())
    }
}

/// 下载到内存并校验
///
/// 返回可随机访问的缓冲区及其大小。
pub fn download(
    uri: &str,
    verifier: &mut dyn Verifier,
    fetcher: &dyn Fetcher,
) -> Result<(Cursor<Vec<u8>>, u64), InstallError> {
    debug!("获取 {}", redact_uri(uri));
    let mut body = fetcher.get(uri)?;

    trace!("读取下载数据到内存");
    let mut data = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = match body.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(InstallError::Fetch {
                    uri: redact_uri(uri),
                    message: format!("读取下载内容失败: {}", e),
                })
            }
        };
        verifier.consume(&chunk[..n]);
        data.extend_from_slice(&chunk[..n]);
    }
    debug!("已读取 {} bytes 下载数据", data.len());

    verifier.verify()?;

    let size = data.len() as u64;
    Ok((Cursor::new(data), size))
}

/// 按校验和选择校验器，`None` 表示 HEAD 安装，不做校验
pub fn verifier_for(checksum: Option<&str>) -> Box<dyn Verifier> {
    match checksum {
        Some(sha256) => Box::new(Sha256Verifier::new(sha256)),
        None => Box::new(PassthroughVerifier),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Seek;

    /// 内存中的 Fetcher，按 uri 返回预置内容
    #[derive(Default)]
    pub(crate) struct MemoryFetcher {
        pub files: HashMap<String, Vec<u8>>,
    }

    impl MemoryFetcher {
        pub fn with(uri: &str, data: Vec<u8>) -> Self {
            let mut files = HashMap::new();
            files.insert(uri.to_string(), data);
            Self { files }
        }
    }

    impl Fetcher for MemoryFetcher {
        fn get(&self, uri: &str) -> Result<Box<dyn Read>, InstallError> {
            match self.files.get(uri) {
                Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
                None => Err(InstallError::Fetch {
                    uri: uri.to_string(),
                    message: "HTTP 404 Not Found".to_string(),
                }),
            }
        }
    }

    /// 读到一半出错的流
    struct BrokenReader {
        sent: bool,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    struct BrokenFetcher;

    impl Fetcher for BrokenFetcher {
        fn get(&self, _uri: &str) -> Result<Box<dyn Read>, InstallError> {
            Ok(Box::new(BrokenReader { sent: false }))
        }
    }

    pub(crate) fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[test]
    fn test_sha256_verifier_success() {
        let data = b"hello plugin";
        let mut v = Sha256Verifier::new(sha256_hex(data));
        v.consume(&data[..5]);
        v.consume(&data[5..]);
        assert!(v.verify().is_ok());
    }

    #[test]
    fn test_sha256_verifier_uppercase_expected() {
        let data = b"hello plugin";
        let mut v = Sha256Verifier::new(sha256_hex(data).to_uppercase());
        v.consume(data);
        assert!(v.verify().is_ok());
    }

    #[test]
    fn test_sha256_verifier_mismatch() {
        let mut v = Sha256Verifier::new("00".repeat(32));
        v.consume(b"hello");
        match v.verify().unwrap_err() {
            InstallError::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, "00".repeat(32));
                assert_eq!(actual, sha256_hex(b"hello"));
            }
            e => panic!("期望 ChecksumMismatch 错误，实际: {:?}", e),
        }
    }

    #[test]
    fn test_passthrough_verifier() {
        let mut v = PassthroughVerifier;
        v.consume(b"anything");
        assert!(v.verify().is_ok());
    }

    #[test]
    fn test_download_returns_random_access_buffer() {
        let data = b"0123456789".repeat(10_000);
        let fetcher = MemoryFetcher::with("mem://a.zip", data.clone());
        let mut verifier = Sha256Verifier::new(sha256_hex(&data));

        let (mut body, size) = download("mem://a.zip", &mut verifier, &fetcher).unwrap();
        assert_eq!(size, data.len() as u64);

        body.seek(std::io::SeekFrom::End(-10)).unwrap();
        let mut tail = Vec::new();
        body.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"0123456789");
    }

    #[test]
    fn test_download_fetch_error() {
        let fetcher = MemoryFetcher::default();
        let err = download("mem://missing.zip", &mut PassthroughVerifier, &fetcher).unwrap_err();
        assert!(matches!(err, InstallError::Fetch { .. }));
    }

    #[test]
    fn test_download_read_error() {
        let err = download("mem://a.zip", &mut PassthroughVerifier, &BrokenFetcher).unwrap_err();
        match err {
            InstallError::Fetch { message, .. } => assert!(message.contains("reset")),
            e => panic!("期望 Fetch 错误，实际: {:?}", e),
        }
    }

    #[test]
    fn test_verifier_for_altered_byte() {
        let data = b"not really an archive but checksummed".to_vec();
        let expected = sha256_hex(&data);

        let mut altered = data.clone();
        altered[3] ^= 0x01;
        let fetcher = MemoryFetcher::with("mem://plugin.zip", altered);

        let mut verifier = verifier_for(Some(&expected));
        let err = download("mem://plugin.zip", verifier.as_mut(), &fetcher).unwrap_err();
        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));

        let mut head = verifier_for(None);
        assert!(download("mem://plugin.zip", head.as_mut(), &fetcher).is_ok());
    }
}
