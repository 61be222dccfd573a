//! 范围请求客户端
//!
//! 核心只依赖 [`RangeClient`] 接口：探测文件信息 (期望 200) 和
//! 按 `Range: bytes=<start>-<end>` 打开字节流 (期望 206)。
//! 状态码由调用方校验，实现方只负责如实返回。

pub mod reqwest_client;

pub use reqwest_client::ReqwestRangeClient;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use regex::Regex;
use std::time::Duration;

use crate::error::DownloadError;

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP 状态码
    pub status: u16,
    /// Content-Length
    pub content_length: Option<u64>,
    /// Content-Disposition 原始值
    pub content_disposition: Option<String>,
    /// 重定向后的最终地址
    pub final_url: String,
}

/// 字节流
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// 范围请求响应
pub struct RangeResponse {
    /// HTTP 状态码
    pub status: u16,
    /// 响应体字节流
    pub body: ByteStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// 范围请求客户端接口
///
/// 连接阶段的失败映射为 `MalformedUrl` / `UnknownHost` / `ConnectIo`，
/// 流读取阶段的失败以 `io::Error` 形式出现在 `body` 中
#[async_trait]
pub trait RangeClient: Send + Sync {
    /// 探测文件名和大小
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, DownloadError>;

    /// 打开 `[start, end]` 闭区间的字节流
    async fn open_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
        timeout: Duration,
    ) -> Result<RangeResponse, DownloadError>;
}

/// Range 请求头的值
pub fn range_header(start: u64, end: u64) -> String {
    format!("bytes={}-{}", start, end)
}

/// 从 Content-Disposition 解析文件名（支持引号、裸值和百分号编码）
pub fn file_name_from_disposition(disposition: &str) -> Option<String> {
    // filename*=UTF-8''x 优先于 filename="x"
    let re = Regex::new(r#"(?i)filename\*?\s*=\s*(?:UTF-8'[^']*')?(?:"([^"]*)"|([^;\s]+))"#).ok()?;
    let mut best = None;
    for caps in re.captures_iter(disposition) {
        let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
        let decoded = urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        let name = sanitize_file_name(&decoded);
        if name.is_empty() {
            continue;
        }
        let extended = caps.get(0).map(|m| m.as_str().contains('*')).unwrap_or(false);
        if extended {
            return Some(name);
        }
        best.get_or_insert(name);
    }
    best
}

/// 从 URL 路径的最后一个非空段解析文件名
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    let name = sanitize_file_name(&decoded);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// 解析文件名：Content-Disposition 优先，其次是最终 URL
pub fn resolve_file_name(probe: &ProbeResponse) -> Result<String, DownloadError> {
    probe
        .content_disposition
        .as_deref()
        .and_then(file_name_from_disposition)
        .or_else(|| file_name_from_url(&probe.final_url))
        .ok_or_else(|| DownloadError::FileNameMissing(probe.final_url.clone()))
}

/// 解析文件大小，缺失或为 0 视为无效
pub fn resolve_file_size(probe: &ProbeResponse) -> Result<u64, DownloadError> {
    match probe.content_length {
        Some(len) if len > 0 => Ok(len),
        other => Err(DownloadError::FileSizeInvalid(format!(
            "{}: Content-Length={:?}",
            probe.final_url, other
        ))),
    }
}

/// 去掉路径分隔符，防止写出保存目录
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    match base {
        "." | ".." => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(disposition: Option<&str>, url: &str, len: Option<u64>) -> ProbeResponse {
        ProbeResponse {
            status: 200,
            content_length: len,
            content_disposition: disposition.map(str::to_string),
            final_url: url.to_string(),
        }
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, 1023), "bytes=0-1023");
        assert_eq!(range_header(5, 5), "bytes=5-5");
    }

    #[test]
    fn test_file_name_from_disposition() {
        assert_eq!(
            file_name_from_disposition(r#"attachment; filename="report 2024.pdf""#),
            Some("report 2024.pdf".to_string())
        );
        assert_eq!(
            file_name_from_disposition("attachment; filename=data.zip"),
            Some("data.zip".to_string())
        );
        // 百分号编码
        assert_eq!(
            file_name_from_disposition("attachment; filename=%E4%B8%AD%E6%96%87.txt"),
            Some("中文.txt".to_string())
        );
        // RFC 5987 扩展形式优先
        assert_eq!(
            file_name_from_disposition(
                r#"attachment; filename="fallback.txt"; filename*=UTF-8''%E6%96%87%E4%BB%B6.txt"#
            ),
            Some("文件.txt".to_string())
        );
        assert_eq!(file_name_from_disposition("inline"), None);
        // 不允许路径穿越
        assert_eq!(
            file_name_from_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("http://example.com/files/app-release.apk?token=1"),
            Some("app-release.apk".to_string())
        );
        assert_eq!(
            file_name_from_url("http://example.com/a/my%20file.bin/"),
            Some("my file.bin".to_string())
        );
        assert_eq!(file_name_from_url("http://example.com/"), None);
        assert_eq!(file_name_from_url("not a url"), None);
    }

    #[test]
    fn test_resolve_name_and_size() {
        let p = probe(Some("attachment; filename=a.bin"), "http://x.com/b.bin", Some(10));
        assert_eq!(resolve_file_name(&p).unwrap(), "a.bin");
        assert_eq!(resolve_file_size(&p).unwrap(), 10);

        let p = probe(None, "http://x.com/b.bin", Some(0));
        assert_eq!(resolve_file_name(&p).unwrap(), "b.bin");
        assert!(matches!(
            resolve_file_size(&p),
            Err(DownloadError::FileSizeInvalid(_))
        ));

        let p = probe(None, "http://x.com/", None);
        assert!(matches!(
            resolve_file_name(&p),
            Err(DownloadError::FileNameMissing(_))
        ));
    }
}
