use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Url};
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

use super::{range_header, ProbeResponse, RangeClient, RangeResponse};
use crate::error::DownloadError;

/// 默认 User-Agent
const DEFAULT_USER_AGENT: &str = concat!("segment-dl/", env!("CARGO_PKG_VERSION"));

/// 基于 reqwest 的范围请求客户端
///
/// `timeout` 只约束连接和响应头阶段，流读取不设总超时
#[derive(Debug, Clone)]
pub struct ReqwestRangeClient {
    client: Client,
}

impl ReqwestRangeClient {
    pub fn new() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90)) // IdleConnTimeout: 90s
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(10)) // 最多 10 次重定向
            .build()
            .map_err(|e| DownloadError::ConnectIo(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { client })
    }

    /// 使用已有的 reqwest 客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// 发送请求，连接阶段的失败统一归类
    async fn send(
        &self,
        url: &str,
        range: Option<String>,
        timeout: Duration,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::MalformedUrl(format!("{}: {}", url, e)))?;
        if parsed.host_str().is_none() {
            return Err(DownloadError::MalformedUrl(format!("{}: 缺少主机名", url)));
        }

        let mut request = self.client.get(parsed);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }

        match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(classify_send_error(url, &e)),
            Err(_) => Err(DownloadError::ConnectIo(format!(
                "{}: 连接超时 ({}ms)",
                url,
                timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl RangeClient for ReqwestRangeClient {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, DownloadError> {
        // 只读取响应头，不消费响应体
        let resp = self.send(url, None, timeout).await?;

        let content_disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let probe = ProbeResponse {
            status: resp.status().as_u16(),
            content_length: resp.content_length(),
            content_disposition,
            final_url: resp.url().to_string(),
        };

        debug!(
            "探测完成: status={}, length={:?}, final_url={}",
            probe.status, probe.content_length, probe.final_url
        );
        Ok(probe)
    }

    async fn open_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
        timeout: Duration,
    ) -> Result<RangeResponse, DownloadError> {
        let resp = self.send(url, Some(range_header(start, end)), timeout).await?;
        let status = resp.status().as_u16();

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
            .boxed();

        Ok(RangeResponse { status, body })
    }
}

/// 把 reqwest 发送错误映射为错误类别
fn classify_send_error(url: &str, err: &reqwest::Error) -> DownloadError {
    if err.is_builder() {
        return DownloadError::MalformedUrl(format!("{}: {}", url, err));
    }

    if err.is_connect() && is_dns_failure(err) {
        return DownloadError::UnknownHost(format!("{}: {}", url, error_chain(err)));
    }

    DownloadError::ConnectIo(format!("{}: {}", url, error_chain(err)))
}

fn is_dns_failure(err: &reqwest::Error) -> bool {
    let chain = error_chain(err).to_lowercase();
    chain.contains("dns error")
        || chain.contains("failed to lookup address")
        || chain.contains("name or service not known")
        || chain.contains("no such host")
}

/// 展开错误链，便于日志和分类
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
