//! HTTP 傳輸層抽象。
//!
//! 所有網路往返都經過 [`HttpClient`]，回應一律以 [`HttpResponse`] 表示，
//! 無論狀態碼是否為 2xx，都會讀取完整的回應本體，由呼叫端自行分類。

use std::{sync::Arc, time::Duration};

use reqwest::{
    blocking::Client,
    header::{HeaderMap, ACCEPT, USER_AGENT},
    redirect::Policy,
};
use thiserror::Error;

/// 傳輸層錯誤：連線失敗、逾時或無法解讀的回應。
///
/// 與協議層錯誤（狀態碼不符預期）不同，這類錯誤沒有可供分類的狀態碼。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

type Result<T> = std::result::Result<T, TransportError>;

/// 一次 HTTP 往返的結果。成功與失敗的狀態碼共用同一結構。
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 以 UTF-8（有損）解讀回應本體。
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 取得第一個同名標頭的值，非 ASCII 的值視為不存在。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 依出現順序取得所有同名標頭的值（例如多個 `Link`）。
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// 將本體解析為 JSON，失敗時視為傳輸層的格式錯誤。
    pub fn json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// 阻塞式 HTTP 用戶端介面。
pub trait HttpClient {
    fn get(&self, url: &str) -> Result<HttpResponse>;

    fn head(&self, url: &str) -> Result<HttpResponse>;

    /// 以 JSON 字串作為本體發送 POST。
    fn post(&self, url: &str, body: String) -> Result<HttpResponse>;
}

impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        (**self).get(url)
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        (**self).head(url)
    }

    fn post(&self, url: &str, body: String) -> Result<HttpResponse> {
        (**self).post(url, body)
    }
}

/// 以 `reqwest` 阻塞用戶端實作的 [`HttpClient`]。
///
/// GET 與 POST 會跟隨重新導向，例如挑戰網址被導向 HTTPS 或正規主機名稱時。
/// HEAD 使用不跟隨重新導向的用戶端，以便讀取 `Location` 標頭（服務條款的探測）。
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    no_redirect: Client,
    user_agent: String,
}

impl ReqwestClient {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(user_agent: impl Into<String>) -> Result<Self> {
        Self::with_timeout(user_agent, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(user_agent: impl Into<String>, timeout: Duration) -> Result<Self> {
        let build = |policy: Policy| {
            Client::builder()
                .redirect(policy)
                .timeout(timeout)
                .build()
                .map_err(|source| TransportError::Request {
                    url: String::new(),
                    source,
                })
        };

        Ok(Self {
            client: build(Policy::default())?,
            no_redirect: build(Policy::none())?,
            user_agent: user_agent.into(),
        })
    }

    fn execute(&self, url: &str, request: reqwest::blocking::RequestBuilder) -> Result<HttpResponse> {
        let to_err = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let response = request
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "*/*")
            .send()
            .map_err(to_err)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(to_err)?.to_vec();
        tracing::debug!(url, status, bytes = body.len(), "HTTP response received");

        Ok(HttpResponse::new(status, headers, body))
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.execute(url, self.client.get(url))
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        self.execute(url, self.no_redirect.head(url))
    }

    fn post(&self, url: &str, body: String) -> Result<HttpResponse> {
        self.execute(url, self.client.post(url).body(body))
    }
}
