use std::cell::Cell;

use thiserror::Error;

use crate::http::{HttpClient, TransportError};

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to fetch nonce: {0}")]
    RequestFailed(#[from] TransportError),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response from {0}")]
    NoNonceHeader(String),
}

/// 定義取得 Nonce 的行為。每次呼叫都必須回傳一個尚未使用過的值。
pub trait NonceT {
    fn get(&self) -> Result<String, NonceError>;
}

/// 透過 GET 目錄資源，讀取回應中的 `Replay-Nonce` 標頭。
pub struct DirectoryNonce<'a> {
    http: &'a dyn HttpClient,
    url: String,
}

impl<'a> DirectoryNonce<'a> {
    /// # 參數
    ///
    /// * `http` - 用來發送請求的 HTTP 用戶端。
    /// * `url` - 回傳 nonce 的資源，例如 `https://acme-v01.api.letsencrypt.org/directory`。
    pub fn new(http: &'a dyn HttpClient, url: impl Into<String>) -> Self {
        DirectoryNonce {
            http,
            url: url.into(),
        }
    }
}

impl NonceT for DirectoryNonce<'_> {
    fn get(&self) -> Result<String, NonceError> {
        let response = self.http.get(&self.url)?;

        match response.header("Replay-Nonce") {
            Some(nonce) => {
                tracing::debug!(url = %self.url, "fetched fresh nonce");
                Ok(nonce.to_string())
            }
            None => Err(NonceError::NoNonceHeader(self.url.clone())),
        }
    }
}

/// 模擬 Nonce 實作，以固定前綴加上遞增序號產生互不相同的值。
#[derive(Debug)]
pub struct MockNonce {
    prefix: String,
    counter: Cell<u64>,
}

impl MockNonce {
    /// # 範例
    ///
    /// ```
    /// # use acme_http01::nonce::{MockNonce, NonceT};
    /// let mock = MockNonce::new("nonce");
    /// assert_eq!(mock.get().unwrap(), "nonce-1");
    /// assert_eq!(mock.get().unwrap(), "nonce-2");
    /// ```
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Cell::new(0),
        }
    }

    /// 已發出的 nonce 數量。
    pub fn issued(&self) -> u64 {
        self.counter.get()
    }
}

impl NonceT for MockNonce {
    fn get(&self) -> Result<String, NonceError> {
        let next = self.counter.get() + 1;
        self.counter.set(next);
        Ok(format!("{}-{}", self.prefix, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{response, ScriptedHttp};

    const DIRECTORY: &str = "https://ca.test/directory";

    #[test]
    fn test_mock_nonce_is_fresh() {
        let nonce = MockNonce::new("test-nonce");
        assert_eq!(nonce.get().unwrap(), "test-nonce-1");
        assert_eq!(nonce.get().unwrap(), "test-nonce-2");
        assert_eq!(nonce.issued(), 2);
    }

    #[test]
    fn test_directory_nonce_reads_header() {
        let http = ScriptedHttp::new();
        http.on("GET", DIRECTORY, response(200, &[("Replay-Nonce", "abc")], "{}"));

        let nonce = DirectoryNonce::new(&http, DIRECTORY);
        assert_eq!(nonce.get().unwrap(), "abc");
    }

    #[test]
    fn test_directory_nonce_missing_header() {
        let http = ScriptedHttp::new();
        http.on("GET", DIRECTORY, response(200, &[], "{}"));

        let nonce = DirectoryNonce::new(&http, DIRECTORY);
        assert!(matches!(nonce.get(), Err(NonceError::NoNonceHeader(_))));
    }
}
