//! 受 nonce 保護的簽署請求。
//!
//! 每次 [`SignedTransport::send`] 都會建立新的 JWS 信封、POST 到目標 URL，
//! 並僅依數字狀態碼對照 [`StatusTable`] 分類回應。

use thiserror::Error;

use crate::{
    http::{HttpClient, HttpResponse, TransportError},
    jws::{Envelope, JwsError},
    observer::{Observer, ProgressEvent},
    payload::PayloadT,
};

/// 格式正確、但狀態碼不在預期表中的回應。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context}: {code} {body}")]
pub struct ProtocolError {
    pub context: String,
    pub code: u16,
    pub body: String,
}

impl ProtocolError {
    pub fn from_response(context: impl Into<String>, response: &HttpResponse) -> Self {
        Self {
            context: context.into(),
            code: response.status,
            body: response.text(),
        }
    }
}

/// 發送簽署請求時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

type Result<T> = std::result::Result<T, SendError>;

/// 預期狀態碼對照表：狀態碼對應一個可選的進度事件，
/// 沒有事件的項目代表靜默成功。
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    entries: Vec<(u16, Option<ProgressEvent>)>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只接受單一狀態碼、且不回報進度的表。
    pub fn silent(code: u16) -> Self {
        Self::new().expect(code, None)
    }

    pub fn expect(mut self, code: u16, event: Option<ProgressEvent>) -> Self {
        self.entries.push((code, event));
        self
    }

    /// 查詢狀態碼；不在表中時回傳 `None`。
    pub fn lookup(&self, code: u16) -> Option<Option<&ProgressEvent>> {
        self.entries
            .iter()
            .find(|(expected, _)| *expected == code)
            .map(|(_, event)| event.as_ref())
    }
}

/// 簽署請求的傳輸器。
pub struct SignedTransport<'a> {
    http: &'a dyn HttpClient,
    envelope: Envelope<'a>,
    observer: &'a dyn Observer,
}

impl<'a> SignedTransport<'a> {
    pub fn new(http: &'a dyn HttpClient, envelope: Envelope<'a>, observer: &'a dyn Observer) -> Self {
        Self {
            http,
            envelope,
            observer,
        }
    }

    pub fn http(&self) -> &'a dyn HttpClient {
        self.http
    }

    pub fn observer(&self) -> &'a dyn Observer {
        self.observer
    }

    /// 簽署並發送 `payload`，依 `expected` 分類回應。
    ///
    /// 無論狀態碼為何都會讀取回應本體；不在表中的狀態碼會回傳
    /// [`ProtocolError`]，其訊息以 `context` 開頭並附上狀態碼與本體。
    ///
    /// # 錯誤
    ///
    /// 載荷驗證失敗、nonce 或簽名失敗、傳輸失敗、或狀態碼不符預期時回傳 [`SendError`]。
    pub fn send<P: PayloadT>(
        &self,
        url: &str,
        payload: &P,
        expected: &StatusTable,
        context: &str,
    ) -> Result<HttpResponse> {
        payload
            .validate()
            .map_err(|e| SendError::InvalidPayload(e.to_string()))?;

        let signed = self.envelope.build(payload)?;
        let response = self.http.post(url, signed.to_json()?)?;
        tracing::debug!(url, status = response.status, "signed request completed");

        match expected.lookup(response.status) {
            Some(event) => {
                if let Some(event) = event {
                    self.observer.notify(event);
                }
                Ok(response)
            }
            None => Err(ProtocolError::from_response(context, &response).into()),
        }
    }
}
