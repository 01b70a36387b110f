use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use regex::Regex;
use thiserror::Error;

use crate::{
    http::TransportError,
    jws::b64url,
    observer::ProgressEvent,
    payload::NewCertPayload,
    transport::{ProtocolError, SendError, SignedTransport, StatusTable},
};

/// 憑證簽發成功時的狀態碼。
pub const STATUS_CREATED: u16 = 201;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const PEM_LINE_WIDTH: usize = 64;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error(transparent)]
    Request(#[from] SendError),
    #[error("Failed to fetch intermediate certificate: {0}")]
    Intermediate(#[from] TransportError),
    #[error(transparent)]
    IntermediateStatus(#[from] ProtocolError),
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

/// 自定義結果型別，錯誤類型為 `CertificateError`
type Result<T> = std::result::Result<T, CertificateError>;

static UP_LINK: OnceLock<Regex> = OnceLock::new();

fn up_link_re() -> &'static Regex {
    UP_LINK.get_or_init(|| {
        Regex::new(r#"^\s*<([^>]*)>.*;\s*rel="up""#).expect("link pattern is valid")
    })
}

/// 從所有 `Link` 標頭中依序取出 `rel="up"` 的網址。
pub fn up_links<'h>(link_headers: impl IntoIterator<Item = &'h str>) -> Vec<String> {
    link_headers
        .into_iter()
        .filter_map(|header| up_link_re().captures(header))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// 有序的憑證鏈，第一個為葉憑證，其後為中繼憑證，皆為 DER。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateChain {
    entries: Vec<Vec<u8>>,
}

impl CertificateChain {
    pub fn new(entries: Vec<Vec<u8>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }

    pub fn leaf(&self) -> Option<&[u8]> {
        self.entries.first().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 以 64 欄換行的 PEM 區塊依序串接所有憑證，區塊之間沒有額外分隔。
    pub fn to_pem(&self) -> String {
        let mut out = String::new();
        for der in &self.entries {
            let encoded = STANDARD.encode(der);
            out.push_str(PEM_BEGIN);
            out.push('\n');
            for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
                out.push_str(&String::from_utf8_lossy(line));
                out.push('\n');
            }
            out.push_str(PEM_END);
            out.push('\n');
        }
        out
    }

    /// 解析 [`to_pem`](Self::to_pem) 產生的文字。
    pub fn from_pem(pem: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut current: Option<String> = None;

        for line in pem.lines().map(str::trim) {
            match (line, current.as_mut()) {
                (PEM_BEGIN, None) => current = Some(String::new()),
                (PEM_END, Some(body)) => {
                    let der = STANDARD
                        .decode(body.as_bytes())
                        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
                    entries.push(der);
                    current = None;
                }
                ("", None) => {}
                (_, Some(body)) => body.push_str(line),
                (other, None) => {
                    return Err(CertificateError::InvalidPem(format!(
                        "unexpected line outside of block: {}",
                        other
                    )))
                }
            }
        }

        if current.is_some() {
            return Err(CertificateError::InvalidPem("unterminated block".into()));
        }
        Ok(Self { entries })
    }
}

/// 簽發後的 X.509 證書封裝，用於檢視有效期限與名稱。
pub struct Certificate {
    /// 內部使用的 X509 證書對象
    pub cert: X509,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Certificate {
            cert: X509::from_der(der)?,
        })
    }

    /// 證書到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let seconds = diff.days as i64 * 86400 + diff.secs as i64;
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    pub fn subject_alt_names(&self) -> Vec<String> {
        self.cert
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| name.dnsname().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 提交 CSR 並組合憑證鏈。
pub struct CertificateAssembler<'a> {
    transport: &'a SignedTransport<'a>,
    new_cert_url: &'a str,
}

impl<'a> CertificateAssembler<'a> {
    pub fn new(transport: &'a SignedTransport<'a>, new_cert_url: &'a str) -> Self {
        Self {
            transport,
            new_cert_url,
        }
    }

    /// 送出 `new-cert`，回應本體即 DER 葉憑證。
    ///
    /// `want_chain` 為真時，依標頭順序下載每個 `rel="up"` 連結作為中繼憑證。
    ///
    /// # 錯誤
    ///
    /// 簽發請求的狀態碼不是 201、或中繼憑證下載失敗時回傳 [`CertificateError`]。
    pub fn issue(&self, csr_der: &[u8], want_chain: bool) -> Result<CertificateChain> {
        self.transport.observer().notify(&ProgressEvent::Signing);

        let response = self.transport.send(
            self.new_cert_url,
            &NewCertPayload::new(b64url(csr_der)),
            &StatusTable::silent(STATUS_CREATED),
            "Error signing certificate",
        )?;

        let mut entries = vec![response.body.clone()];

        if want_chain {
            for url in up_links(response.header_all("link")) {
                self.transport
                    .observer()
                    .notify(&ProgressEvent::FetchingIntermediate { url: url.clone() });

                let intermediate = self.transport.http().get(&url)?;
                if !intermediate.is_success() {
                    return Err(ProtocolError::from_response(
                        "Error fetching intermediate certificate",
                        &intermediate,
                    )
                    .into());
                }
                entries.push(intermediate.body);
            }
        }

        self.transport.observer().notify(&ProgressEvent::Signed);
        Ok(CertificateChain::new(entries))
    }
}
