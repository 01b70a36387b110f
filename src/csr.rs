use std::{collections::BTreeSet, sync::OnceLock};

use regex::Regex;

use crate::crypto::{CryptoError, CryptoProvider};

static COMMON_NAME: OnceLock<Regex> = OnceLock::new();
static SUBJECT_ALT_NAMES: OnceLock<Regex> = OnceLock::new();

fn common_name_re() -> &'static Regex {
    COMMON_NAME.get_or_init(|| {
        Regex::new(r"Subject:.*? CN ?= ?([^\s,;/]+)").expect("common name pattern is valid")
    })
}

fn subject_alt_names_re() -> &'static Regex {
    SUBJECT_ALT_NAMES.get_or_init(|| {
        Regex::new(r"X509v3 Subject Alternative Name: ?\n +([^\n]+)\n")
            .expect("subject alternative name pattern is valid")
    })
}

/// 從 CSR 的文字描述中取出主體 CN 與所有 DNS 類型的 SAN。
///
/// 兩個來源都可能不存在，結果為兩者的聯集；空集合由呼叫端判斷是否為錯誤。
///
/// # 範例
///
/// ```
/// # use acme_http01::csr::extract_domains;
/// let dump = "Subject: C = TW, CN = example.com\n\
///             X509v3 Subject Alternative Name: \n    DNS:example.com, DNS:www.example.com\n";
/// let domains = extract_domains(dump);
/// assert!(domains.contains("www.example.com"));
/// assert_eq!(domains.len(), 2);
/// ```
pub fn extract_domains(dump: &str) -> BTreeSet<String> {
    let mut domains = BTreeSet::new();

    if let Some(cn) = common_name_re().captures(dump).and_then(|c| c.get(1)) {
        domains.insert(cn.as_str().to_string());
    }

    if let Some(sans) = subject_alt_names_re().captures(dump).and_then(|c| c.get(1)) {
        for san in sans.as_str().split(", ") {
            if let Some(name) = san.trim().strip_prefix("DNS:") {
                domains.insert(name.to_string());
            }
        }
    }

    domains
}

/// 透過密碼學提供者讀取 CSR，再取出其中的網域。
pub struct CsrInspector<'a> {
    crypto: &'a dyn CryptoProvider,
}

impl<'a> CsrInspector<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider) -> Self {
        Self { crypto }
    }

    pub fn domains(&self, csr: &[u8]) -> Result<BTreeSet<String>, CryptoError> {
        let dump = self.crypto.parse_csr(csr)?;
        Ok(extract_domains(&dump))
    }
}
