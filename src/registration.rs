use reqwest::Url;
use thiserror::Error;

use crate::{
    http::{HttpClient, TransportError},
    observer::ProgressEvent,
    payload::NewRegPayload,
    transport::{SendError, SignedTransport, StatusTable},
};

/// 新帳戶建立時的狀態碼。
pub const STATUS_CREATED: u16 = 201;
/// 帳戶已存在時的狀態碼，同樣視為成功。
pub const STATUS_CONFLICT: u16 = 409;

/// 註冊帳戶時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid CA URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to look up terms of service: {0}")]
    Terms(#[from] TransportError),
    #[error(transparent)]
    Request(#[from] SendError),
}

type Result<T> = std::result::Result<T, RegistrationError>;

/// 註冊結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    AlreadyRegistered,
}

/// 服務條款的探測位置：憑證機構主機上的 `/terms`。
pub fn terms_url(ca: &str) -> Result<String> {
    let base = Url::parse(ca).map_err(|e| RegistrationError::InvalidUrl {
        url: ca.to_string(),
        reason: e.to_string(),
    })?;
    let terms = base.join("/terms").map_err(|e| RegistrationError::InvalidUrl {
        url: ca.to_string(),
        reason: e.to_string(),
    })?;
    Ok(terms.to_string())
}

/// 以 HEAD 探測服務條款，讀取 `Location` 標頭作為同意的條款網址。
///
/// 標頭不存在時回傳 `None`，註冊載荷的 `agreement` 為 `null`。
pub fn agreement_url(http: &dyn HttpClient, ca: &str) -> Result<Option<String>> {
    let url = terms_url(ca)?;
    let response = http.head(&url)?;
    let agreement = response.header("location").map(ToString::to_string);
    tracing::debug!(terms = %url, ?agreement, "terms of service probed");
    Ok(agreement)
}

/// 帳戶註冊，每次簽發流程執行一次。
pub struct Registrar<'a> {
    transport: &'a SignedTransport<'a>,
    ca: &'a str,
    new_reg_url: &'a str,
}

impl<'a> Registrar<'a> {
    pub fn new(transport: &'a SignedTransport<'a>, ca: &'a str, new_reg_url: &'a str) -> Self {
        Self {
            transport,
            ca,
            new_reg_url,
        }
    }

    /// 送出 `new-reg`。`created` 與 `conflict` 皆視為成功。
    ///
    /// # 錯誤
    ///
    /// 條款探測失敗或回應狀態碼不在預期內時回傳 [`RegistrationError`]。
    pub fn register(&self, email: Option<&str>) -> Result<RegistrationOutcome> {
        self.transport.observer().notify(&ProgressEvent::Registering);

        let agreement = agreement_url(self.transport.http(), self.ca)?;
        let payload = NewRegPayload::new(agreement, email);
        let table = StatusTable::new()
            .expect(STATUS_CREATED, Some(ProgressEvent::Registered))
            .expect(STATUS_CONFLICT, Some(ProgressEvent::AlreadyRegistered));

        let response = self
            .transport
            .send(self.new_reg_url, &payload, &table, "Error registering")?;

        Ok(if response.status == STATUS_CONFLICT {
            RegistrationOutcome::AlreadyRegistered
        } else {
            RegistrationOutcome::Created
        })
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde_json::Value;

    use super::*;
    use crate::{
        crypto::testing::provider,
        http::testing::{response, ScriptedHttp},
        jwk::Jwk,
        jws::Envelope,
        nonce::MockNonce,
        observer::testing::RecordingObserver,
    };

    const CA: &str = "https://ca.test";
    const NEW_REG: &str = "https://ca.test/acme/new-reg";
    const TERMS: &str = "https://ca.test/terms";

    fn register(http: &ScriptedHttp, observer: &RecordingObserver) -> Result<RegistrationOutcome> {
        let crypto = provider();
        let nonce = MockNonce::new("n");
        let transport = SignedTransport::new(
            http,
            Envelope::new(&crypto, &nonce, Jwk::new(&crypto).unwrap()),
            observer,
        );
        Registrar::new(&transport, CA, NEW_REG).register(Some("admin@example.com"))
    }

    #[test]
    fn test_terms_url() -> Result<()> {
        assert_eq!(terms_url("https://acme-v01.api.letsencrypt.org")?, "https://acme-v01.api.letsencrypt.org/terms");
        assert_eq!(terms_url("http://127.0.0.1:4000/acme")?, "http://127.0.0.1:4000/terms");
        assert!(terms_url("not a url").is_err());
        Ok(())
    }

    #[test]
    fn test_register_created() -> Result<()> {
        let http = ScriptedHttp::new();
        let observer = RecordingObserver::default();
        http.on("HEAD", TERMS, response(302, &[("Location", "https://ca.test/terms/v7.pdf")], ""))
            .on("POST", NEW_REG, response(201, &[], "{}"));

        assert_eq!(register(&http, &observer)?, RegistrationOutcome::Created);
        assert_eq!(
            *observer.events.borrow(),
            vec![ProgressEvent::Registering, ProgressEvent::Registered]
        );

        let body: Value = serde_json::from_str(&http.posted_to(NEW_REG)[0]).unwrap();
        let payload = URL_SAFE_NO_PAD.decode(body["payload"].as_str().unwrap()).unwrap();
        let payload: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(payload["resource"], "new-reg");
        assert_eq!(payload["agreement"], "https://ca.test/terms/v7.pdf");
        assert_eq!(payload["contact"][0], "mailto:admin@example.com");
        Ok(())
    }

    #[test]
    fn test_register_conflict_is_success() -> Result<()> {
        let http = ScriptedHttp::new();
        let observer = RecordingObserver::default();
        http.on("HEAD", TERMS, response(302, &[("Location", "https://ca.test/terms/v7.pdf")], ""))
            .on("POST", NEW_REG, response(409, &[], r#"{"detail":"Registration key is already in use"}"#));

        assert_eq!(register(&http, &observer)?, RegistrationOutcome::AlreadyRegistered);
        assert_eq!(
            observer.events.borrow().last(),
            Some(&ProgressEvent::AlreadyRegistered)
        );
        Ok(())
    }

    #[test]
    fn test_register_without_terms_location() -> Result<()> {
        let http = ScriptedHttp::new();
        let observer = RecordingObserver::default();
        http.on("HEAD", TERMS, response(404, &[], ""))
            .on("POST", NEW_REG, response(201, &[], "{}"));

        assert_eq!(register(&http, &observer)?, RegistrationOutcome::Created);

        let body: Value = serde_json::from_str(&http.posted_to(NEW_REG)[0]).unwrap();
        let payload = URL_SAFE_NO_PAD.decode(body["payload"].as_str().unwrap()).unwrap();
        let payload: Value = serde_json::from_slice(&payload).unwrap();
        assert!(payload.as_object().unwrap().contains_key("agreement"));
        assert!(payload["agreement"].is_null());
        Ok(())
    }

    #[test]
    fn test_register_unexpected_status() {
        let http = ScriptedHttp::new();
        let observer = RecordingObserver::default();
        http.on("HEAD", TERMS, response(302, &[], ""))
            .on("POST", NEW_REG, response(400, &[], "bad nonce"));

        match register(&http, &observer) {
            Err(RegistrationError::Request(SendError::Protocol(e))) => {
                assert_eq!(e.code, 400);
                assert_eq!(e.body, "bad nonce");
                assert_eq!(e.context, "Error registering");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }
}
