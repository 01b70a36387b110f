use serde::{Deserialize, Serialize};
use std::error::Error;

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 載荷在簽署前會先經過 [`validate`](PayloadT::validate)，
/// 以免把明顯錯誤的內容送往憑證機構。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 驗證載荷資料是否符合預期的規範。
    ///
    /// # 錯誤
    ///
    /// 若驗證失敗，則回傳對應的錯誤。
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 註冊帳戶的載荷（`new-reg`）。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewRegPayload {
    resource: String,
    agreement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<Vec<String>>,
}

impl NewRegPayload {
    /// 建立註冊載荷。
    ///
    /// 傳入的 `email` 會自動補足 `mailto:` 前綴，若已包含則不重複補充；
    /// 未提供時不送出 `contact` 欄位。
    pub fn new(agreement: Option<String>, email: Option<&str>) -> Self {
        let contact = email.map(|email| {
            if email.starts_with("mailto:") {
                vec![email.to_string()]
            } else {
                vec![format!("mailto:{}", email)]
            }
        });

        NewRegPayload {
            resource: "new-reg".to_string(),
            agreement,
            contact,
        }
    }
}

impl PayloadT for NewRegPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(contact) = &self.contact {
            if contact.iter().any(|c| c.len() <= "mailto:".len()) {
                return Err("Contact email must not be empty".into());
            }
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述授權所涵蓋的主機名稱。
#[derive(Debug, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

/// 為單一網域請求授權的載荷（`new-authz`）。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAuthzPayload {
    resource: String,
    identifier: Identifier,
}

impl NewAuthzPayload {
    pub fn new(domain: &str) -> Self {
        NewAuthzPayload {
            resource: "new-authz".to_string(),
            identifier: Identifier {
                type_: "dns".to_string(),
                value: domain.to_string(),
            },
        }
    }
}

impl PayloadT for NewAuthzPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.identifier.value.is_empty() {
            return Err("Identifier value must not be empty".into());
        }
        Ok(())
    }
}

/// 通知憑證機構挑戰已就緒的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeReadyPayload {
    resource: String,
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengeReadyPayload {
    pub fn new(key_authorization: &str) -> Self {
        ChallengeReadyPayload {
            resource: "challenge".to_string(),
            key_authorization: key_authorization.to_string(),
        }
    }
}

impl PayloadT for ChallengeReadyPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.key_authorization.contains('.') {
            return Err("Key authorization must be <token>.<thumbprint>".into());
        }
        Ok(())
    }
}

/// 提交 CSR 以取得憑證的載荷（`new-cert`），`csr` 為 DER 的 URL-safe Base64。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewCertPayload {
    resource: String,
    csr: String,
}

impl NewCertPayload {
    pub fn new(csr_b64url: impl Into<String>) -> Self {
        NewCertPayload {
            resource: "new-cert".to_string(),
            csr: csr_b64url.into(),
        }
    }
}

impl PayloadT for NewCertPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.csr.is_empty() {
            return Err("CSR must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reg_payload() {
        let payload = NewRegPayload::new(
            Some("https://ca.test/terms/v1".to_string()),
            Some("admin@example.com"),
        );
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"resource":"new-reg","agreement":"https://ca.test/terms/v1","contact":["mailto:admin@example.com"]}"#
        );
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_new_reg_without_contact() {
        let payload = NewRegPayload::new(None, None);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"resource":"new-reg","agreement":null}"#
        );
    }

    #[test]
    fn test_mailto_not_duplicated() {
        let payload = NewRegPayload::new(None, Some("mailto:a@b.c"));
        assert_eq!(payload.contact, Some(vec!["mailto:a@b.c".to_string()]));

        let empty = NewRegPayload::new(None, Some(""));
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_new_authz_payload() {
        let payload = NewAuthzPayload::new("example.com");
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"resource":"new-authz","identifier":{"type":"dns","value":"example.com"}}"#
        );
        assert!(NewAuthzPayload::new("").validate().is_err());
    }

    #[test]
    fn test_challenge_ready_payload() {
        let payload = ChallengeReadyPayload::new("tok.thumb");
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"resource":"challenge","keyAuthorization":"tok.thumb"}"#
        );
        assert!(ChallengeReadyPayload::new("tok").validate().is_err());
    }
}
