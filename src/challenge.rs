use serde::Deserialize;
use thiserror::Error;

/// 解析授權回應時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No {0} challenge offered")]
    NotOffered(&'static str),
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 本用戶端唯一支援的挑戰類型。
pub const HTTP_01: &str = "http-01";

/// 表示 ACME 挑戰的狀態。`pending` 與 `valid` 以外的值都視為失敗。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Valid,
    Invalid,
    Other(String),
}

impl ChallengeStatus {
    /// 根據字串返回對應的狀態，須完全相符。
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "valid" => Self::Valid,
            "invalid" => Self::Invalid,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Other(s) => s,
        }
    }
}

/// 授權中的單一挑戰。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub challenge_type: String,
    pub uri: String,
    pub token: String,
    pub status: ChallengeStatus,
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    challenges: Vec<ChallengeResponse>,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    #[serde(rename = "type")]
    challenge_type: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    status: Option<String>,
}

impl Challenge {
    /// 從 `new-authz` 的回應本體挑出 HTTP-01 挑戰。
    ///
    /// # 錯誤
    ///
    /// JSON 無法解析時回傳 [`ChallengeError::Json`]，
    /// 未提供 HTTP-01 挑戰時回傳 [`ChallengeError::NotOffered`]。
    pub fn select_http01(authorization: &[u8]) -> Result<Self> {
        let response: AuthorizationResponse = serde_json::from_slice(authorization)?;

        response
            .challenges
            .into_iter()
            .find(|c| c.challenge_type == HTTP_01)
            .map(|c| Challenge {
                challenge_type: c.challenge_type,
                uri: c.uri,
                token: c.token,
                status: ChallengeStatus::parse(c.status.as_deref().unwrap_or("pending")),
            })
            .ok_or(ChallengeError::NotOffered(HTTP_01))
    }

    /// 已淨化的 token，可安全用於檔名與 URL。
    pub fn sanitized_token(&self) -> String {
        sanitize_token(&self.token)
    }
}

/// 將 `[A-Za-z0-9_-]` 以外的字元替換為 `_`。此操作具冪等性。
pub fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<token>.<thumbprint>`，token 必須已淨化。
pub fn key_authorization(sanitized_token: &str, thumbprint: &str) -> String {
    format!("{}.{}", sanitized_token, thumbprint)
}

/// 憑證機構將探測的網址。
pub fn well_known_url(domain: &str, sanitized_token: &str) -> String {
    format!(
        "http://{}/.well-known/acme-challenge/{}",
        domain, sanitized_token
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHZ: &str = r#"{
        "identifier": {"type": "dns", "value": "example.com"},
        "status": "pending",
        "challenges": [
            {"type": "dns-01", "uri": "https://ca.test/acme/challenge/1", "token": "dnstoken", "status": "pending"},
            {"type": "http-01", "uri": "https://ca.test/acme/challenge/2", "token": "abc/def+ghi", "status": "pending"}
        ]
    }"#;

    #[test]
    fn test_select_http01() -> Result<()> {
        let challenge = Challenge::select_http01(AUTHZ.as_bytes())?;
        assert_eq!(challenge.uri, "https://ca.test/acme/challenge/2");
        assert_eq!(challenge.token, "abc/def+ghi");
        assert_eq!(challenge.status, ChallengeStatus::Pending);
        assert_eq!(challenge.sanitized_token(), "abc_def_ghi");
        Ok(())
    }

    #[test]
    fn test_missing_http01() {
        let body = r#"{"challenges": [{"type": "dns-01", "uri": "u", "token": "t"}]}"#;
        assert!(matches!(
            Challenge::select_http01(body.as_bytes()),
            Err(ChallengeError::NotOffered("http-01"))
        ));
    }

    #[test]
    fn test_sanitize_token() {
        assert_eq!(sanitize_token("Az09_-"), "Az09_-");
        assert_eq!(sanitize_token("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_token("é.x"), "__x");

        for input in ["a/b", "../..", "tok en", "ok_token-1"] {
            let once = sanitize_token(input);
            assert_eq!(sanitize_token(&once), once);
            assert_eq!(once.chars().count(), input.chars().count());
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ChallengeStatus::parse("valid"), ChallengeStatus::Valid);
        assert_eq!(ChallengeStatus::parse("pending"), ChallengeStatus::Pending);
        assert_eq!(
            ChallengeStatus::parse("VALID"),
            ChallengeStatus::Other("VALID".into())
        );
        assert_eq!(
            ChallengeStatus::parse("revoked"),
            ChallengeStatus::Other("revoked".into())
        );
        assert_eq!(ChallengeStatus::parse("revoked").as_str(), "revoked");
    }

    #[test]
    fn test_key_authorization_and_url() {
        assert_eq!(key_authorization("tok", "thumb"), "tok.thumb");
        assert_eq!(
            well_known_url("example.com", "tok"),
            "http://example.com/.well-known/acme-challenge/tok"
        );
    }
}
