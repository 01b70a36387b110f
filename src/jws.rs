//! 此模組負責建立每一則協議訊息所需的 JWS 信封：
//! 未受保護的 `header`、含新鮮 nonce 的 `protected`、`payload` 與 `signature`。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    crypto::{CryptoError, CryptoProvider},
    jwk::Jwk,
    nonce::{NonceError, NonceT},
};

/// JWS 信封所使用的簽名演算法。
pub const ALGORITHM: &str = "RS256";

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    /// 無法取得 nonce 時回傳此錯誤。
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    /// 簽名失敗時回傳此錯誤，此時不會發送任何請求。
    #[error("Signature error: {0}")]
    Signature(#[from] CryptoError),
    /// 當 JSON 序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwsError>;

/// URL-safe、無填充的 Base64 編碼。
pub fn b64url(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 未受保護的標頭：`{"alg": "RS256", "jwk": {...}}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    pub jwk: Jwk,
}

impl JwsHeader {
    pub fn new(jwk: Jwk) -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            jwk,
        }
    }
}

/// 受保護的標頭：未受保護標頭加上 nonce 與額外欄位。
#[derive(Debug, Serialize, Deserialize)]
pub struct ProtectedHeader {
    #[serde(flatten)]
    pub header: JwsHeader,
    pub nonce: String,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// 一則已簽署的請求，序列化後即為 POST 本體。
#[derive(Debug, Serialize, Deserialize)]
pub struct SignedRequest {
    pub header: JwsHeader,
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl SignedRequest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 簽名所涵蓋的確切位元組：`protected64.payload64`。
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.protected, self.payload)
    }
}

/// JWS 信封建構器。
///
/// 持有帳戶的 JWK 標頭；每次 [`build`](Self::build) 都會向 nonce 來源
/// 取得一個新值，nonce 不會被快取或重複使用。
pub struct Envelope<'a> {
    crypto: &'a dyn CryptoProvider,
    nonce: &'a dyn NonceT,
    header: JwsHeader,
}

impl<'a> Envelope<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider, nonce: &'a dyn NonceT, jwk: Jwk) -> Self {
        Self {
            crypto,
            nonce,
            header: JwsHeader::new(jwk),
        }
    }

    pub fn header(&self) -> &JwsHeader {
        &self.header
    }

    pub fn build<P: Serialize>(&self, payload: &P) -> Result<SignedRequest> {
        self.build_with(payload, Map::new())
    }

    /// 建立信封，`extras` 會併入受保護標頭。
    ///
    /// # 錯誤
    ///
    /// nonce 取得失敗或簽名失敗時回傳 [`JwsError`]。
    pub fn build_with<P: Serialize>(
        &self,
        payload: &P,
        extras: Map<String, Value>,
    ) -> Result<SignedRequest> {
        let payload64 = b64url(serde_json::to_vec(payload)?);

        let protected = ProtectedHeader {
            header: self.header.clone(),
            nonce: self.nonce.get()?,
            extras,
        };
        let protected64 = b64url(serde_json::to_vec(&protected)?);

        let signing_input = format!("{}.{}", protected64, payload64);
        let signature = self.crypto.sign(signing_input.as_bytes())?;

        Ok(SignedRequest {
            header: self.header.clone(),
            protected: protected64,
            payload: payload64,
            signature: b64url(signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use openssl::{hash::MessageDigest, pkey::PKey, rsa::Rsa, sign::Verifier};
    use serde_json::json;

    use super::*;
    use crate::{
        crypto::{OpensslProvider, PublicKeyParams},
        nonce::MockNonce,
    };

    fn decode(s: &str) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(s).unwrap()
    }

    fn fixture() -> (Rsa<openssl::pkey::Private>, OpensslProvider) {
        let rsa = Rsa::generate(2048).unwrap();
        let pem = PKey::from_rsa(rsa.clone()).unwrap().private_key_to_pem_pkcs8().unwrap();
        (rsa, OpensslProvider::from_pem(&pem).unwrap())
    }

    #[test]
    fn test_signature_covers_protected_dot_payload() -> Result<()> {
        let (rsa, provider) = fixture();
        let nonce = MockNonce::new("n");
        let envelope = Envelope::new(&provider, &nonce, Jwk::new(&provider).unwrap());

        let request = envelope.build(&json!({"resource": "new-reg"}))?;

        let public = PKey::public_key_from_pem(&rsa.public_key_to_pem().unwrap()).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public).unwrap();
        verifier.update(request.signing_input().as_bytes()).unwrap();
        assert!(verifier.verify(&decode(&request.signature)).unwrap());
        Ok(())
    }

    #[test]
    fn test_each_build_consumes_a_distinct_nonce() -> Result<()> {
        let (_, provider) = fixture();
        let nonce = MockNonce::new("n");
        let envelope = Envelope::new(&provider, &nonce, Jwk::new(&provider).unwrap());

        let first = envelope.build(&json!({"a": 1}))?;
        let second = envelope.build(&json!({"a": 1}))?;

        let first: Value = serde_json::from_slice(&decode(&first.protected))?;
        let second: Value = serde_json::from_slice(&decode(&second.protected))?;
        assert_eq!(first["nonce"], "n-1");
        assert_eq!(second["nonce"], "n-2");
        assert_eq!(first["jwk"], second["jwk"]);
        assert_eq!(nonce.issued(), 2);
        Ok(())
    }

    #[test]
    fn test_envelope_layout() -> Result<()> {
        let (_, provider) = fixture();
        let nonce = MockNonce::new("n");
        let jwk = Jwk::new(&provider).unwrap();
        let envelope = Envelope::new(&provider, &nonce, jwk.clone());

        let mut extras = Map::new();
        extras.insert("url".to_string(), json!("https://ca.test/acme/new-reg"));
        let request = envelope.build_with(&json!({"resource": "new-reg"}), extras)?;
        let body: Value = serde_json::from_str(&request.to_json()?)?;

        assert_eq!(body["header"]["alg"], "RS256");
        assert_eq!(body["header"]["jwk"], serde_json::to_value(&jwk)?);
        assert!(!request.protected.contains('='));
        assert!(!request.payload.contains('='));

        let protected: Value = serde_json::from_slice(&decode(&request.protected))?;
        assert_eq!(protected["alg"], "RS256");
        assert_eq!(protected["url"], "https://ca.test/acme/new-reg");
        assert_eq!(
            decode(&request.payload),
            br#"{"resource":"new-reg"}"#.to_vec()
        );
        Ok(())
    }

    struct BrokenSigner;

    impl CryptoProvider for BrokenSigner {
        fn public_key_params(&self) -> std::result::Result<PublicKeyParams, CryptoError> {
            Ok(PublicKeyParams {
                modulus: vec![1],
                exponent: 3,
            })
        }

        fn sign(&self, _input: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Err(CryptoError::SigningError("key unavailable".into()))
        }

        fn parse_csr(&self, _csr: &[u8]) -> std::result::Result<String, CryptoError> {
            unreachable!()
        }

        fn csr_to_der(&self, _csr: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            unreachable!()
        }
    }

    #[test]
    fn test_signing_failure_fails_build() {
        let nonce = MockNonce::new("n");
        let envelope = Envelope::new(&BrokenSigner, &nonce, Jwk::new(&BrokenSigner).unwrap());
        assert!(matches!(
            envelope.build(&json!({})),
            Err(JwsError::Signature(_))
        ));
    }
}
