use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    crypto::{CryptoError, CryptoProvider},
    jws::b64url,
};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 無法從提供者取得公鑰參數。
    #[error("Failed to read public key: {0}")]
    KeyConversionError(#[from] CryptoError),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// RSA 格式的 JSON Web Key。
///
/// 欄位依字母順序宣告（`e`、`kty`、`n`），因此直接序列化即為計算
/// thumbprint 所需的正規化 JSON。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    e: String,
    kty: String,
    n: String,
}

impl Jwk {
    /// 根據提供者的公鑰參數建立 JWK。
    ///
    /// # 返回
    ///
    /// 成功時返回 `Jwk`，否則返回 `JwkError`。
    pub fn new(provider: &dyn CryptoProvider) -> Result<Self, JwkError> {
        let params = provider.public_key_params()?;

        Ok(Jwk {
            e: b64url(params.exponent_bytes()),
            kty: "RSA".to_string(),
            n: b64url(&params.modulus),
        })
    }

    /// 鍵依字母排序、不含空白的 JSON 表示。
    pub fn canonical_json(&self) -> Result<String, JwkError> {
        serde_json::to_string(self).map_err(JwkError::from)
    }

    /// 正規化 JSON 的 SHA-256 摘要，以 URL-safe Base64 編碼。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let hash = sha256(self.canonical_json()?.as_bytes());
        Ok(b64url(hash))
    }
}
