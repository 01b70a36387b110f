//! 密碼學提供者。
//!
//! 帳戶金鑰的公鑰參數、簽名以及 CSR 的解析與 DER 轉換都集中在
//! [`CryptoProvider`] 之後，其餘模組只透過這個介面取得所需的位元組。

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{Id, PKey, Private},
    sign::Signer,
    x509::{X509Req, X509},
};
use thiserror::Error;

/// 密碼學操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported key algorithm: {0:?}")]
    UnsupportedAlgorithm(Id),
    #[error("Signing error: {0}")]
    SigningError(String),
    #[error("Invalid CSR: {0}")]
    InvalidCsr(String),
}

type Result<T> = std::result::Result<T, CryptoError>;

/// 帳戶公鑰的參數：大端序的模數與公開指數。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyParams {
    pub modulus: Vec<u8>,
    pub exponent: u64,
}

impl PublicKeyParams {
    /// 以最短的大端序位元組表示公開指數（例如 65537 為 `01 00 01`）。
    pub fn exponent_bytes(&self) -> Vec<u8> {
        let bytes = self.exponent.to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
        bytes[start..].to_vec()
    }
}

/// 帳戶金鑰與 CSR 相關的原始密碼學操作。
pub trait CryptoProvider {
    /// 取得帳戶金鑰的公鑰參數。
    fn public_key_params(&self) -> Result<PublicKeyParams>;

    /// 以 SHA-256 摘要搭配帳戶私鑰簽署輸入位元組。
    fn sign(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// 產生 CSR 的文字描述，格式與 `openssl req -noout -text` 相同的主體與 SAN 行。
    fn parse_csr(&self, csr: &[u8]) -> Result<String>;

    /// 將 CSR（PEM 或 DER）轉為 DER 位元組。
    fn csr_to_der(&self, csr: &[u8]) -> Result<Vec<u8>>;
}

/// 以 OpenSSL 實作的 [`CryptoProvider`]，持有一把 RSA 帳戶私鑰。
#[derive(Debug)]
pub struct OpensslProvider {
    account_key: PKey<Private>,
}

impl OpensslProvider {
    /// 從 PEM 格式的 RSA 私鑰建立提供者。
    ///
    /// # 錯誤
    ///
    /// 私鑰無法解析或不是 RSA 金鑰時回傳 [`CryptoError`]。
    pub fn from_pem(account_key_pem: &[u8]) -> Result<Self> {
        let account_key = PKey::private_key_from_pem(account_key_pem)?;
        match account_key.id() {
            Id::RSA => Ok(Self { account_key }),
            other => Err(CryptoError::UnsupportedAlgorithm(other)),
        }
    }

    fn load_csr(csr: &[u8]) -> Result<X509Req> {
        if csr.starts_with(b"-----BEGIN") {
            X509Req::from_pem(csr).map_err(|e| CryptoError::InvalidCsr(e.to_string()))
        } else {
            X509Req::from_der(csr).map_err(|e| CryptoError::InvalidCsr(e.to_string()))
        }
    }

    /// CSR 本身沒有讀取 SAN 的介面，因此把請求的擴充套用到一張未簽署的
    /// 暫時憑證上，再從中讀取 DNS 名稱。
    fn csr_dns_names(req: &X509Req) -> Result<Vec<String>> {
        let extensions = match req.extensions() {
            Ok(extensions) => extensions,
            Err(_) => return Ok(Vec::new()),
        };

        let mut builder = X509::builder()?;
        for extension in extensions {
            builder.append_extension(extension)?;
        }
        let scratch = builder.build();

        Ok(scratch
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| name.dnsname().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl CryptoProvider for OpensslProvider {
    fn public_key_params(&self) -> Result<PublicKeyParams> {
        let rsa = self.account_key.rsa()?;
        let exponent = rsa
            .e()
            .to_vec()
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

        Ok(PublicKeyParams {
            modulus: rsa.n().to_vec(),
            exponent,
        })
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.account_key)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        signer
            .update(input)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        signer
            .sign_to_vec()
            .map_err(|e| CryptoError::SigningError(e.to_string()))
    }

    fn parse_csr(&self, csr: &[u8]) -> Result<String> {
        let req = Self::load_csr(csr)?;

        let subject = req
            .subject_name()
            .entries()
            .filter_map(|entry| {
                let key = entry.object().nid().short_name().ok()?;
                let value = entry.data().as_utf8().ok()?;
                Some(format!("{} = {}", key, value))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut dump = String::from("Certificate Request:\n    Data:\n");
        dump.push_str(&format!("        Subject: {}\n", subject));

        let dns_names = Self::csr_dns_names(&req)?;
        if !dns_names.is_empty() {
            let sans = dns_names
                .iter()
                .map(|name| format!("DNS:{}", name))
                .collect::<Vec<_>>()
                .join(", ");
            dump.push_str("        Requested Extensions:\n");
            dump.push_str("            X509v3 Subject Alternative Name: \n");
            dump.push_str(&format!("                {}\n", sans));
        }

        Ok(dump)
    }

    fn csr_to_der(&self, csr: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::load_csr(csr)?.to_der()?)
    }
}


#[cfg(test)]
mod tests {
    use openssl::{nid::Nid, sign::Verifier};

    use super::*;

    #[test]
    fn test_rejects_non_rsa_key() {
        let group = openssl::ec::EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ec = openssl::ec::EcKey::generate(&group).unwrap();
        let pem = PKey::from_ec_key(ec).unwrap().private_key_to_pem_pkcs8().unwrap();

        assert!(matches!(
            OpensslProvider::from_pem(&pem),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_public_key_params() -> Result<()> {
        let provider = testing::provider();
        let params = provider.public_key_params()?;

        assert_eq!(params.exponent, 65537);
        assert_eq!(params.exponent_bytes(), vec![0x01, 0x00, 0x01]);
        assert_eq!(params.modulus.len(), 256);
        Ok(())
    }

    #[test]
    fn test_signature_verifies() -> Result<()> {
        let provider = testing::provider();
        let signature = provider.sign(b"protected.payload")?;

        let mut verifier = Verifier::new(MessageDigest::sha256(), &provider.account_key)?;
        verifier.update(b"protected.payload")?;
        assert!(verifier.verify(&signature)?);
        Ok(())
    }

    #[test]
    fn test_parse_csr_dump() -> Result<()> {
        let provider = testing::provider();
        let csr = testing::csr_pem(Some("example.com"), &["example.com", "www.example.com"]);
        let dump = provider.parse_csr(&csr)?;

        assert!(dump.contains("Subject: CN = example.com"));
        assert!(dump.contains("X509v3 Subject Alternative Name: \n"));
        assert!(dump.contains("DNS:example.com, DNS:www.example.com\n"));
        Ok(())
    }

    #[test]
    fn test_csr_to_der_accepts_pem_and_der() -> Result<()> {
        let provider = testing::provider();
        let pem = testing::csr_pem(Some("example.com"), &[]);
        let der = provider.csr_to_der(&pem)?;

        assert_eq!(der[0], 0x30);
        assert_eq!(provider.csr_to_der(&der)?, der);
        Ok(())
    }

    #[test]
    fn test_invalid_csr() {
        let provider = testing::provider();
        assert!(matches!(
            provider.csr_to_der(b"garbage"),
            Err(CryptoError::InvalidCsr(_))
        ));
    }
}
