//! 簽發流程的進入點。
//!
//! [`AcmeClient`] 依序完成：解析帳戶金鑰、解析 CSR、註冊帳戶、逐一驗證網域、
//! 簽發憑證並組合憑證鏈。任何一個網域失敗都會中止整個流程。

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    authorization::{AuthorizationError, Authorizer, CancelToken, PollPolicy},
    certificate::{Certificate, CertificateAssembler, CertificateChain, CertificateError},
    crypto::{CryptoError, CryptoProvider, OpensslProvider},
    csr::CsrInspector,
    http::{HttpClient, ReqwestClient, TransportError},
    jwk::{Jwk, JwkError},
    jws::Envelope,
    nonce::DirectoryNonce,
    observer::{Observer, ProgressEvent, TracingObserver, Verbosity},
    publisher::{ChallengePublisher, DirPublisher},
    registration::{Registrar, RegistrationError},
    transport::SignedTransport,
};

/// 預設的憑證機構（Let's Encrypt ACME v1）。
pub const DEFAULT_CA: &str = "https://acme-v01.api.letsencrypt.org";

/// 預設的 `User-Agent`。
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// 簽發流程中可能發生的所有錯誤。
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No domains found in CSR")]
    NoDomains,
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

/// 結果類型，失敗時為 [`AcmeError`]。
pub type Result<T> = std::result::Result<T, AcmeError>;

/// ACME v1 HTTP-01 用戶端。
///
/// 以 [`AcmeClient::builder`] 建立，每次呼叫 [`issue`](Self::issue) 都是一次完整的簽發流程。
pub struct AcmeClient {
    account_key_pem: Vec<u8>,
    ca: String,
    publisher: Box<dyn ChallengePublisher>,
    contact_email: Option<String>,
    chain: bool,
    observer: Box<dyn Observer>,
    poll: PollPolicy,
    cancel: CancelToken,
    http: Box<dyn HttpClient>,
}

impl AcmeClient {
    pub fn builder() -> AcmeClientBuilder {
        AcmeClientBuilder::new()
    }

    pub fn ca(&self) -> &str {
        &self.ca
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.ca, path)
    }

    /// 執行完整的簽發流程，回傳葉憑證在前的憑證鏈。
    ///
    /// `csr` 可以是 PEM 或 DER。
    ///
    /// # Errors
    ///
    /// CSR 沒有任何網域時回傳 [`AcmeError::NoDomains`]，且不會發出任何網路請求；
    /// 其餘錯誤來自註冊、授權或簽發階段。
    pub fn issue(&self, csr: &[u8]) -> Result<CertificateChain> {
        self.observer.notify(&ProgressEvent::ParsingAccountKey);
        let crypto = OpensslProvider::from_pem(&self.account_key_pem)?;
        let jwk = Jwk::new(&crypto)?;
        let thumbprint = jwk.thumbprint()?;

        self.observer.notify(&ProgressEvent::ParsingCsr);
        let domains = CsrInspector::new(&crypto).domains(csr)?;
        if domains.is_empty() {
            return Err(AcmeError::NoDomains);
        }
        let csr_der = crypto.csr_to_der(csr)?;
        tracing::debug!(?domains, "domains found in CSR");

        let nonce = DirectoryNonce::new(self.http.as_ref(), self.endpoint("/directory"));
        let transport = SignedTransport::new(
            self.http.as_ref(),
            Envelope::new(&crypto, &nonce, jwk),
            self.observer.as_ref(),
        );

        let new_reg = self.endpoint("/acme/new-reg");
        Registrar::new(&transport, &self.ca, &new_reg).register(self.contact_email.as_deref())?;

        let new_authz = self.endpoint("/acme/new-authz");
        let authorizer = Authorizer::new(&transport, self.publisher.as_ref(), &thumbprint, &new_authz)
            .poll_policy(self.poll)
            .cancel_token(self.cancel.clone());
        for domain in &domains {
            authorizer.authorize(domain)?;
        }

        let new_cert = self.endpoint("/acme/new-cert");
        let chain = CertificateAssembler::new(&transport, &new_cert).issue(&csr_der, self.chain)?;

        if let Some(leaf) = chain.leaf() {
            match Certificate::from_der(leaf).and_then(|cert| cert.not_after()) {
                Ok(not_after) => tracing::info!(%not_after, "certificate expires"),
                Err(e) => tracing::warn!(error = %e, "could not inspect issued certificate"),
            }
        }

        Ok(chain)
    }

    /// 與 [`issue`](Self::issue) 相同，但直接回傳 PEM 文字。
    pub fn get_crt(&self, csr: &[u8]) -> Result<String> {
        Ok(self.issue(csr)?.to_pem())
    }
}

/// 用於構建 [`AcmeClient`] 的構造器。
///
/// 帳戶金鑰必填；挑戰檔案目錄 `acme_dir` 與自訂的 `publisher` 至少要提供一個。
pub struct AcmeClientBuilder {
    account_key_pem: Option<Vec<u8>>,
    ca: String,
    acme_dir: Option<PathBuf>,
    publisher: Option<Box<dyn ChallengePublisher>>,
    contact_email: Option<String>,
    chain: bool,
    verbosity: Verbosity,
    observer: Option<Box<dyn Observer>>,
    poll: PollPolicy,
    cancel: CancelToken,
    http: Option<Box<dyn HttpClient>>,
    user_agent: String,
}

impl Default for AcmeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AcmeClientBuilder {
    /// 創建一個新的構造器，預設值包括：
    /// - 憑證機構：[`DEFAULT_CA`]
    /// - 輪詢間隔：2 秒，不設上限
    /// - 不附加中繼憑證
    pub fn new() -> Self {
        AcmeClientBuilder {
            account_key_pem: None,
            ca: DEFAULT_CA.to_string(),
            acme_dir: None,
            publisher: None,
            contact_email: None,
            chain: false,
            verbosity: Verbosity::default(),
            observer: None,
            poll: PollPolicy::default(),
            cancel: CancelToken::default(),
            http: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// 設置 PEM 格式的 RSA 帳戶私鑰。
    pub fn account_key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.account_key_pem = Some(pem.into());
        self
    }

    /// 設置憑證機構的基底 URL，結尾的 `/` 會被去除。
    pub fn ca(mut self, ca: &str) -> Self {
        self.ca = ca.trim_end_matches('/').to_string();
        self
    }

    /// 設置網頁伺服器提供 `/.well-known/acme-challenge/` 的本地目錄。
    pub fn acme_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.acme_dir = Some(dir.into());
        self
    }

    /// 以自訂的發佈器取代目錄發佈器。
    pub fn publisher(mut self, publisher: impl ChallengePublisher + 'static) -> Self {
        self.publisher = Some(Box::new(publisher));
        self
    }

    pub fn contact_email(mut self, email: &str) -> Self {
        self.contact_email = Some(email.to_string());
        self
    }

    /// 是否下載並附加中繼憑證。
    pub fn chain(mut self, chain: bool) -> Self {
        self.chain = chain;
        self
    }

    /// 預設觀察者的輸出詳細程度。設置了 [`observer`](Self::observer) 時不生效。
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// 單一網域輪詢的上限時間。
    pub fn poll_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.poll.timeout = timeout;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 以自訂的 HTTP 用戶端取代 `reqwest`。
    pub fn http_client(mut self, http: impl HttpClient + 'static) -> Self {
        self.http = Some(Box::new(http));
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// 根據當前的配置構建 [`AcmeClient`] 實例。
    ///
    /// # Errors
    ///
    /// 缺少帳戶金鑰、或同時缺少挑戰目錄與發佈器時回傳 [`AcmeError::Config`]；
    /// 無法建立 HTTP 用戶端時回傳 [`AcmeError::Transport`]。
    pub fn build(self) -> Result<AcmeClient> {
        let account_key_pem = self
            .account_key_pem
            .ok_or_else(|| AcmeError::Config("account key is required".to_string()))?;

        let publisher: Box<dyn ChallengePublisher> = match (self.publisher, self.acme_dir) {
            (Some(publisher), _) => publisher,
            (None, Some(dir)) => Box::new(DirPublisher::new(dir)),
            (None, None) => {
                return Err(AcmeError::Config(
                    "either acme_dir or a challenge publisher is required".to_string(),
                ))
            }
        };

        let http: Box<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Box::new(ReqwestClient::new(self.user_agent)?),
        };

        let observer: Box<dyn Observer> = match self.observer {
            Some(observer) => observer,
            None => Box::new(TracingObserver::new(self.verbosity)),
        };

        Ok(AcmeClient {
            account_key_pem,
            ca: self.ca,
            publisher,
            contact_email: self.contact_email,
            chain: self.chain,
            observer,
            poll: self.poll,
            cancel: self.cancel,
            http,
        })
    }
}
