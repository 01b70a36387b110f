//! # ACME v1 HTTP-01 Certificate Client
//!
//! 本庫以 ACME v1 協議向憑證機構（例如 Let's Encrypt）申請網域驗證（DV）的 TLS 憑證，
//! 透過 HTTP-01 挑戰證明網域控制權，最後取得簽發的憑證鏈。
//!
//! ## 模組
//!
//! - **client**: 流程進入點 [`AcmeClient`] 與其構造器 [`AcmeClientBuilder`]。
//! - **crypto**: 帳戶金鑰與 CSR 的原始密碼學操作（OpenSSL）。
//! - **jwk** / **jws**: 公鑰的 JWK 表示、指紋，以及每個請求的簽名信封。
//! - **nonce**: 防重放 nonce 的來源。
//! - **http** / **transport**: HTTP 往返，以及依狀態碼表分類回應的簽名傳輸。
//! - **csr**: 從 CSR 取出通用名稱與 SAN 網域。
//! - **registration**: 帳戶註冊與服務條款探測。
//! - **challenge** / **publisher** / **authorization**: 挑戰的選擇、發佈與單一網域的授權狀態機。
//! - **certificate**: 簽發請求、中繼憑證下載與 PEM 編碼。
//! - **observer**: 進度事件，預設以 `tracing` 輸出。
//!
//! ## 示例
//!
//! ```no_run
//! use acme_http01::AcmeClient;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AcmeClient::builder()
//!         .account_key_pem(std::fs::read("account.key")?)
//!         .acme_dir("/usr/share/nginx/html/.well-known/acme-challenge/")
//!         .contact_email("admin@example.com")
//!         .chain(true)
//!         .build()?;
//!
//!     let signed = client.get_crt(&std::fs::read("domain.csr")?)?;
//!     std::fs::write("signed.crt", signed)?;
//!     Ok(())
//! }
//! ```
//!
//! 本庫不安裝任何 `tracing` subscriber，由使用端決定輸出方式。

pub mod authorization;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod crypto;
pub mod csr;
pub mod http;
pub mod jwk;
pub mod jws;
pub mod nonce;
pub mod observer;
pub mod payload;
pub mod publisher;
pub mod registration;
pub mod transport;

pub use authorization::{CancelToken, PollPolicy};
pub use certificate::{Certificate, CertificateChain};
pub use client::{AcmeClient, AcmeClientBuilder, AcmeError, DEFAULT_CA};
pub use observer::{Observer, ProgressEvent, TracingObserver, Verbosity};
pub use publisher::{ChallengePublisher, DirPublisher, MemPublisher};
