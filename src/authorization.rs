//! 單一網域的授權狀態機。
//!
//! `Created → ChallengeRequested → Published → SelfVerified → Notified → Polling → {Valid | Failed}`
//!
//! 發佈的挑戰檔案在每一條離開路徑上都會被移除。

use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use serde_json::Value;
use thiserror::Error;

use crate::{
    challenge::{key_authorization, well_known_url, Challenge, ChallengeError, ChallengeStatus},
    http::TransportError,
    observer::ProgressEvent,
    payload::{ChallengeReadyPayload, NewAuthzPayload},
    publisher::{ChallengePublisher, PublishError, PublishedChallenge},
    transport::{SendError, SignedTransport, StatusTable},
};

/// 授權建立成功時憑證機構回傳的狀態碼。
pub const STATUS_CREATED: u16 = 201;
/// 挑戰通知被接受時憑證機構回傳的狀態碼。
pub const STATUS_ACCEPTED: u16 = 202;

/// 授權流程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error(transparent)]
    Request(#[from] SendError),
    #[error("No http-01 challenge offered for {domain}")]
    NoHttpChallenge { domain: String },
    #[error("Invalid authorization response: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("Wrote file to {location}, but couldn't download {url}: {reason}")]
    Verification {
        domain: String,
        location: String,
        url: String,
        reason: String,
    },
    #[error("Error checking challenge for {domain}: {source}")]
    Polling {
        domain: String,
        #[source]
        source: TransportError,
    },
    #[error("Error checking challenge for {domain}: {code} {body}")]
    PollingStatus {
        domain: String,
        code: u16,
        body: String,
    },
    #[error("{domain} challenge did not pass: {body}")]
    ChallengeFailed { domain: String, body: String },
    #[error("{domain} challenge still pending after {waited:?}")]
    Timeout { domain: String, waited: Duration },
    #[error("Verification of {domain} was cancelled")]
    Cancelled { domain: String },
}

type Result<T> = std::result::Result<T, AuthorizationError>;

/// 狀態機目前所在的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Created,
    ChallengeRequested,
    Published,
    SelfVerified,
    Notified,
    Polling,
    Valid,
    Failed,
}

/// 輪詢策略。`timeout` 為 `None` 時會一直等待 `pending` 結束。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: None,
        }
    }
}

/// 可跨執行緒觸發的取消旗標。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 驅動網域通過 HTTP-01 挑戰。
pub struct Authorizer<'a> {
    transport: &'a SignedTransport<'a>,
    publisher: &'a dyn ChallengePublisher,
    thumbprint: &'a str,
    new_authz_url: &'a str,
    policy: PollPolicy,
    cancel: CancelToken,
    state: Cell<AuthorizationState>,
}

impl<'a> Authorizer<'a> {
    pub fn new(
        transport: &'a SignedTransport<'a>,
        publisher: &'a dyn ChallengePublisher,
        thumbprint: &'a str,
        new_authz_url: &'a str,
    ) -> Self {
        Self {
            transport,
            publisher,
            thumbprint,
            new_authz_url,
            policy: PollPolicy::default(),
            cancel: CancelToken::default(),
            state: Cell::new(AuthorizationState::Created),
        }
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> AuthorizationState {
        self.state.get()
    }

    fn enter(&self, domain: &str, state: AuthorizationState) {
        tracing::debug!(domain, ?state, "authorization state changed");
        self.state.set(state);
    }

    /// 完成單一網域的授權。
    ///
    /// # 錯誤
    ///
    /// 任何一步失敗都會回傳 [`AuthorizationError`]，狀態停在 `Failed`，
    /// 且已發佈的挑戰檔案會被移除。
    pub fn authorize(&self, domain: &str) -> Result<()> {
        self.state.set(AuthorizationState::Created);
        self.transport.observer().notify(&ProgressEvent::Verifying {
            domain: domain.to_string(),
        });

        match self.run(domain) {
            Ok(()) => {
                self.enter(domain, AuthorizationState::Valid);
                self.transport.observer().notify(&ProgressEvent::Verified {
                    domain: domain.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.enter(domain, AuthorizationState::Failed);
                Err(e)
            }
        }
    }

    fn run(&self, domain: &str) -> Result<()> {
        self.enter(domain, AuthorizationState::ChallengeRequested);
        let response = self.transport.send(
            self.new_authz_url,
            &NewAuthzPayload::new(domain),
            &StatusTable::silent(STATUS_CREATED),
            "Error requesting challenges",
        )?;

        let challenge = Challenge::select_http01(&response.body).map_err(|e| match e {
            ChallengeError::NotOffered(_) => AuthorizationError::NoHttpChallenge {
                domain: domain.to_string(),
            },
            other => AuthorizationError::Challenge(other),
        })?;

        let token = challenge.sanitized_token();
        let key_auth = key_authorization(&token, self.thumbprint);
        let published = PublishedChallenge::publish(self.publisher, &token, &key_auth)?;
        self.enter(domain, AuthorizationState::Published);

        let url = well_known_url(domain, &token);
        if let Err(reason) = self.self_verify(&url, &key_auth) {
            let location = published.location().to_string();
            if let Err(e) = published.remove() {
                tracing::warn!(domain, error = %e, "failed to remove challenge file");
            }
            return Err(AuthorizationError::Verification {
                domain: domain.to_string(),
                location,
                url,
                reason,
            });
        }
        self.enter(domain, AuthorizationState::SelfVerified);

        self.transport.send(
            &challenge.uri,
            &ChallengeReadyPayload::new(&key_auth),
            &StatusTable::silent(STATUS_ACCEPTED),
            "Error triggering challenge",
        )?;
        self.enter(domain, AuthorizationState::Notified);

        match self.poll(domain, &challenge.uri) {
            Ok(()) => {
                published.remove()?;
                Ok(())
            }
            Err(e) => {
                if let Err(remove_err) = published.remove() {
                    tracing::warn!(domain, error = %remove_err, "failed to remove challenge file");
                }
                Err(e)
            }
        }
    }

    /// 自行下載挑戰檔案，內容去除前後空白後必須與 key authorization 完全相同。
    fn self_verify(&self, url: &str, key_auth: &str) -> std::result::Result<(), String> {
        let response = self
            .transport
            .http()
            .get(url)
            .map_err(|e| e.to_string())?;

        if !response.is_success() {
            return Err(format!("HTTP {}", response.status));
        }

        let fetched = response.text();
        if fetched.trim() != key_auth {
            return Err(format!(
                "expected {:?}, got {:?}",
                key_auth,
                fetched.trim()
            ));
        }
        Ok(())
    }

    fn poll(&self, domain: &str, uri: &str) -> Result<()> {
        self.enter(domain, AuthorizationState::Polling);
        let started = Instant::now();

        loop {
            let response = self
                .transport
                .http()
                .get(uri)
                .map_err(|source| AuthorizationError::Polling {
                    domain: domain.to_string(),
                    source,
                })?;

            if !response.is_success() {
                return Err(AuthorizationError::PollingStatus {
                    domain: domain.to_string(),
                    code: response.status,
                    body: response.text(),
                });
            }

            let resource: Value =
                response
                    .json(uri)
                    .map_err(|source| AuthorizationError::Polling {
                        domain: domain.to_string(),
                        source,
                    })?;
            let status = ChallengeStatus::parse(resource["status"].as_str().unwrap_or_default());

            match status {
                ChallengeStatus::Valid => return Ok(()),
                ChallengeStatus::Pending => {
                    self.wait(domain, started)?;
                }
                _ => {
                    return Err(AuthorizationError::ChallengeFailed {
                        domain: domain.to_string(),
                        body: resource.to_string(),
                    })
                }
            }
        }
    }

    fn wait(&self, domain: &str, started: Instant) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AuthorizationError::Cancelled {
                domain: domain.to_string(),
            });
        }

        if let Some(timeout) = self.policy.timeout {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(AuthorizationError::Timeout {
                    domain: domain.to_string(),
                    waited,
                });
            }
        }

        tracing::debug!(domain, interval = ?self.policy.interval, "challenge pending");
        thread::sleep(self.policy.interval);
        Ok(())
    }
}
