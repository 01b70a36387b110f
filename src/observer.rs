//! 進度回報。
//!
//! 各元件不直接寫日誌，而是把 [`ProgressEvent`] 交給注入的 [`Observer`]。
//! 預設的 [`TracingObserver`] 將事件轉為 `tracing` 的 info 事件。

use std::{fmt, sync::Arc};

/// 一次簽發流程中對使用者可見的進度。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    ParsingAccountKey,
    ParsingCsr,
    Registering,
    Registered,
    AlreadyRegistered,
    Verifying { domain: String },
    Verified { domain: String },
    Signing,
    FetchingIntermediate { url: String },
    Signed,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::ParsingAccountKey => write!(f, "Parsing account key..."),
            ProgressEvent::ParsingCsr => write!(f, "Parsing CSR..."),
            ProgressEvent::Registering => write!(f, "Registering account..."),
            ProgressEvent::Registered => write!(f, "Registered!"),
            ProgressEvent::AlreadyRegistered => write!(f, "Already registered!"),
            ProgressEvent::Verifying { domain } => write!(f, "Verifying {}...", domain),
            ProgressEvent::Verified { domain } => write!(f, "{} verified!", domain),
            ProgressEvent::Signing => write!(f, "Signing certificate..."),
            ProgressEvent::FetchingIntermediate { url } => {
                write!(f, "Retrieving Intermediate Certificate ({})!", url)
            }
            ProgressEvent::Signed => write!(f, "Certificate signed!"),
        }
    }
}

/// 接收進度事件的能力物件，生命週期與單次簽發流程相同。
pub trait Observer {
    fn notify(&self, event: &ProgressEvent);
}

impl<T: Observer + ?Sized> Observer for Arc<T> {
    fn notify(&self, event: &ProgressEvent) {
        (**self).notify(event)
    }
}

/// 輸出詳細程度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// 不輸出進度，錯誤仍由回傳值帶出。
    Quiet,
    #[default]
    Normal,
}

/// 以 `tracing` 輸出進度的 [`Observer`]。
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver {
    verbosity: Verbosity,
}

impl TracingObserver {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl Observer for TracingObserver {
    fn notify(&self, event: &ProgressEvent) {
        if self.verbosity == Verbosity::Quiet {
            return;
        }

        match event {
            ProgressEvent::Verifying { domain } | ProgressEvent::Verified { domain } => {
                tracing::info!(domain = %domain, "{}", event)
            }
            ProgressEvent::FetchingIntermediate { url } => tracing::info!(url = %url, "{}", event),
            _ => tracing::info!("{}", event),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_messages() {
        assert_eq!(ProgressEvent::Registered.to_string(), "Registered!");
        assert_eq!(
            ProgressEvent::Verified {
                domain: "example.com".into()
            }
            .to_string(),
            "example.com verified!"
        );
    }
}
