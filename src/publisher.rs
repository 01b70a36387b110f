//! 挑戰檔案的發佈。
//!
//! [`ChallengePublisher`] 把 key authorization 寫到由網頁伺服器提供的目錄中，
//! 使其可以從 `http://<domain>/.well-known/acme-challenge/<token>` 取得。

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// 發佈或移除挑戰檔案時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Token is invalid: {0}")]
    InvalidToken(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// 挑戰檔案的發佈介面。token 在呼叫前必須已經淨化。
pub trait ChallengePublisher: fmt::Debug {
    /// 寫入 `content`，回傳可讀的位置描述（用於錯誤訊息）。
    fn publish(&self, token: &str, content: &str) -> Result<String>;

    fn remove(&self, token: &str) -> Result<()>;
}

fn check_token(token: &str) -> Result<()> {
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PublishError::InvalidToken(token.to_string()));
    }
    Ok(())
}

/// 寫入本地目錄的發佈器，檔名即 token。
#[derive(Debug, Clone)]
pub struct DirPublisher {
    dir: PathBuf,
}

impl DirPublisher {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, token: &str) -> PathBuf {
        self.dir.join(token)
    }
}

impl ChallengePublisher for DirPublisher {
    fn publish(&self, token: &str, content: &str) -> Result<String> {
        check_token(token)?;
        let path = self.path_for(token);
        fs::write(&path, content).map_err(|source| PublishError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "challenge file written");
        Ok(path.display().to_string())
    }

    fn remove(&self, token: &str) -> Result<()> {
        check_token(token)?;
        let path = self.path_for(token);
        fs::remove_file(&path).map_err(|source| PublishError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "challenge file removed");
        Ok(())
    }
}

/// 記憶體中的發佈器，可與行程內的 HTTP 伺服器搭配，或用於測試。
#[derive(Debug, Default, Clone)]
pub struct MemPublisher {
    files: Arc<RwLock<HashMap<String, String>>>,
    removals: Arc<RwLock<Vec<String>>>,
}

impl MemPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.files.read().ok()?.get(token).cloned()
    }

    /// 依序列出所有被移除過的 token。
    pub fn removals(&self) -> Vec<String> {
        self.removals
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl ChallengePublisher for MemPublisher {
    fn publish(&self, token: &str, content: &str) -> Result<String> {
        check_token(token)?;
        self.files
            .write()
            .map_err(|_| PublishError::LockPoisoned)?
            .insert(token.to_string(), content.to_string());
        Ok(format!("memory:{}", token))
    }

    fn remove(&self, token: &str) -> Result<()> {
        check_token(token)?;
        self.files
            .write()
            .map_err(|_| PublishError::LockPoisoned)?
            .remove(token);
        self.removals
            .write()
            .map_err(|_| PublishError::LockPoisoned)?
            .push(token.to_string());
        Ok(())
    }
}

/// 已發佈的挑戰檔案。
///
/// 成功或明確失敗時呼叫 [`remove`](Self::remove)；其他提早返回的路徑在
/// drop 時移除檔案，失敗只記錄警告。
pub struct PublishedChallenge<'a> {
    publisher: &'a dyn ChallengePublisher,
    token: String,
    location: String,
    removed: bool,
}

impl<'a> PublishedChallenge<'a> {
    pub fn publish(
        publisher: &'a dyn ChallengePublisher,
        token: &str,
        content: &str,
    ) -> Result<Self> {
        let location = publisher.publish(token, content)?;
        Ok(Self {
            publisher,
            token: token.to_string(),
            location,
            removed: false,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        self.publisher.remove(&self.token)
    }
}

impl Drop for PublishedChallenge<'_> {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = self.publisher.remove(&self.token) {
            tracing::warn!(location = %self.location, error = %e, "failed to remove challenge file");
        }
    }
}
