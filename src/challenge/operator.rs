use crate::{GleanerError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Decision an operator records for a pending challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorDecision {
    Resolved,
    Skip,
}

impl OperatorDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Skip => "skip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resolved" => Some(Self::Resolved),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// A challenge awaiting an operator decision
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub key: String,
    pub url: String,
    pub body_path: PathBuf,
}

/// Deterministic key for a challenged target
///
/// First 16 hex characters of SHA-256 over the source id followed by the URL.
pub fn challenge_key(source_id: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Out-of-band channel between the crawler and a human operator
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    /// Stores the offending response so an operator can inspect it
    async fn persist(&self, key: &str, url: &str, body: &str) -> Result<PathBuf>;

    /// Blocks until a decision is recorded for `key`
    ///
    /// Returns `None` when cancelled first.
    async fn await_decision(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<OperatorDecision>>;
}

/// Operator channel backed by files in a directory
///
/// Each pending challenge is `<key>.html` (response body) plus `<key>.url`. The
/// operator answers by writing `resolved` or `skip` to `<key>.decision`.
#[derive(Debug, Clone)]
pub struct FileOperatorChannel {
    dir: PathBuf,
    poll_interval: Duration,
}

impl FileOperatorChannel {
    pub fn new<P: AsRef<Path>>(dir: P, poll_interval: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            poll_interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.html", key))
    }

    fn url_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.url", key))
    }

    fn decision_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.decision", key))
    }

    /// Lists challenges that have no decision yet
    pub fn pending(&self) -> Result<Vec<PendingChallenge>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut pending = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("url") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if self.decision_path(key).exists() {
                continue;
            }
            let url = std::fs::read_to_string(&path)?.trim().to_string();
            pending.push(PendingChallenge {
                key: key.to_string(),
                url,
                body_path: self.body_path(key),
            });
        }

        pending.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pending)
    }

    /// Records an operator decision for a pending challenge
    pub fn decide(&self, key: &str, decision: OperatorDecision) -> Result<()> {
        if !self.url_path(key).exists() {
            return Err(GleanerError::Operator(format!(
                "no pending challenge with key '{}'",
                key
            )));
        }
        std::fs::write(self.decision_path(key), decision.as_str())?;
        Ok(())
    }

    async fn read_decision(&self, key: &str) -> Result<Option<OperatorDecision>> {
        let path = self.decision_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => match OperatorDecision::parse(&content) {
                Some(decision) => Ok(Some(decision)),
                None => Err(GleanerError::Operator(format!(
                    "unrecognized decision '{}' in {}",
                    content.trim(),
                    path.display()
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, key: &str) -> Result<()> {
        for path in [self.url_path(key), self.decision_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OperatorChannel for FileOperatorChannel {
    async fn persist(&self, key: &str, url: &str, body: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // A stale decision from an earlier run must not answer this challenge
        match tokio::fs::remove_file(self.decision_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let body_path = self.body_path(key);
        tokio::fs::write(&body_path, body).await?;
        tokio::fs::write(self.url_path(key), url).await?;

        info!(
            "Challenge {} persisted for operator review at {}",
            key,
            body_path.display()
        );
        Ok(body_path)
    }

    async fn await_decision(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<OperatorDecision>> {
        loop {
            if let Some(decision) = self.read_decision(key).await? {
                info!("Operator decision for {}: {}", key, decision.as_str());
                self.clear(key).await?;
                return Ok(Some(decision));
            }

            debug!("Waiting for operator decision on {}", key);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_challenge_key_is_stable() {
        let a = challenge_key("market", "https://market.example/search?q=bike");
        let b = challenge_key("market", "https://market.example/search?q=bike");
        let c = challenge_key("other", "https://market.example/search?q=bike");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!(
            OperatorDecision::parse(" Resolved\n"),
            Some(OperatorDecision::Resolved)
        );
        assert_eq!(OperatorDecision::parse("skip"), Some(OperatorDecision::Skip));
        assert_eq!(OperatorDecision::parse("maybe"), None);
    }

    #[tokio::test]
    async fn test_persist_lists_pending() {
        let dir = TempDir::new().unwrap();
        let channel = FileOperatorChannel::new(dir.path(), Duration::from_millis(10));

        let path = channel
            .persist("abc123", "https://market.example/p/1", "<html>challenge</html>")
            .await
            .unwrap();
        assert!(path.exists());

        let pending = channel.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "abc123");
        assert_eq!(pending[0].url, "https://market.example/p/1");
    }

    #[tokio::test]
    async fn test_decide_unblocks_waiter() {
        let dir = TempDir::new().unwrap();
        let channel = FileOperatorChannel::new(dir.path(), Duration::from_millis(10));
        channel
            .persist("key1", "https://market.example/", "<html></html>")
            .await
            .unwrap();

        let waiter = channel.clone();
        let handle = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            waiter.await_decision("key1", &cancel).await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        channel.decide("key1", OperatorDecision::Skip).unwrap();

        let decision = handle.await.unwrap().unwrap();
        assert_eq!(decision, Some(OperatorDecision::Skip));
        assert!(channel.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let dir = TempDir::new().unwrap();
        let channel = FileOperatorChannel::new(dir.path(), Duration::from_millis(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let decision = channel.await_decision("missing", &cancel).await.unwrap();
        assert_eq!(decision, None);
    }

    #[tokio::test]
    async fn test_stale_decision_is_discarded() {
        let dir = TempDir::new().unwrap();
        let channel = FileOperatorChannel::new(dir.path(), Duration::from_millis(10));
        std::fs::write(dir.path().join("key2.decision"), "resolved").unwrap();

        channel
            .persist("key2", "https://market.example/", "<html></html>")
            .await
            .unwrap();
        assert_eq!(channel.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_decide_unknown_key() {
        let dir = TempDir::new().unwrap();
        let channel = FileOperatorChannel::new(dir.path(), Duration::from_millis(10));
        assert!(channel.decide("nope", OperatorDecision::Resolved).is_err());
    }
}
