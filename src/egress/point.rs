//! Egress point identity, parsing and health counters

use crate::ConfigError;
use std::fmt;
use std::time::Instant;
use url::Url;

/// How requests leave through an egress point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Direct,
    HttpProxy,
    Socks5,
}

impl TransportKind {
    fn scheme(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::HttpProxy => "http",
            Self::Socks5 => "socks5h",
        }
    }
}

/// Proxy credentials in percent-encoded userinfo form; the password never
/// appears in Debug output
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// The immutable identity of an egress point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EgressEndpoint {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl EgressEndpoint {
    /// The direct (no proxy) endpoint
    pub fn direct() -> Self {
        Self {
            kind: TransportKind::Direct,
            host: String::new(),
            port: 0,
            credentials: None,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == TransportKind::Direct
    }

    /// A log-safe label, e.g. `direct` or `http://10.0.0.1:8080`
    pub fn label(&self) -> String {
        match self.kind {
            TransportKind::Direct => "direct".to_string(),
            kind => format!("{}://{}:{}", kind.scheme(), self.host, self.port),
        }
    }

    /// The proxy URL handed to the HTTP client, credentials included
    pub fn proxy_url(&self) -> Option<String> {
        if self.is_direct() {
            return None;
        }

        let auth = self
            .credentials
            .as_ref()
            .map(|c| format!("{}:{}@", c.username, c.password))
            .unwrap_or_default();

        Some(format!(
            "{}://{}{}:{}",
            self.kind.scheme(),
            auth,
            self.host,
            self.port
        ))
    }
}

/// Health of an egress point, derived from its consecutive failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressHealth {
    Active,
    Quarantined,
}

/// An egress point with its accumulated health statistics
#[derive(Debug, Clone)]
pub struct EgressPoint {
    pub endpoint: EgressEndpoint,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: Option<Instant>,
    pub consecutive_failures: u32,

    /// When the point last crossed into quarantine
    pub quarantined_at: Option<Instant>,
}

impl EgressPoint {
    pub fn new(endpoint: EgressEndpoint) -> Self {
        Self {
            endpoint,
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
            consecutive_failures: 0,
            quarantined_at: None,
        }
    }

    /// Lifetime success ratio, or None before the first reported outcome
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            None
        } else {
            Some(self.success_count as f64 / total as f64)
        }
    }

    /// Score used for selection; untried points are treated optimistically
    pub fn selection_score(&self) -> f64 {
        self.success_rate().unwrap_or(1.0)
    }

    pub fn health(&self, failure_threshold: u32) -> EgressHealth {
        if self.consecutive_failures < failure_threshold {
            EgressHealth::Active
        } else {
            EgressHealth::Quarantined
        }
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.quarantined_at = None;
    }

    /// Records a failure and returns true when this failure quarantined the point
    pub fn record_failure(&mut self, failure_threshold: u32, now: Instant) -> bool {
        let was_active = self.health(failure_threshold) == EgressHealth::Active;
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if was_active && self.health(failure_threshold) == EgressHealth::Quarantined {
            self.quarantined_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Forces the point into quarantine without touching the lifetime counters
    pub fn force_quarantine(&mut self, failure_threshold: u32, now: Instant) -> bool {
        if self.health(failure_threshold) == EgressHealth::Quarantined {
            return false;
        }
        self.consecutive_failures = failure_threshold;
        self.quarantined_at = Some(now);
        true
    }

    pub fn reactivate(&mut self) {
        self.consecutive_failures = 0;
        self.quarantined_at = None;
    }
}

/// Percent-encodes raw list credentials the way they appear in a proxy URL
fn encode_credentials(username: &str, password: &str) -> Option<Credentials> {
    let mut url = Url::parse("http://egress.invalid").ok()?;
    // '%' is not in the userinfo encode set, so escape it first
    url.set_username(&username.replace('%', "%25")).ok()?;
    url.set_password(Some(&password.replace('%', "%25"))).ok()?;

    Some(Credentials {
        username: url.username().to_string(),
        password: url.password().unwrap_or_default().to_string(),
    })
}

/// Parses one egress entry
///
/// Accepted forms:
/// - `direct`
/// - `http://[user:pass@]host:port`, `https://...`, `socks5://...`, `socks5h://...`
/// - `host:port` or `host:port:user:pass` (plain proxy list export, HTTP proxy)
pub fn parse_egress_entry(entry: &str) -> Result<EgressEndpoint, ConfigError> {
    let entry = entry.trim();
    let invalid = |message: &str| ConfigError::InvalidEgress {
        entry: entry.to_string(),
        message: message.to_string(),
    };

    if entry.eq_ignore_ascii_case("direct") {
        return Ok(EgressEndpoint::direct());
    }

    if entry.contains("://") {
        let url = Url::parse(entry).map_err(|e| invalid(&e.to_string()))?;

        let kind = match url.scheme() {
            "http" | "https" => TransportKind::HttpProxy,
            "socks5" | "socks5h" => TransportKind::Socks5,
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        };

        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = url
            .port_or_known_default()
            .or(match kind {
                TransportKind::Socks5 => Some(1080),
                _ => None,
            })
            .ok_or_else(|| invalid("missing port"))?;

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(Credentials {
                username: url.username().to_string(),
                password: url.password().unwrap_or_default().to_string(),
            })
        };

        return Ok(EgressEndpoint {
            kind,
            host,
            port,
            credentials,
        });
    }

    let parts: Vec<&str> = entry.split(':').collect();
    let (host, port, credentials) = match parts.as_slice() {
        [host, port] => (*host, *port, None),
        [host, port, user, pass] => (
            *host,
            *port,
            Some(encode_credentials(user, pass).ok_or_else(|| invalid("invalid credentials"))?),
        ),
        _ => return Err(invalid("expected host:port or host:port:user:pass")),
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| invalid(&format!("invalid port '{}'", port)))?;

    Ok(EgressEndpoint {
        kind: TransportKind::HttpProxy,
        host: host.to_string(),
        port,
        credentials,
    })
}
