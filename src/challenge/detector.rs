use crate::config::ChallengeConfig;
use reqwest::header::HeaderMap;
use std::fmt;

/// Family of soft block a signature group identifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftBlockKind {
    ScriptChallenge,
    ManagedChallenge,
    UnknownSignature,
}

impl SoftBlockKind {
    /// Parses the `kind` value of a configured signature group
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script-challenge" => Some(Self::ScriptChallenge),
            "managed-challenge" => Some(Self::ManagedChallenge),
            "unknown" | "unknown-signature" => Some(Self::UnknownSignature),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScriptChallenge => "script-challenge",
            Self::ManagedChallenge => "managed-challenge",
            Self::UnknownSignature => "unknown-signature",
        }
    }
}

/// Outcome of inspecting a response for anti-automation measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeVerdict {
    None,
    SoftBlock(SoftBlockKind),
    HardBlock,
    RateLimited,
}

impl ChallengeVerdict {
    pub fn is_suspected(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ChallengeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SoftBlock(kind) => write!(f, "soft-block ({})", kind.as_str()),
            Self::HardBlock => write!(f, "hard-block"),
            Self::RateLimited => write!(f, "rate-limited"),
        }
    }
}

/// A named set of markers identifying one challenge family
#[derive(Debug, Clone)]
pub struct SignatureGroup {
    pub name: String,
    pub kind: SoftBlockKind,
    /// Lowercased body substrings
    markers: Vec<String>,
    /// Lowercased response header names
    headers: Vec<String>,
}

impl SignatureGroup {
    pub fn new(name: &str, kind: SoftBlockKind, markers: &[&str], headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
            headers: headers.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    fn matches(&self, headers: &HeaderMap, lowered_body: &str) -> bool {
        self.headers.iter().any(|name| headers.contains_key(name.as_str()))
            || self.markers.iter().any(|marker| lowered_body.contains(marker.as_str()))
    }
}

/// Built-in signature table, used when the configuration defines none
pub fn default_signatures() -> Vec<SignatureGroup> {
    vec![
        SignatureGroup::new(
            "cloudflare-managed",
            SoftBlockKind::ManagedChallenge,
            &["cf-chl-", "challenge-platform", "just a moment...", "cf_chl_opt"],
            &["cf-mitigated"],
        ),
        SignatureGroup::new(
            "captcha-widget",
            SoftBlockKind::ManagedChallenge,
            &["g-recaptcha", "h-captcha", "px-captcha"],
            &[],
        ),
        SignatureGroup::new(
            "browser-check",
            SoftBlockKind::ScriptChallenge,
            &[
                "checking your browser",
                "enable javascript and cookies",
                "/cdn-cgi/challenge",
                "jschl",
            ],
            &[],
        ),
        SignatureGroup::new(
            "bot-manager",
            SoftBlockKind::UnknownSignature,
            &["captcha-delivery.com"],
            &["x-datadome"],
        ),
    ]
}

/// Classifies responses against an ordered signature table
///
/// Precedence: a 429 is always `RateLimited`; otherwise the first matching
/// signature group yields `SoftBlock`; an unmatched 403 is `HardBlock`.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    groups: Vec<SignatureGroup>,
}

impl ChallengeDetector {
    pub fn new(groups: Vec<SignatureGroup>) -> Self {
        Self { groups }
    }

    pub fn from_config(config: &ChallengeConfig) -> Self {
        if config.signatures.is_empty() {
            return Self::new(default_signatures());
        }

        let groups = config
            .signatures
            .iter()
            .map(|entry| {
                let kind = SoftBlockKind::from_config_str(&entry.kind)
                    .unwrap_or(SoftBlockKind::UnknownSignature);
                let markers: Vec<&str> = entry.markers.iter().map(String::as_str).collect();
                let headers: Vec<&str> = entry.headers.iter().map(String::as_str).collect();
                SignatureGroup::new(&entry.name, kind, &markers, &headers)
            })
            .collect();
        Self::new(groups)
    }

    pub fn groups(&self) -> &[SignatureGroup] {
        &self.groups
    }

    /// Returns the first signature group matching the response, if any
    pub fn matching_group(&self, headers: &HeaderMap, body: &str) -> Option<&SignatureGroup> {
        let lowered = body.to_lowercase();
        self.groups
            .iter()
            .find(|group| group.matches(headers, &lowered))
    }

    /// Inspects a response and returns its verdict
    ///
    /// # Arguments
    ///
    /// * `status` - HTTP status code
    /// * `headers` - Response headers
    /// * `body` - Response body as text
    pub fn detect(&self, status: u16, headers: &HeaderMap, body: &str) -> ChallengeVerdict {
        if status == 429 {
            return ChallengeVerdict::RateLimited;
        }

        if let Some(group) = self.matching_group(headers, body) {
            return ChallengeVerdict::SoftBlock(group.kind);
        }

        if status == 403 {
            return ChallengeVerdict::HardBlock;
        }

        ChallengeVerdict::None
    }
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new(default_signatures())
    }
}
