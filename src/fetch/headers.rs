//! Browser header profiles
//!
//! Each profile is a coherent set of navigation headers for one real browser.
//! Client hints (`sec-ch-ua*`) are only sent by Chromium-based profiles.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

struct BrowserProfile {
    name: &'static str,
    user_agent: &'static str,
    /// `sec-ch-ua` value, Chromium only
    client_hints: Option<&'static str>,
    platform: &'static str,
    accept: &'static str,
    accept_language: &'static str,
}

const CHROMIUM_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const GECKO_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const SAFARI_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const BROWSER_PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        name: "chrome-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        client_hints: Some("\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
        platform: "\"Windows\"",
        accept: CHROMIUM_ACCEPT,
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        name: "chrome-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        client_hints: Some("\"Chromium\";v=\"130\", \"Google Chrome\";v=\"130\", \"Not?A_Brand\";v=\"99\""),
        platform: "\"macOS\"",
        accept: CHROMIUM_ACCEPT,
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        name: "edge-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
        client_hints: Some("\"Microsoft Edge\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
        platform: "\"Windows\"",
        accept: CHROMIUM_ACCEPT,
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        name: "firefox-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        client_hints: None,
        platform: "\"Windows\"",
        accept: GECKO_ACCEPT,
        accept_language: "en-US,en;q=0.5",
    },
    BrowserProfile {
        name: "firefox-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:132.0) Gecko/20100101 Firefox/132.0",
        client_hints: None,
        platform: "\"macOS\"",
        accept: GECKO_ACCEPT,
        accept_language: "en-US,en;q=0.5",
    },
    BrowserProfile {
        name: "safari-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        client_hints: None,
        platform: "\"macOS\"",
        accept: SAFARI_ACCEPT,
        accept_language: "en-US,en;q=0.9",
    },
];

/// A realistic browser header set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderProfile {
    index: usize,
}

impl HeaderProfile {
    /// Picks a random browser profile
    pub fn generate() -> Self {
        Self {
            index: rand::rng().random_range(0..BROWSER_PROFILES.len()),
        }
    }

    /// Picks a random profile different from this one
    pub fn regenerate(&self) -> Self {
        let offset = rand::rng().random_range(1..BROWSER_PROFILES.len());
        Self {
            index: (self.index + offset) % BROWSER_PROFILES.len(),
        }
    }

    fn profile(&self) -> &'static BrowserProfile {
        &BROWSER_PROFILES[self.index % BROWSER_PROFILES.len()]
    }

    pub fn name(&self) -> &'static str {
        self.profile().name
    }

    pub fn is_chromium(&self) -> bool {
        self.profile().client_hints.is_some()
    }

    /// Builds the request headers, applying per-request overrides last
    ///
    /// Invalid override names or values are ignored.
    pub fn header_map(&self, overrides: &[(String, String)]) -> HeaderMap {
        let profile = self.profile();
        let mut headers = HeaderMap::new();

        headers.insert("user-agent", HeaderValue::from_static(profile.user_agent));
        headers.insert("accept", HeaderValue::from_static(profile.accept));
        headers.insert(
            "accept-language",
            HeaderValue::from_static(profile.accept_language),
        );
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));

        if let Some(hints) = profile.client_hints {
            headers.insert("sec-ch-ua", HeaderValue::from_static(hints));
            headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
            headers.insert(
                "sec-ch-ua-platform",
                HeaderValue::from_static(profile.platform),
            );
        }

        let has_referer = overrides
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("referer"));
        let fetch_site = if has_referer { "same-origin" } else { "none" };
        headers.insert("sec-fetch-site", HeaderValue::from_static(fetch_site));

        for (name, value) in overrides {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        headers
    }
}

impl Default for HeaderProfile {
    fn default() -> Self {
        Self::generate()
    }
}
