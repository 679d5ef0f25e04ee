use crate::challenge::{
    ChallengeDetector, ChallengeEvidence, ChallengeProbe, ChallengeResolver, ChallengeStats,
    ChallengeVerdict, OperatorChannel, ProbeOutcome, Resolution, ResolutionContext,
};
use crate::config::{BackoffConfig, Config};
use crate::egress::{EgressLease, EgressPool};
use crate::fetch::headers::HeaderProfile;
use crate::retry::{
    classify, AttemptOutcome, Classification, RetryController, RetryDecision, TransportFailure,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Why a fetch could not produce a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    RetriesExhausted(String),
    UnresolvedChallenge(ChallengeVerdict),
    HttpStatus(u16),
    InvalidTarget(String),
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted(last) => write!(f, "retries exhausted ({})", last),
            Self::UnresolvedChallenge(verdict) => write!(f, "unresolved challenge ({})", verdict),
            Self::HttpStatus(status) => write!(f, "HTTP {}", status),
            Self::InvalidTarget(message) => write!(f, "invalid target ({})", message),
        }
    }
}

/// Errors returned by [`FetchClient::fetch`]
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Fetch of {url} failed: {reason}")]
    Fatal { url: String, reason: FatalReason },

    #[error("Fetch of {url} skipped by operator")]
    Skipped { url: String },

    #[error("Fetch cancelled")]
    Cancelled,
}

/// Per-session request state threaded through every fetch
#[derive(Debug)]
pub struct FetchContext {
    pub source_id: String,
    pub headers: HeaderProfile,
    /// Header overrides applied on top of the profile
    pub overrides: Vec<(String, String)>,
    pub cancel: CancellationToken,
    pub requests_made: u64,
    pub challenge_stats: ChallengeStats,
}

impl FetchContext {
    pub fn new(source_id: &str, cancel: CancellationToken) -> Self {
        Self {
            source_id: source_id.to_string(),
            headers: HeaderProfile::generate(),
            overrides: Vec::new(),
            cancel,
            requests_made: 0,
            challenge_stats: ChallengeStats::default(),
        }
    }

    /// Sets the Referer override to the page the next request navigates from
    pub fn set_referer(&mut self, url: &Url) {
        self.overrides
            .retain(|(name, _)| !name.eq_ignore_ascii_case("referer"));
        self.overrides
            .push(("Referer".to_string(), url.to_string()));
    }
}

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub body: String,
    /// Requests issued for this page, retries and probes included
    pub attempts: u32,
    /// Label of the egress point that served the page
    pub egress: String,
    /// Strategy that cleared a challenge on the way, if any
    pub resolved_by: Option<&'static str>,
}

/// One request attempt, logged and then discarded
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub url: String,
    pub egress: String,
    pub profile: &'static str,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

impl FetchAttempt {
    fn log(&self) {
        let outcome = match &self.outcome {
            AttemptOutcome::Transport { kind, message } => {
                format!("transport {:?}: {}", kind, message)
            }
            AttemptOutcome::Response { status, challenged } => {
                format!("HTTP {}{}", status, if *challenged { " (challenged)" } else { "" })
            }
        };
        debug!(
            "GET {} via {} as {} at {} -> {} in {:?}",
            self.url,
            self.egress,
            self.profile,
            self.started_at.to_rfc3339(),
            outcome,
            self.latency
        );
    }
}

#[derive(Debug)]
struct RawResponse {
    url: Url,
    status: u16,
    headers: HeaderMap,
    body: String,
}

enum SendOutcome {
    Response(RawResponse),
    Transport {
        kind: TransportFailure,
        message: String,
    },
    Cancelled,
}

fn transport_kind(error: &reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        TransportFailure::Timeout
    } else if error.is_connect() {
        TransportFailure::Connect
    } else {
        TransportFailure::Other
    }
}

/// Parses a `Retry-After` header given in seconds
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Sleeps for `duration`; returns false if cancelled first
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn lease_label(lease: Option<&EgressLease>) -> String {
    lease
        .map(|l| l.endpoint.label())
        .unwrap_or_else(|| "direct".to_string())
}

/// HTTP client that routes every request through the egress pool
///
/// Transient failures are retried with backoff. Blocked responses are handed to
/// the challenge resolver, which probes the target again through this client.
pub struct FetchClient {
    pool: Arc<EgressPool>,
    /// One client per egress point, so cookies and proxy settings stay with it
    clients: Mutex<HashMap<Option<usize>, Client>>,
    in_flight: Arc<Semaphore>,
    detector: ChallengeDetector,
    resolver: ChallengeResolver,
    backoff: BackoffConfig,
    timeout: Duration,
}

impl FetchClient {
    pub fn new(
        pool: Arc<EgressPool>,
        detector: ChallengeDetector,
        resolver: ChallengeResolver,
        backoff: BackoffConfig,
        timeout: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            pool,
            clients: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            detector,
            resolver,
            backoff,
            timeout,
        }
    }

    /// Builds a client with the standard resolution chain from configuration
    pub fn from_config(
        config: &Config,
        pool: Arc<EgressPool>,
        channel: Arc<dyn OperatorChannel>,
    ) -> Self {
        let detector = ChallengeDetector::from_config(&config.challenge);
        let resolver = ChallengeResolver::standard(&config.challenge, pool.clone(), channel);
        Self::new(
            pool,
            detector,
            resolver,
            config.backoff.clone(),
            Duration::from_secs(config.session.fetch_timeout_secs),
            config.session.max_in_flight_fetches,
        )
    }

    pub fn pool(&self) -> &Arc<EgressPool> {
        &self.pool
    }

    fn client_for(&self, lease: Option<&EgressLease>) -> Result<Client, reqwest::Error> {
        let key = lease.map(|l| l.id);
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true);

        builder = match lease.and_then(|l| l.endpoint.proxy_url()) {
            Some(proxy_url) => builder.proxy(Proxy::all(proxy_url)?),
            None => builder.no_proxy(),
        };

        let client = builder.build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Issues one GET request under the in-flight cap
    async fn send(
        &self,
        url: &Url,
        lease: Option<&EgressLease>,
        headers: &HeaderProfile,
        overrides: &[(String, String)],
        cancel: &CancellationToken,
    ) -> SendOutcome {
        let client = match self.client_for(lease) {
            Ok(client) => client,
            Err(e) => {
                return SendOutcome::Transport {
                    kind: TransportFailure::Other,
                    message: format!("client setup failed: {}", e),
                }
            }
        };

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return SendOutcome::Cancelled,
            permit = self.in_flight.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return SendOutcome::Cancelled,
            },
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let request = client.get(url.clone()).headers(headers.header_map(overrides));

        let result = tokio::select! {
            _ = cancel.cancelled() => return SendOutcome::Cancelled,
            result = async {
                let response = request.send().await?;
                let final_url = response.url().clone();
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                let body = response.text().await?;
                Ok::<_, reqwest::Error>(RawResponse {
                    url: final_url,
                    status,
                    headers,
                    body,
                })
            } => result,
        };

        let outcome = match result {
            Ok(raw) => SendOutcome::Response(raw),
            Err(e) => SendOutcome::Transport {
                kind: transport_kind(&e),
                message: e.to_string(),
            },
        };

        let attempt_outcome = match &outcome {
            SendOutcome::Response(raw) => AttemptOutcome::Response {
                status: raw.status,
                challenged: false,
            },
            SendOutcome::Transport { kind, message } => AttemptOutcome::Transport {
                kind: *kind,
                message: message.clone(),
            },
            SendOutcome::Cancelled => return SendOutcome::Cancelled,
        };
        FetchAttempt {
            url: url.to_string(),
            egress: lease_label(lease),
            profile: headers.name(),
            started_at,
            outcome: attempt_outcome,
            latency: started.elapsed(),
        }
        .log();

        outcome
    }

    fn report(&self, lease: Option<&EgressLease>, success: bool, reason: Option<&str>) {
        if let Some(lease) = lease {
            self.pool.report(lease.id, success, reason);
        }
    }

    /// Fetches a page, absorbing transient failures and challenges
    ///
    /// # Arguments
    ///
    /// * `url` - Target page
    /// * `ctx` - Session request state; header changes made during challenge
    ///   resolution are written back to it
    ///
    /// # Returns
    ///
    /// * `Ok(FetchedPage)` - A clean 2xx response
    /// * `Err(FetchError)` - Fatal failure, operator skip, or cancellation
    pub async fn fetch(&self, url: &Url, ctx: &mut FetchContext) -> Result<FetchedPage, FetchError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::Fatal {
                url: url.to_string(),
                reason: FatalReason::InvalidTarget(format!("unsupported scheme {}", url.scheme())),
            });
        }

        let mut retry = RetryController::new(&self.backoff);
        let mut attempts: u32 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let lease = self.pool.acquire();
            let outcome = self
                .send(url, lease.as_ref(), &ctx.headers, &ctx.overrides, &ctx.cancel)
                .await;

            let raw = match outcome {
                SendOutcome::Cancelled => return Err(FetchError::Cancelled),
                SendOutcome::Transport { kind, message } => {
                    attempts += 1;
                    ctx.requests_made += 1;
                    self.report(lease.as_ref(), false, Some(&message));

                    let class = classify(&AttemptOutcome::Transport {
                        kind,
                        message: message.clone(),
                    });
                    match retry.on_failure(class) {
                        RetryDecision::Retry(delay) => {
                            debug!("Retrying {} in {:?} after {}", url, delay, message);
                            if !sleep_or_cancel(delay, &ctx.cancel).await {
                                return Err(FetchError::Cancelled);
                            }
                            continue;
                        }
                        RetryDecision::GiveUp => {
                            return Err(FetchError::Fatal {
                                url: url.to_string(),
                                reason: FatalReason::RetriesExhausted(message),
                            })
                        }
                    }
                }
                SendOutcome::Response(raw) => raw,
            };

            attempts += 1;
            ctx.requests_made += 1;

            let verdict = self.detector.detect(raw.status, &raw.headers, &raw.body);
            let class = classify(&AttemptOutcome::Response {
                status: raw.status,
                challenged: verdict.is_suspected(),
            });

            match class {
                Classification::Success => {
                    retry.record_success();
                    self.report(lease.as_ref(), true, None);
                    return Ok(FetchedPage {
                        url: raw.url,
                        status: raw.status,
                        body: raw.body,
                        attempts,
                        egress: lease_label(lease.as_ref()),
                        resolved_by: None,
                    });
                }
                Classification::Fatal => {
                    // The point delivered a definitive answer
                    self.report(lease.as_ref(), true, None);
                    return Err(FetchError::Fatal {
                        url: url.to_string(),
                        reason: FatalReason::HttpStatus(raw.status),
                    });
                }
                Classification::RetryableTransient => {
                    let reason = format!("HTTP {}", raw.status);
                    self.report(lease.as_ref(), false, Some(&reason));
                    match retry.on_failure(class) {
                        RetryDecision::Retry(delay) => {
                            debug!("Retrying {} in {:?} after {}", url, delay, reason);
                            if !sleep_or_cancel(delay, &ctx.cancel).await {
                                return Err(FetchError::Cancelled);
                            }
                        }
                        RetryDecision::GiveUp => {
                            return Err(FetchError::Fatal {
                                url: url.to_string(),
                                reason: FatalReason::RetriesExhausted(reason),
                            })
                        }
                    }
                }
                Classification::RetryableBlocked => {
                    warn!("Blocked on {} via {}: {}", url, lease_label(lease.as_ref()), verdict);
                    let verdict = if verdict.is_suspected() {
                        verdict
                    } else {
                        ChallengeVerdict::HardBlock
                    };
                    return self
                        .resolve_block(url, ctx, lease, raw, verdict, retry, attempts)
                        .await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_block(
        &self,
        url: &Url,
        ctx: &mut FetchContext,
        lease: Option<EgressLease>,
        raw: RawResponse,
        verdict: ChallengeVerdict,
        mut retry: RetryController,
        attempts: u32,
    ) -> Result<FetchedPage, FetchError> {
        let floor = retry_after(&raw.headers);
        let pending_delay = match retry.on_failure(Classification::RetryableBlocked) {
            RetryDecision::Retry(delay) => Some(retry.backoff().with_floor(delay, floor)),
            RetryDecision::GiveUp => None,
        };

        let mut resolution_ctx = ResolutionContext {
            source_id: ctx.source_id.clone(),
            url: url.to_string(),
            evidence: ChallengeEvidence {
                status: raw.status,
                verdict,
                body: raw.body,
                retry_after: floor,
            },
            headers: ctx.headers,
            egress: lease,
            cancel: ctx.cancel.clone(),
        };

        let mut probe = ClientProbe {
            client: self,
            target: url,
            overrides: &ctx.overrides,
            retry,
            pending_delay,
            requests: 0,
        };

        let resolution = self
            .resolver
            .resolve(&mut resolution_ctx, &mut probe, &mut ctx.challenge_stats)
            .await;

        let attempts = attempts + probe.requests;
        ctx.requests_made += u64::from(probe.requests);
        ctx.headers = resolution_ctx.headers;
        let lease = resolution_ctx.egress;

        match resolution {
            Resolution::Resolved { strategy, output } => {
                self.report(lease.as_ref(), true, None);
                Ok(FetchedPage {
                    url: output.url,
                    status: output.status,
                    body: output.body,
                    attempts,
                    egress: lease_label(lease.as_ref()),
                    resolved_by: Some(strategy),
                })
            }
            Resolution::Settled { output } => {
                // The point delivered a definitive answer
                self.report(lease.as_ref(), true, None);
                Err(FetchError::Fatal {
                    url: url.to_string(),
                    reason: FatalReason::HttpStatus(output.status),
                })
            }
            Resolution::Skipped => Err(FetchError::Skipped {
                url: url.to_string(),
            }),
            Resolution::Cancelled => Err(FetchError::Cancelled),
            Resolution::Unresolved { verdict } => {
                self.report(lease.as_ref(), false, Some("unresolved challenge"));
                Err(FetchError::Fatal {
                    url: url.to_string(),
                    reason: FatalReason::UnresolvedChallenge(verdict),
                })
            }
        }
    }
}

/// Re-requests a challenged target through the fetch client
///
/// Every blocked probe consumes the blocked retry budget; once it is spent the
/// probe stops issuing requests.
struct ClientProbe<'a> {
    client: &'a FetchClient,
    target: &'a Url,
    overrides: &'a [(String, String)],
    retry: RetryController,
    /// Backoff owed before the next request, None once the budget is spent
    pending_delay: Option<Duration>,
    requests: u32,
}

#[async_trait]
impl<'a> ChallengeProbe for ClientProbe<'a> {
    type Output = RawResponse;

    async fn probe(&mut self, ctx: &mut ResolutionContext) -> ProbeOutcome<RawResponse> {
        let Some(delay) = self.pending_delay else {
            return ProbeOutcome::Failed("blocked retry budget exhausted".to_string());
        };
        if !sleep_or_cancel(delay, &ctx.cancel).await {
            return ProbeOutcome::Cancelled;
        }

        let outcome = self
            .client
            .send(
                self.target,
                ctx.egress.as_ref(),
                &ctx.headers,
                self.overrides,
                &ctx.cancel,
            )
            .await;
        self.requests += 1;

        let raw = match outcome {
            SendOutcome::Cancelled => return ProbeOutcome::Cancelled,
            SendOutcome::Transport { message, .. } => return ProbeOutcome::Failed(message),
            SendOutcome::Response(raw) => raw,
        };

        let verdict = self
            .client
            .detector
            .detect(raw.status, &raw.headers, &raw.body);
        let class = classify(&AttemptOutcome::Response {
            status: raw.status,
            challenged: verdict.is_suspected(),
        });

        match class {
            Classification::Success => {
                self.retry.record_success();
                ProbeOutcome::Clear(raw)
            }
            Classification::Fatal => ProbeOutcome::Settled(raw),
            Classification::RetryableTransient => {
                ProbeOutcome::Failed(format!("HTTP {}", raw.status))
            }
            Classification::RetryableBlocked => {
                let floor = retry_after(&raw.headers);
                self.pending_delay = match self.retry.on_failure(class) {
                    RetryDecision::Retry(delay) => {
                        Some(self.retry.backoff().with_floor(delay, floor))
                    }
                    RetryDecision::GiveUp => None,
                };
                let verdict = if verdict.is_suspected() {
                    verdict
                } else {
                    ChallengeVerdict::HardBlock
                };
                ctx.evidence = ChallengeEvidence {
                    status: raw.status,
                    verdict,
                    body: raw.body,
                    retry_after: floor,
                };
                ProbeOutcome::Challenged(verdict)
            }
        }
    }
}
