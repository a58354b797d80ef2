//! Browser-mediated federation capture
//!
//! A browser session is driven to the identity provider's start URL while
//! request interception watches for the federation artifact: either the
//! SAML response posted to the ACS URL, or the credentials JSON served by the
//! AWS SSO portal. The capture resolves on exactly one of {artifact,
//! deadline, session closed, cancellation}; the session is closed on every
//! exit path.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::{Url, form_urlencoded};

use crate::error::{Error, Result};

pub mod chrome;

pub use self::chrome::{ChromeDriver, ChromeLauncher, force_cleanup};

/// Browser launch settings
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub data_dir: PathBuf,
    pub timeout: Duration,
    pub headless: bool,
    pub no_sandbox: bool,
    /// Any chromium based browser executable (chrome, chromium, brave, edge)
    pub custom_executable: Option<PathBuf>,
}

impl WebConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            timeout: Duration::from_secs(crate::constants::DEFAULT_CAPTURE_TIMEOUT_SECONDS),
            headless: false,
            no_sandbox: false,
            custom_executable: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.no_sandbox = no_sandbox;
        self
    }

    pub fn with_custom_executable(mut self, path: Option<PathBuf>) -> Self {
        self.custom_executable = path;
        self
    }
}

/// Stage at which an intercepted request is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptStage {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptRule {
    pub pattern: String,
    pub stage: InterceptStage,
}

/// Lifecycle events of the browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    Navigated(String),
    /// The inspected target went away, e.g. the user closed the window
    Detached,
}

/// Driver-side handle used to answer a paused request
#[async_trait]
pub trait RequestResponder: Send {
    /// Body of the response, for requests paused at the response stage
    async fn response_body(&mut self) -> Result<String>;

    /// Answer with a 301 to `location`
    async fn redirect(self: Box<Self>, location: &str) -> Result<()>;

    /// Let the request proceed unchanged
    async fn resume(self: Box<Self>) -> Result<()>;
}

/// A request paused by the driver
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    pub post_data: Option<String>,
    responder: Box<dyn RequestResponder>,
}

impl InterceptedRequest {
    pub fn new(
        url: impl Into<String>,
        method: impl Into<String>,
        post_data: Option<String>,
        responder: Box<dyn RequestResponder>,
    ) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            post_data,
            responder,
        }
    }

    pub async fn response_body(&mut self) -> Result<String> {
        self.responder.response_body().await
    }

    pub async fn redirect(self, location: &str) -> Result<()> {
        self.responder.redirect(location).await
    }

    pub async fn resume(self) -> Result<()> {
        self.responder.resume().await
    }
}

/// A running browser session
#[async_trait]
pub trait BrowserDriver: Send {
    /// Pause every request matching `rules`
    async fn intercept(
        &mut self,
        rules: &[InterceptRule],
    ) -> Result<BoxStream<'static, InterceptedRequest>>;

    async fn events(&mut self) -> Result<BoxStream<'static, BrowserEvent>>;

    async fn open_url(&mut self, url: &str) -> Result<()>;

    /// Tear the session down; idempotent and must not leave the process running
    async fn close(&mut self);
}

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>>;

    /// Time allowed for a capture on sessions from this launcher
    fn timeout(&self) -> Duration;
}

/// What to capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    /// SAMLResponse posted to the ACS URL
    Saml { acs_url: String },
    /// JSON served by the SSO federation endpoint, reached via the user endpoint
    Sso {
        user_endpoint: String,
        credentials_endpoint: String,
    },
}

/// Which capture step a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Assertion,
    UserInfo,
    FederationCredentials,
}

impl CaptureMode {
    pub fn rules(&self) -> Vec<InterceptRule> {
        match self {
            Self::Saml { acs_url } => vec![InterceptRule {
                pattern: format!("{acs_url}*"),
                stage: InterceptStage::Request,
            }],
            Self::Sso {
                user_endpoint,
                credentials_endpoint,
            } => vec![
                InterceptRule {
                    pattern: user_endpoint.clone(),
                    stage: InterceptStage::Response,
                },
                InterceptRule {
                    pattern: credentials_endpoint.clone(),
                    stage: InterceptStage::Response,
                },
            ],
        }
    }

    fn classify(&self, url: &str) -> Option<Step> {
        match self {
            Self::Saml { acs_url } => {
                pattern_matches(&format!("{acs_url}*"), url).then_some(Step::Assertion)
            }
            Self::Sso {
                user_endpoint,
                credentials_endpoint,
            } => {
                if pattern_matches(credentials_endpoint, url) {
                    Some(Step::FederationCredentials)
                } else if pattern_matches(user_endpoint, url) {
                    Some(Step::UserInfo)
                } else {
                    None
                }
            }
        }
    }
}

/// DevTools `Fetch` URL pattern match: `*` is any run, `?` exactly one char
pub fn pattern_matches(pattern: &str, url: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let url: Vec<char> = url.chars().collect();

    let (mut p, mut u) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while u < url.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, u));
                p += 1;
            }
            Some(&c) if c == '?' || c == url[u] => {
                p += 1;
                u += 1;
            }
            _ => match backtrack {
                Some((star_p, star_u)) => {
                    p = star_p + 1;
                    u = star_u + 1;
                    backtrack = Some((star_p, star_u + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Extract the URL-decoded `SAMLResponse` from an ACS request
///
/// Form data is tried as-is, then after a base64 decode, since the DevTools
/// protocol reports post data base64-encoded.
fn extract_assertion(request: &InterceptedRequest) -> Result<String> {
    let from_body = request
        .post_data
        .as_deref()
        .and_then(|data| parse_saml_response(data).or_else(|| try_decode_and_parse(data)));

    let from_query = || {
        Url::parse(&request.url).ok().and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "SAMLResponse")
                .map(|(_, v)| v.into_owned())
        })
    };

    from_body.or_else(from_query).ok_or_else(|| {
        Error::MalformedArtifact(format!(
            "{} request to {} carried no SAMLResponse",
            request.method, request.url
        ))
    })
}

fn parse_saml_response(data: &str) -> Option<String> {
    form_urlencoded::parse(data.as_bytes())
        .find(|(k, _)| k == "SAMLResponse")
        .map(|(_, v)| v.to_string())
}

fn try_decode_and_parse(data: &str) -> Option<String> {
    general_purpose::STANDARD
        .decode(data)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .as_deref()
        .and_then(parse_saml_response)
}

type ArtifactSender = Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>;

/// Hand the artifact over; only the first one is ever delivered
fn deliver(slot: &ArtifactSender, artifact: Result<String>) {
    let sender = slot.lock().map(|mut guard| guard.take()).unwrap_or(None);
    match sender {
        Some(tx) => {
            let _ = tx.send(artifact);
        }
        None => debug!("Artifact already captured, ignoring"),
    }
}

async fn handle_request(
    mut request: InterceptedRequest,
    mode: CaptureMode,
    artifact: ArtifactSender,
    user_loaded: mpsc::Sender<()>,
) {
    let step = mode.classify(&request.url);
    debug!("Intercepted {} {} ({:?})", request.method, request.url, step);

    let outcome = match (step, &mode) {
        (Some(Step::Assertion), _) => {
            let assertion = extract_assertion(&request);
            deliver(&artifact, assertion);
            request.resume().await
        }
        (
            Some(Step::UserInfo),
            CaptureMode::Sso {
                credentials_endpoint,
                ..
            },
        ) if request.method == "GET" => {
            let redirected = request.redirect(credentials_endpoint).await;
            // auxiliary signal; the waiting side drains it
            let _ = user_loaded.try_send(());
            redirected
        }
        (Some(Step::FederationCredentials), _) if request.method == "GET" => {
            let body = request.response_body().await.map_err(|e| {
                Error::MalformedArtifact(format!("unreadable federation credentials body: {e}"))
            });
            deliver(&artifact, body);
            request.resume().await
        }
        _ => request.resume().await,
    };

    if let Err(e) = outcome {
        warn!("Failed to answer intercepted request: {}", e);
    }
}

/// Capture a federation artifact through `driver`
///
/// The deadline counts from the call, not from the last activity. The
/// driver is closed exactly once, whatever the outcome.
pub async fn capture(
    mut driver: Box<dyn BrowserDriver>,
    provider_url: &str,
    mode: &CaptureMode,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let outcome = wait_for_artifact(driver.as_mut(), provider_url, mode, deadline, cancel).await;
    driver.close().await;
    outcome
}

async fn wait_for_artifact(
    driver: &mut dyn BrowserDriver,
    provider_url: &str,
    mode: &CaptureMode,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut requests = driver.intercept(&mode.rules()).await?;
    let mut events = driver.events().await?;

    let (artifact_tx, mut artifact_rx) = oneshot::channel();
    let artifact_tx: ArtifactSender = Arc::new(Mutex::new(Some(artifact_tx)));
    let (user_tx, mut user_rx) = mpsc::channel(1);

    let dispatch_mode = mode.clone();
    let dispatcher = tokio::spawn(async move {
        while let Some(request) = requests.next().await {
            tokio::spawn(handle_request(
                request,
                dispatch_mode.clone(),
                artifact_tx.clone(),
                user_tx.clone(),
            ));
        }
    });
    let _dispatcher = AbortOnDrop(dispatcher);

    let expired = time::sleep_until(deadline);
    tokio::pin!(expired);

    info!("Navigating to {}", provider_url);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Capture cancelled");
            return Err(Error::TimedOut);
        }
        opened = driver.open_url(provider_url) => opened?,
        _ = &mut expired => return Err(Error::TimedOut),
    }
    info!("Browser opened. Please complete authentication in the browser window.");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Capture cancelled");
                return Err(Error::TimedOut);
            }
            artifact = &mut artifact_rx => {
                // the sender only drops unanswered when interception stopped
                return artifact.unwrap_or(Err(Error::TimedOut));
            }
            Some(()) = user_rx.recv() => {
                debug!("SSO user endpoint loaded, waiting for federation credentials");
            }
            event = events.next() => match event {
                Some(BrowserEvent::Navigated(url)) => debug!("Navigated to {}", url),
                Some(BrowserEvent::Detached) | None => {
                    info!("Browser session closed before capture completed");
                    return Err(Error::TimedOut);
                }
            },
            _ = &mut expired => return Err(Error::TimedOut),
        }
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
