//! In-memory collaborators for unit tests

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{
    StreamExt,
    channel::mpsc::{self, UnboundedSender},
    stream::BoxStream,
};

use crate::{
    aws::{AwsCredentials, AwsRole, sts::IdentityBroker},
    browser::{
        BrowserDriver, BrowserEvent, BrowserLauncher, InterceptRule, InterceptedRequest,
        RequestResponder, pattern_matches,
    },
    config::CredentialConfig,
    error::{Error, Result},
    secret::SecretBackend,
};

pub const TEST_ROLE: &str = "arn:aws:iam::111122223333:role/Base";
pub const TEST_PRINCIPAL: &str = "arn:aws:iam::111122223333:saml-provider/Idp";
pub const TEST_PROVIDER_URL: &str = "http://127.0.0.1:9999/idp-onload";
pub const TEST_ACS_URL: &str = "http://127.0.0.1:9999/saml";

pub fn sample_credentials(key_id: &str, ttl_secs: i64) -> AwsCredentials {
    AwsCredentials {
        version: 0,
        access_key_id: key_id.to_string(),
        secret_access_key: format!("{key_id}-secret"),
        session_token: format!("{key_id}-token"),
        expiration: Utc::now() + chrono::Duration::seconds(ttl_secs),
    }
}

/// SAML login for [`TEST_ROLE`], printing `credential_process` JSON
pub fn sample_config() -> CredentialConfig {
    CredentialConfig {
        provider_url: TEST_PROVIDER_URL.to_string(),
        principal_arn: Some(TEST_PRINCIPAL.to_string()),
        acs_url: TEST_ACS_URL.to_string(),
        role: Some(TEST_ROLE.to_string()),
        role_chain: vec![],
        duration: 900,
        reload_before: 0,
        is_sso: false,
        sso_region: "eu-west-1".to_string(),
        sso_role: None,
        sso_user_endpoint: String::new(),
        sso_credentials_endpoint: String::new(),
        store_in_profile: false,
        section_name: None,
        username: "jdoe".to_string(),
        browser_executable: None,
        capture_timeout: Duration::from_secs(10),
        headless: true,
        no_sandbox: false,
    }
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<String, String>,
    fail_reads: bool,
    fail_deletes: HashSet<String>,
    delete_attempts: usize,
    writes: usize,
}

/// Secret backend kept in memory; clones share state
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_reads(&self) {
        self.with_state(|s| s.fail_reads = true);
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.with_state(|s| s.fail_deletes.insert(key.to_string()));
    }

    pub fn delete_attempts(&self) -> usize {
        self.with_state(|s| s.delete_attempts)
    }

    pub fn writes(&self) -> usize {
        self.with_state(|s| s.writes)
    }

    pub fn entry(&self, key: &str) -> Option<String> {
        self.with_state(|s| s.entries.get(key).cloned())
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_state(|s| {
            if s.fail_reads {
                return Err(Error::SecretBackend("keychain locked".into()));
            }
            Ok(s.entries.get(key).cloned())
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_state(|s| {
            s.writes += 1;
            s.entries.insert(key.to_string(), value.to_string());
        });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.with_state(|s| {
            s.delete_attempts += 1;
            if s.fail_deletes.contains(key) {
                return Err(Error::SecretBackend("access denied".into()));
            }
            s.entries.remove(key);
            Ok(())
        })
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.with_state(|s| s.entries.keys().cloned().collect()))
    }
}

#[derive(Debug, Clone)]
pub struct AssumeCall {
    pub role_arn: String,
    pub duration_seconds: i32,
    pub caller_key_id: String,
}

#[derive(Debug, Clone)]
pub struct SamlCall {
    pub assertion: String,
    pub role: AwsRole,
}

#[derive(Debug, Clone, Copy, Default)]
enum Validation {
    #[default]
    Accept,
    Reject,
    Unavailable,
}

#[derive(Default)]
struct BrokerLog {
    assume: Vec<AssumeCall>,
    saml: Vec<SamlCall>,
    web_identity: Vec<String>,
    validations: usize,
}

/// Identity broker answering every call locally and recording it
///
/// Issued credentials carry [`RecordingBroker::key_id_for`] the target role.
#[derive(Default)]
pub struct RecordingBroker {
    fail_on: Option<String>,
    validation: Validation,
    log: Mutex<BrokerLog>,
}

impl RecordingBroker {
    pub fn failing_on(role_arn: &str) -> Self {
        Self {
            fail_on: Some(role_arn.to_string()),
            ..Default::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            validation: Validation::Reject,
            ..Default::default()
        }
    }

    pub fn unable_to_validate() -> Self {
        Self {
            validation: Validation::Unavailable,
            ..Default::default()
        }
    }

    pub fn key_id_for(role_arn: &str) -> String {
        format!("KEY-{role_arn}")
    }

    pub fn assume_calls(&self) -> Vec<AssumeCall> {
        self.log.lock().unwrap().assume.clone()
    }

    pub fn saml_calls(&self) -> Vec<SamlCall> {
        self.log.lock().unwrap().saml.clone()
    }

    pub fn web_identity_calls(&self) -> Vec<String> {
        self.log.lock().unwrap().web_identity.clone()
    }

    pub fn validations(&self) -> usize {
        self.log.lock().unwrap().validations
    }

    fn issue(&self, step: &str, role_arn: &str, duration_seconds: i32) -> Result<AwsCredentials> {
        if self.fail_on.as_deref() == Some(role_arn) {
            return Err(Error::Broker {
                step: step.to_string(),
                message: "AccessDenied".to_string(),
            });
        }
        Ok(sample_credentials(
            &Self::key_id_for(role_arn),
            i64::from(duration_seconds),
        ))
    }
}

#[async_trait]
impl IdentityBroker for RecordingBroker {
    async fn login_with_saml(&self, assertion: &str, role: &AwsRole) -> Result<AwsCredentials> {
        self.log.lock().unwrap().saml.push(SamlCall {
            assertion: assertion.to_string(),
            role: role.clone(),
        });
        self.issue("AssumeRoleWithSAML", &role.role_arn, role.duration_seconds)
    }

    async fn assume_role(
        &self,
        caller: &AwsCredentials,
        role: &AwsRole,
    ) -> Result<AwsCredentials> {
        self.log.lock().unwrap().assume.push(AssumeCall {
            role_arn: role.role_arn.clone(),
            duration_seconds: role.duration_seconds,
            caller_key_id: caller.access_key_id.clone(),
        });
        self.issue("AssumeRole", &role.role_arn, role.duration_seconds)
    }

    async fn login_with_web_identity(
        &self,
        _token_file: &Path,
        role_arn: &str,
        _session_name: &str,
    ) -> Result<AwsCredentials> {
        self.log
            .lock()
            .unwrap()
            .web_identity
            .push(role_arn.to_string());
        self.issue("AssumeRoleWithWebIdentity", role_arn, 3600)
    }

    async fn validate(&self, _creds: &AwsCredentials) -> Result<bool> {
        self.log.lock().unwrap().validations += 1;
        match self.validation {
            Validation::Accept => Ok(true),
            Validation::Reject => Ok(false),
            Validation::Unavailable => Err(Error::Validation("dispatch failure".into())),
        }
    }
}

/// A request the scripted browser issues once navigation starts
#[derive(Debug, Clone)]
pub struct ScriptedRequest {
    url: String,
    method: String,
    post_data: Option<String>,
    body: Option<String>,
    follow: Option<Box<ScriptedRequest>>,
}

impl ScriptedRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            post_data: None,
            body: None,
            follow: None,
        }
    }

    pub fn post(url: &str, form: &str) -> Self {
        Self {
            method: "POST".to_string(),
            post_data: Some(form.to_string()),
            ..Self::get(url)
        }
    }

    /// Response body served at the response stage
    pub fn responds(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Request the browser issues when this one is redirected
    pub fn follows_redirect_to(mut self, next: ScriptedRequest) -> Self {
        self.follow = Some(Box::new(next));
        self
    }
}

#[derive(Default)]
struct ProbeState {
    launches: AtomicUsize,
    closes: AtomicUsize,
    opened: Mutex<Vec<String>>,
    redirects: Mutex<Vec<(String, String)>>,
}

/// Observes what happened to scripted browser sessions
#[derive(Clone, Default)]
pub struct DriverProbe {
    state: Arc<ProbeState>,
}

impl DriverProbe {
    pub fn launch_count(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.opened.lock().unwrap().clone()
    }

    pub fn redirects(&self) -> Vec<(String, String)> {
        self.state.redirects.lock().unwrap().clone()
    }
}

struct ScriptedResponder {
    url: String,
    body: Option<String>,
    follow: Option<ScriptedRequest>,
    requests: UnboundedSender<InterceptedRequest>,
    probe: DriverProbe,
}

#[async_trait]
impl RequestResponder for ScriptedResponder {
    async fn response_body(&mut self) -> Result<String> {
        self.body
            .clone()
            .ok_or_else(|| Error::Browser(format!("no response body for {}", self.url)))
    }

    async fn redirect(self: Box<Self>, location: &str) -> Result<()> {
        self.probe
            .state
            .redirects
            .lock()
            .unwrap()
            .push((self.url.clone(), location.to_string()));
        if let Some(next) = self.follow {
            let _ = self
                .requests
                .unbounded_send(paused(next, &self.requests, &self.probe));
        }
        Ok(())
    }

    async fn resume(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn paused(
    request: ScriptedRequest,
    requests: &UnboundedSender<InterceptedRequest>,
    probe: &DriverProbe,
) -> InterceptedRequest {
    let responder = ScriptedResponder {
        url: request.url.clone(),
        body: request.body,
        follow: request.follow.map(|next| *next),
        requests: requests.clone(),
        probe: probe.clone(),
    };
    InterceptedRequest::new(
        request.url,
        request.method,
        request.post_data,
        Box::new(responder),
    )
}

/// Browser session replaying a fixed script of requests after `open_url`
///
/// Only requests matching the installed interception rules are surfaced.
/// Streams stay open until the session is closed.
pub struct ScriptedDriver {
    script: Vec<ScriptedRequest>,
    rules: Vec<InterceptRule>,
    requests: Option<UnboundedSender<InterceptedRequest>>,
    events: Option<UnboundedSender<BrowserEvent>>,
    detach_after_open: bool,
    fail_open: bool,
    probe: DriverProbe,
}

impl ScriptedDriver {
    pub fn new(script: Vec<ScriptedRequest>) -> Self {
        Self {
            script,
            rules: Vec::new(),
            requests: None,
            events: None,
            detach_after_open: false,
            fail_open: false,
            probe: DriverProbe::default(),
        }
    }

    /// Report the session as closed right after navigation
    pub fn detach_after_open(mut self) -> Self {
        self.detach_after_open = true;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn probe(&self) -> DriverProbe {
        self.probe.clone()
    }

    fn with_probe(mut self, probe: DriverProbe) -> Self {
        self.probe = probe;
        self
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn intercept(
        &mut self,
        rules: &[InterceptRule],
    ) -> Result<BoxStream<'static, InterceptedRequest>> {
        let (tx, rx) = mpsc::unbounded();
        self.rules = rules.to_vec();
        self.requests = Some(tx);
        Ok(rx.boxed())
    }

    async fn events(&mut self) -> Result<BoxStream<'static, BrowserEvent>> {
        let (tx, rx) = mpsc::unbounded();
        self.events = Some(tx);
        Ok(rx.boxed())
    }

    async fn open_url(&mut self, url: &str) -> Result<()> {
        if self.fail_open {
            return Err(Error::Browser(format!("net::ERR_CONNECTION_REFUSED at {url}")));
        }
        self.probe.state.opened.lock().unwrap().push(url.to_string());

        if let Some(tx) = &self.requests {
            for request in &self.script {
                if self.rules.iter().any(|r| pattern_matches(&r.pattern, &request.url)) {
                    let _ = tx.unbounded_send(paused(request.clone(), tx, &self.probe));
                }
            }
        }
        if let Some(events) = &self.events {
            let _ = events.unbounded_send(BrowserEvent::Navigated(url.to_string()));
            if self.detach_after_open {
                let _ = events.unbounded_send(BrowserEvent::Detached);
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.state.closes.fetch_add(1, Ordering::SeqCst);
        self.requests = None;
        self.events = None;
    }
}

/// Launcher handing out [`ScriptedDriver`]s that share one probe
pub struct ScriptedLauncher {
    script: Vec<ScriptedRequest>,
    timeout: Duration,
    fail_launch: bool,
    probe: DriverProbe,
}

impl ScriptedLauncher {
    pub fn new(script: Vec<ScriptedRequest>) -> Self {
        Self {
            script,
            timeout: Duration::from_secs(10),
            fail_launch: false,
            probe: DriverProbe::default(),
        }
    }

    /// A browser that serves nothing
    pub fn idle() -> Self {
        Self::new(vec![])
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::idle()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn probe(&self) -> DriverProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        self.probe.state.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(Error::Browser("failed to launch browser".into()));
        }
        Ok(Box::new(
            ScriptedDriver::new(self.script.clone()).with_probe(self.probe.clone()),
        ))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
