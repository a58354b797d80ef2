//! Chrome session driven over the DevTools protocol

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    cdp::browser_protocol::{
        fetch::{
            ContinueRequestParams, EnableParams, EventRequestPaused, FulfillRequestParams,
            GetResponseBodyParams, HeaderEntry, RequestPattern, RequestStage,
        },
        inspector::EventDetached,
        page::{EventFrameNavigated, NavigateParams},
    },
};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tokio::{sync::oneshot, task::JoinHandle, time};
use tracing::{debug, info, warn};

use super::{
    BrowserDriver, BrowserEvent, BrowserLauncher, InterceptRule, InterceptStage,
    InterceptedRequest, RequestResponder, WebConfig,
};
use crate::error::{Error, Result};

/// Time allowed for Chrome to exit after a close request before it is killed
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lock files Chromium leaves behind when it is not shut down cleanly
const SINGLETON_FILES: [&str; 3] = ["SingletonLock", "SingletonSocket", "SingletonCookie"];

fn browser_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Browser(format!("{context}: {err}"))
}

/// Launches Chrome sessions with a persistent profile
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    config: WebConfig,
}

impl ChromeLauncher {
    pub fn new(config: WebConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        Ok(Box::new(ChromeDriver::launch(&self.config).await?))
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

pub struct ChromeDriver {
    browser: Option<Browser>,
    page: Page,
    handler: Option<JoinHandle<()>>,
    handler_closed: Option<oneshot::Receiver<()>>,
}

impl ChromeDriver {
    pub async fn launch(config: &WebConfig) -> Result<Self> {
        info!("Launching browser with profile {}", config.data_dir.display());
        fs::create_dir_all(&config.data_dir)?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&config.data_dir)
            .viewport(None)
            .args(vec![
                "--no-first-run",
                "--no-default-browser-check",
                "--start-maximized",
                "--disable-blink-features=AutomationControlled", // Prevent detection of automation
            ]);
        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &config.custom_executable {
            builder = builder.chrome_executable(executable);
        }
        let browser_config = builder
            .build()
            .map_err(|e| browser_error("invalid browser configuration", e))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| browser_error("failed to launch Chrome", e))?;

        let (closed_tx, closed_rx) = oneshot::channel();
        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
            let _ = closed_tx.send(());
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.kill().await;
                handler.abort();
                return Err(browser_error("failed to open page", e));
            }
        };

        Ok(Self {
            browser: Some(browser),
            page,
            handler: Some(handler),
            handler_closed: Some(closed_rx),
        })
    }
}

fn request_pattern(rule: &InterceptRule) -> RequestPattern {
    let stage = match rule.stage {
        InterceptStage::Request => RequestStage::Request,
        InterceptStage::Response => RequestStage::Response,
    };
    RequestPattern::builder()
        .url_pattern(rule.pattern.clone())
        .request_stage(stage)
        .build()
}

/// Post data as delivered by the protocol, entries concatenated
fn post_data(event: &EventRequestPaused) -> Option<String> {
    event.request.post_data_entries.as_ref().map(|entries| {
        entries
            .iter()
            .filter_map(|e| e.bytes.as_ref())
            .filter_map(|b| std::str::from_utf8(b.as_ref()).ok())
            .collect::<String>()
    })
}

struct ChromeResponder {
    page: Page,
    paused: Arc<EventRequestPaused>,
}

#[async_trait]
impl RequestResponder for ChromeResponder {
    async fn response_body(&mut self) -> Result<String> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(self.paused.request_id.clone()))
            .await
            .map_err(|e| browser_error("failed to read response body", e))?;

        if response.result.base64_encoded {
            let bytes = general_purpose::STANDARD
                .decode(&response.result.body)
                .map_err(|e| Error::MalformedArtifact(format!("response body is not base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| Error::MalformedArtifact(format!("response body is not UTF-8: {e}")))
        } else {
            Ok(response.result.body.clone())
        }
    }

    async fn redirect(self: Box<Self>, location: &str) -> Result<()> {
        let replaced = ["location", "content-location", "content-type"];
        let mut headers: Vec<HeaderEntry> = self
            .paused
            .response_headers
            .iter()
            .flatten()
            .filter(|h| !replaced.contains(&h.name.to_ascii_lowercase().as_str()))
            .cloned()
            .collect();
        headers.extend([
            HeaderEntry::new("Location", location),
            HeaderEntry::new("Content-Location", location),
            HeaderEntry::new("Content-Type", "text/html; charset=utf-8"),
        ]);

        let params = FulfillRequestParams::builder()
            .request_id(self.paused.request_id.clone())
            .response_code(301)
            .response_headers(headers)
            .build()
            .map_err(|e| browser_error("invalid redirect", e))?;

        self.page
            .execute(params)
            .await
            .map_err(|e| browser_error("failed to redirect request", e))?;
        Ok(())
    }

    async fn resume(self: Box<Self>) -> Result<()> {
        self.page
            .execute(ContinueRequestParams::new(self.paused.request_id.clone()))
            .await
            .map_err(|e| browser_error("failed to continue request", e))?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn intercept(
        &mut self,
        rules: &[InterceptRule],
    ) -> Result<BoxStream<'static, InterceptedRequest>> {
        let paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| browser_error("failed to listen for paused requests", e))?;

        let params = EnableParams::builder()
            .patterns(rules.iter().map(request_pattern).collect::<Vec<_>>())
            .build();
        self.page
            .execute(params)
            .await
            .map_err(|e| browser_error("failed to enable request interception", e))?;

        let page = self.page.clone();
        Ok(paused
            .map(move |event| {
                InterceptedRequest::new(
                    event.request.url.clone(),
                    event.request.method.clone(),
                    post_data(&event),
                    Box::new(ChromeResponder {
                        page: page.clone(),
                        paused: event,
                    }),
                )
            })
            .boxed())
    }

    async fn events(&mut self) -> Result<BoxStream<'static, BrowserEvent>> {
        let navigated = self
            .page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(|e| browser_error("failed to listen for navigation", e))?
            .map(|event| BrowserEvent::Navigated(event.frame.url.clone()));

        let detached = self
            .page
            .event_listener::<EventDetached>()
            .await
            .map_err(|e| browser_error("failed to listen for detach", e))?
            .map(|event| {
                debug!("Inspector detached: {}", event.reason);
                BrowserEvent::Detached
            });

        let handler_closed = self.handler_closed.take();
        let process_exit = stream::once(async move {
            match handler_closed {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => futures::future::pending::<()>().await,
            }
            BrowserEvent::Detached
        });

        Ok(stream::select(stream::select(navigated, detached), process_exit).boxed())
    }

    async fn open_url(&mut self, url: &str) -> Result<()> {
        let response = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| browser_error("failed to navigate", e))?;

        match &response.result.error_text {
            Some(error) => Err(Error::Browser(format!("failed to navigate to {url}: {error}"))),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };

        if let Err(e) = browser.close().await {
            debug!("Browser close request failed: {}", e);
        }
        match time::timeout(CLOSE_GRACE_PERIOD, browser.wait()).await {
            Ok(_) => debug!("Browser exited"),
            Err(_) => {
                warn!("Browser did not exit within {:?}, killing it", CLOSE_GRACE_PERIOD);
                if let Some(Err(e)) = browser.kill().await {
                    warn!("Failed to kill browser: {}", e);
                }
            }
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

/// Remove stale Chromium lock files from the profile directory
///
/// Best-effort: returns the files removed, failures are logged.
pub fn force_cleanup(data_dir: &Path) -> Vec<PathBuf> {
    SINGLETON_FILES
        .iter()
        .map(|name| data_dir.join(name))
        // lock files are dangling symlinks once the owning process is gone
        .filter(|path| path.symlink_metadata().is_ok())
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => {
                info!("Removed {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_force_cleanup_removes_singleton_files() {
        let dir = TempDir::new().unwrap();
        for name in ["SingletonLock", "SingletonCookie", "Preferences"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink("host-12345", dir.path().join("SingletonSocket")).unwrap();

        let removed = force_cleanup(dir.path());

        assert!(removed.iter().all(|p| p.starts_with(dir.path())));
        for name in SINGLETON_FILES {
            assert!(dir.path().join(name).symlink_metadata().is_err(), "{name}");
        }
        assert!(dir.path().join("Preferences").exists());
    }

    #[test]
    fn test_force_cleanup_on_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(force_cleanup(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn test_request_pattern_stage() {
        let pattern = request_pattern(&InterceptRule {
            pattern: "https://signin.aws.amazon.com/saml*".into(),
            stage: InterceptStage::Response,
        });
        assert_eq!(
            pattern.url_pattern.as_deref(),
            Some("https://signin.aws.amazon.com/saml*")
        );
        assert_eq!(pattern.request_stage, Some(RequestStage::Response));
    }
}
