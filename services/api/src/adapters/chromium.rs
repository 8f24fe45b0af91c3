//! services/api/src/adapters/chromium.rs
//!
//! This module provides the concrete implementation for the `BrowserLauncher`
//! and `PageDriver` ports using a Chromium browser driven over CDP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams, Viewport};
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as WindowViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use edubase_core::ports::{
    BrowserLauncher, ImageFormat, LaunchOptions, LoadState, Locator, PageDriver, PortError,
    PortResult, ScreenshotOptions,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// How often element and load-state waits re-check the page.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// No new network resources for this long counts as network-idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

fn browser_err(e: impl std::fmt::Display) -> PortError {
    PortError::Browser(e.to_string())
}

fn timeout_err(what: &str, last_error: Option<PortError>) -> PortError {
    match last_error {
        Some(e) => PortError::Timeout(format!("{} (last error: {})", what, e)),
        None => PortError::Timeout(what.to_string()),
    }
}

/// Re-runs `probe` every [`POLL_INTERVAL`] until it reports `true` or `deadline`
/// passes. Probe errors count as "not yet": script evaluation fails while the
/// page is being replaced by a navigation.
async fn poll_until<F, Fut>(deadline: Instant, what: &str, mut probe: F) -> PortResult<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = PortResult<bool>>,
{
    let mut last_error = None;
    loop {
        match probe().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                debug!("{}: {}", what, e);
                last_error = Some(e);
            }
        }
        if Instant::now() >= deadline {
            return Err(timeout_err(what, last_error));
        }
        sleep(POLL_INTERVAL).await;
    }
}

//=========================================================================================
// Launcher
//=========================================================================================

/// Starts a local Chromium (or Chrome) process per launch.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> PortResult<Arc<dyn PageDriver>> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .viewport(WindowViewport {
                width: options.width,
                height: options.height,
                ..WindowViewport::default()
            })
            .launch_timeout(options.timeout)
            .request_timeout(options.timeout)
            .no_sandbox()
            .arg("--disable-dev-shm-usage");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(browser_err)?;

        info!(
            "Launching browser ({}x{}, headless: {})",
            options.width, options.height, options.headless
        );
        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;

        // The handler drives the CDP connection and must be polled for the browser to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut browser = browser;
                let _ = browser.close().await;
                handler_task.abort();
                return Err(browser_err(e));
            }
        };

        Ok(Arc::new(ChromiumPage {
            page,
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
        }))
    }
}

//=========================================================================================
// Page
//=========================================================================================

/// One browser with a single page.
pub struct ChromiumPage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Wraps `body` in a script that binds `el` to the element addressed by
/// `locator` and returns `null` when any step matches nothing.
fn locator_script(locator: &Locator, body: &str) -> String {
    let steps: Vec<(&str, usize)> = locator.steps().collect();
    let steps = serde_json::to_string(&steps).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    let el = document;
    for (const [selector, nth] of {steps}) {{
        el = el.querySelectorAll(selector)[nth];
        if (!el) {{
            return null;
        }}
    }}
    {body}
}})()"#
    )
}

const VISIBLE_BODY: &str = r#"const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    return rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';"#;

const RECT_BODY: &str = r#"el.scrollIntoView({ block: 'start', inline: 'start' });
    const rect = el.getBoundingClientRect();
    return { x: rect.left + window.scrollX, y: rect.top + window.scrollY, width: rect.width, height: rect.height };"#;

const CLEAR_STORAGE_SCRIPT: &str =
    "(() => { try { localStorage.clear(); sessionStorage.clear(); } catch (e) {} return true; })()";

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

impl ChromiumPage {
    async fn eval(&self, script: String) -> PortResult<Value> {
        let result = self.page.evaluate(script).await.map_err(browser_err)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn query(&self, locator: &Locator, body: &str) -> PortResult<Value> {
        self.eval(locator_script(locator, body)).await
    }

    /// Resolves a locator to a CDP element handle for input events.
    async fn element(&self, locator: &Locator) -> PortResult<Element> {
        let mut current: Option<Element> = None;
        for (selector, nth) in locator.steps() {
            let matches = match &current {
                None => self.page.find_elements(selector).await,
                Some(parent) => parent.find_elements(selector).await,
            }
            .map_err(|e| PortError::NotFound(format!("{}: {}", selector, e)))?;
            current = Some(
                matches
                    .into_iter()
                    .nth(nth)
                    .ok_or_else(|| PortError::NotFound(format!("{} (match {})", selector, nth)))?,
            );
        }
        current.ok_or_else(|| PortError::NotFound("empty locator".to_string()))
    }

    async fn ready_state(&self) -> PortResult<String> {
        Ok(self
            .eval("document.readyState".to_string())
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn wait_for_network_quiet(&self, deadline: Instant) -> PortResult<()> {
        let mut last_count = None;
        let mut quiet_since = Instant::now();
        let mut last_error = None;
        loop {
            match self.eval(RESOURCE_COUNT_SCRIPT.to_string()).await {
                Ok(value) => {
                    let count = value.as_u64();
                    if count != last_count {
                        last_count = count;
                        quiet_since = Instant::now();
                    } else if quiet_since.elapsed() >= NETWORK_QUIET {
                        return Ok(());
                    }
                }
                // A navigation restarts the quiet period.
                Err(e) => {
                    debug!("waiting for network idle: {}", e);
                    last_count = None;
                    quiet_since = Instant::now();
                    last_error = Some(e);
                }
            }
            if Instant::now() >= deadline {
                return Err(timeout_err("waiting for network idle", last_error));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str, state: LoadState, timeout: Duration) -> PortResult<()> {
        debug!("Navigating to {}", url);
        let navigation = self.page.execute(NavigateParams::new(url));
        let response = tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| PortError::Timeout(format!("navigating to {}", url)))?
            .map_err(browser_err)?;
        if let Some(error) = &response.result.error_text {
            return Err(PortError::Browser(format!("navigating to {}: {}", url, error)));
        }
        self.wait_for_load_state(state, timeout).await
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> PortResult<()> {
        let deadline = Instant::now() + timeout;
        poll_until(deadline, &format!("waiting for {:?}", state), || async {
            let ready = self.ready_state().await?;
            Ok(match state {
                LoadState::DomContentLoaded => ready == "interactive" || ready == "complete",
                LoadState::Load | LoadState::NetworkIdle => ready == "complete",
            })
        })
        .await?;
        if state == LoadState::NetworkIdle {
            self.wait_for_network_quiet(deadline).await?;
        }
        Ok(())
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> PortResult<()> {
        let deadline = Instant::now() + timeout;
        let what = format!("waiting for {} to be visible", locator.selector());
        poll_until(deadline, &what, || self.is_visible(locator)).await
    }

    async fn is_visible(&self, locator: &Locator) -> PortResult<bool> {
        Ok(self.query(locator, VISIBLE_BODY).await?.as_bool().unwrap_or(false))
    }

    async fn count(&self, selector: &str) -> PortResult<usize> {
        let selector = serde_json::to_string(selector).map_err(browser_err)?;
        let count = self
            .eval(format!("document.querySelectorAll({}).length", selector))
            .await?;
        Ok(count.as_u64().unwrap_or(0) as usize)
    }

    async fn inner_text(&self, locator: &Locator) -> PortResult<String> {
        match self.query(locator, "return el.innerText;").await? {
            Value::String(text) => Ok(text),
            Value::Null => Err(PortError::NotFound(locator.selector().to_string())),
            other => Ok(other.to_string()),
        }
    }

    async fn attribute(&self, locator: &Locator, name: &str) -> PortResult<Option<String>> {
        let name = serde_json::to_string(name).map_err(browser_err)?;
        let body = format!("return {{ value: el.getAttribute({}) }};", name);
        match self.query(locator, &body).await? {
            Value::Null => Err(PortError::NotFound(locator.selector().to_string())),
            found => Ok(found
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string)),
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()> {
        self.query(locator, "el.focus(); el.value = ''; return true;")
            .await?;
        let element = self.element(locator).await?;
        element.click().await.map_err(browser_err)?;
        element.type_str(value).await.map_err(browser_err)?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> PortResult<()> {
        let element = self.element(locator).await?;
        element.click().await.map_err(browser_err)?;
        Ok(())
    }

    async fn screenshot(
        &self,
        locator: &Locator,
        path: &Path,
        options: ScreenshotOptions,
    ) -> PortResult<()> {
        let rect: Rect = match self.query(locator, RECT_BODY).await? {
            Value::Null => return Err(PortError::NotFound(locator.selector().to_string())),
            value => serde_json::from_value(value).map_err(browser_err)?,
        };
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(PortError::NotFound(format!(
                "{} has an empty bounding box",
                locator.selector()
            )));
        }

        let format = match options.format {
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            ImageFormat::Png => CaptureScreenshotFormat::Png,
        };
        let mut params = ScreenshotParams::builder().format(format).clip(Viewport {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            scale: 1.0,
        });
        if options.format == ImageFormat::Jpeg {
            params = params.quality(i64::from(options.quality));
        }

        self.page
            .save_screenshot(params.build(), path)
            .await
            .map_err(browser_err)?;
        debug!("Captured {} to {}", locator.selector(), path.display());
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> PortResult<Value> {
        self.eval(script.to_string()).await
    }

    async fn clear_browser_state(&self) -> PortResult<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(browser_err)?;
        self.eval(CLEAR_STORAGE_SCRIPT.to_string()).await?;
        Ok(())
    }

    async fn current_url(&self) -> PortResult<String> {
        Ok(self.page.url().await.map_err(browser_err)?.unwrap_or_default())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> PortResult<()> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                i64::from(width),
                i64::from(height),
                1.0,
                false,
            ))
            .await
            .map_err(browser_err)?;
        Ok(())
    }

    async fn close(&self) -> PortResult<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = self.page.clone().close().await {
            debug!("Closing the page failed: {}", e);
        }
        if let Err(e) = browser.close().await {
            warn!("Closing the browser failed: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Waiting for the browser process failed: {}", e);
        }
        if let Some(handler) = self.handler_task.lock().await.take() {
            handler.abort();
        }
        info!("Browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_script_embeds_every_step() {
        let locator = Locator::new("#libraryItems > li").nth(2).child(".title");
        let script = locator_script(&locator, "return el.innerText;");
        assert!(
            script.contains(r##"[["#libraryItems > li",2],[".title",0]]"##),
            "{script}"
        );
        assert!(script.contains("return el.innerText;"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_poll_through_navigation_errors() {
        let mut probes = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        poll_until(deadline, "waiting for page", || {
            probes += 1;
            let attempt = probes;
            async move {
                match attempt {
                    1 => Err(PortError::Browser("Execution context was destroyed".into())),
                    2 => Ok(false),
                    _ => Ok(true),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(probes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_report_the_last_error_at_the_deadline() {
        let deadline = Instant::now() + Duration::from_millis(350);
        let err = poll_until(deadline, "waiting for page", || async {
            Err::<bool, _>(PortError::Browser("Cannot find context".into()))
        })
        .await
        .unwrap_err();
        match err {
            PortError::Timeout(message) => {
                assert!(message.contains("waiting for page"), "{message}");
                assert!(message.contains("Cannot find context"), "{message}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn locator_script_escapes_quotes() {
        let locator = Locator::new("input[name='login']");
        let script = locator_script(&locator, "return true;");
        assert!(script.contains(r#"[["input[name='login']",0]]"#), "{script}");
    }
}
