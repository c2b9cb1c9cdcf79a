//! [`RenderSurface`] over the W3C WebDriver HTTP protocol.
//!
//! Works against chromedriver or any Selenium endpoint. WebDriver keeps one
//! "current frame" per session, so every command sequence that switches frames
//! runs under a single lock. Observers are polling tasks sharing that lock;
//! they stop when the surface is closed or dropped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::surface::{
    ChatSelectors, Locator, Observation, ObserverSpec, RenderSurface, Selector, SurfaceError,
    SurfaceFactory,
};
use crate::config::BrowserConfig;
use crate::session::Attachment;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735e9a0ff6";
const ENTER_KEY: &str = "\u{E007}";
const WAIT_POLL: Duration = Duration::from_millis(250);
const OBSERVATION_BUFFER: usize = 64;

const CHROME_ARGS: &[&str] = &[
    "--window-size=1920,1080",
    "--use-fake-ui-for-media-stream",
    "--use-fake-device-for-media-stream",
    "--disable-notifications",
    "--disable-extensions",
    "--disable-crash-reporter",
    "--disable-dev-shm-usage",
    "--no-sandbox",
];

struct Driver {
    client: reqwest::Client,
    session_url: String,
    /// Held for any command sequence that depends on the current frame
    frame_lock: Mutex<()>,
}

impl Driver {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SurfaceError> {
        let url = format!("{}{}", self.session_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SurfaceError::Driver(e.to_string()))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SurfaceError::Driver(format!("Unreadable WebDriver response: {}", e)))?;

        if status.is_success() {
            return Ok(payload.get("value").cloned().unwrap_or(Value::Null));
        }

        let error = payload["value"]["error"].as_str().unwrap_or_default();
        let message = payload["value"]["message"].as_str().unwrap_or_default();
        Err(match error {
            "invalid session id" | "no such window" => SurfaceError::Closed,
            "no such element" | "stale element reference" => {
                SurfaceError::NotFound(message.to_string())
            }
            _ => SurfaceError::Driver(format!("{} ({}): {}", error, status, message)),
        })
    }

    async fn switch_to(&self, frame: Option<&str>) -> Result<(), SurfaceError> {
        self.command(Method::POST, "/frame", Some(json!({ "id": Value::Null })))
            .await?;
        if let Some(frame) = frame {
            let element = self
                .find_all(None, &Selector::Css(frame.to_string()))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| SurfaceError::NotFound(frame.to_string()))?;
            let mut reference = serde_json::Map::new();
            reference.insert(ELEMENT_KEY.to_string(), Value::String(element));
            self.command(Method::POST, "/frame", Some(json!({ "id": reference })))
                .await?;
        }
        Ok(())
    }

    /// Elements matching `selector`, searched from `parent` or the document.
    async fn find_all(
        &self,
        parent: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<String>, SurfaceError> {
        let (using, value) = match selector {
            Selector::Css(css) => ("css selector", css.clone()),
            Selector::Text(text) => ("xpath", text_xpath(text)),
        };
        let path = match parent {
            Some(parent) => format!("/element/{}/elements", parent),
            None => "/elements".to_string(),
        };

        let found = self
            .command(
                Method::POST,
                &path,
                Some(json!({ "using": using, "value": value })),
            )
            .await?;
        Ok(found
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|e| e[ELEMENT_KEY].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Switch into the locator's frame and resolve its first match.
    async fn locate(&self, locator: &Locator) -> Result<String, SurfaceError> {
        self.switch_to(locator.frame.as_deref()).await?;
        self.find_all(None, &locator.selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SurfaceError::NotFound(locator.to_string()))
    }

    async fn text_of(&self, element: &str) -> Result<String, SurfaceError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &str, name: &str) -> Result<Option<String>, SurfaceError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{}", element, name),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn child_text(
        &self,
        parent: &str,
        css: &str,
    ) -> Result<Option<String>, SurfaceError> {
        let found = self
            .find_all(Some(parent), &Selector::Css(css.to_string()))
            .await?;
        match found.first() {
            Some(element) => Ok(Some(self.text_of(element).await?)),
            None => Ok(None),
        }
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool, SurfaceError> {
        let _frame = self.frame_lock.lock().await;
        match self.locate(locator).await {
            Ok(_) => Ok(true),
            Err(SurfaceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// XPath for an element whose own text is exactly `text`.
fn text_xpath(text: &str) -> String {
    let literal = if text.contains('"') {
        format!("'{}'", text)
    } else {
        format!("\"{}\"", text)
    };
    format!("//*[normalize-space(text())={}]", literal)
}

pub struct WebDriverSurface {
    driver: Arc<Driver>,
    base_url: String,
    observer_poll: Duration,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl WebDriverSurface {
    pub async fn connect(config: &BrowserConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        let base_url = config.webdriver_url.trim_end_matches('/').to_string();

        let mut args: Vec<&str> = CHROME_ARGS.to_vec();
        if config.headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let response: Value = client
            .post(format!("{}/session", base_url))
            .json(&capabilities)
            .send()
            .await
            .with_context(|| format!("Failed to reach WebDriver at {}", base_url))?
            .json()
            .await
            .context("Failed to read WebDriver session response")?;
        let session_id = response["value"]["sessionId"]
            .as_str()
            .with_context(|| format!("WebDriver refused to start a session: {}", response))?
            .to_string();

        info!("Browser session {} started", session_id);

        Ok(Self {
            driver: Arc::new(Driver {
                client,
                session_url: format!("{}/session/{}", base_url, session_id),
                frame_lock: Mutex::new(()),
            }),
            base_url,
            observer_poll: Duration::from_millis(config.observer_poll_ms),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), SurfaceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SurfaceError::Closed);
        }
        Ok(())
    }

    async fn poll_until<F, Fut>(
        &self,
        locator: &Locator,
        timeout: Duration,
        mut done: F,
    ) -> Result<(), SurfaceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<bool, SurfaceError>> + Send,
    {
        self.ensure_open()?;
        let poll = async {
            loop {
                if done().await? {
                    return Ok(());
                }
                tokio::time::sleep(WAIT_POLL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .unwrap_or_else(|_| Err(SurfaceError::timeout(locator, timeout)))
    }
}

#[async_trait]
impl RenderSurface for WebDriverSurface {
    async fn goto(&self, url: &str) -> Result<(), SurfaceError> {
        self.ensure_open()?;
        debug!("Navigating to {}", url);
        self.driver
            .command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> Result<String, SurfaceError> {
        self.ensure_open()?;
        let value = self.driver.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<(), SurfaceError> {
        let driver = &self.driver;
        self.poll_until(locator, timeout, || driver.is_present(locator))
            .await
    }

    async fn wait_for_absent(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SurfaceError> {
        let driver = &self.driver;
        self.poll_until(locator, timeout, || async move {
            driver.is_present(locator).await.map(|present| !present)
        })
        .await
    }

    async fn click(&self, locator: &Locator) -> Result<(), SurfaceError> {
        self.ensure_open()?;
        let _frame = self.driver.frame_lock.lock().await;
        let element = self.driver.locate(locator).await?;
        self.driver
            .command(
                Method::POST,
                &format!("/element/{}/click", element),
                Some(json!({})),
            )
            .await
            .map(|_| ())
    }

    async fn type_text(
        &self,
        locator: &Locator,
        text: &str,
        submit: bool,
    ) -> Result<(), SurfaceError> {
        self.ensure_open()?;
        let _frame = self.driver.frame_lock.lock().await;
        let element = self.driver.locate(locator).await?;

        let mut keys = text.to_string();
        if submit {
            keys.push_str(ENTER_KEY);
        }
        self.driver
            .command(
                Method::POST,
                &format!("/element/{}/value", element),
                Some(json!({ "text": keys })),
            )
            .await
            .map(|_| ())
    }

    async fn observe(&self, spec: ObserverSpec) -> Result<mpsc::Receiver<Observation>, SurfaceError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(OBSERVATION_BUFFER);
        let driver = self.driver.clone();
        let cancel = self.cancel.child_token();
        let poll = self.observer_poll;

        match spec {
            ObserverSpec::ActiveSpeaker(locator) => {
                // Fail registration if the label is not on the page at all
                if !driver.is_present(&locator).await? {
                    return Err(SurfaceError::NotFound(locator.to_string()));
                }
                tokio::spawn(poll_speaker(driver, locator, poll, tx, cancel));
            }
            ObserverSpec::Chat(selectors) => {
                // Only messages sent after registration are reported
                let seen = {
                    let _frame = driver.frame_lock.lock().await;
                    driver.switch_to(selectors.frame.as_deref()).await?;
                    driver
                        .find_all(None, &Selector::Css(selectors.item.clone()))
                        .await?
                        .len()
                };
                tokio::spawn(poll_chat(driver, selectors, seen, poll, tx, cancel));
            }
        }
        Ok(rx)
    }

    async fn close(&self) -> Result<(), SurfaceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        match self.driver.command(Method::DELETE, "", None).await {
            Ok(_) | Err(SurfaceError::Closed) => {
                info!("Browser session closed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for WebDriverSurface {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropped without close(): end the browser session in the background
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let driver = self.driver.clone();
            let base_url = self.base_url.clone();
            handle.spawn(async move {
                if let Err(e) = driver.command(Method::DELETE, "", None).await {
                    warn!("Failed to end browser session at {}: {}", base_url, e);
                }
            });
        }
    }
}

async fn poll_speaker(
    driver: Arc<Driver>,
    locator: Locator,
    poll: Duration,
    tx: mpsc::Sender<Observation>,
    cancel: CancellationToken,
) {
    let mut last = String::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let current = {
            let _frame = driver.frame_lock.lock().await;
            match driver.locate(&locator).await {
                Ok(element) => driver.text_of(&element).await,
                Err(e) => Err(e),
            }
        };
        match current {
            Ok(name) if name != last => {
                last = name.clone();
                if tx.send(Observation::Speaker(name)).await.is_err() {
                    break;
                }
            }
            Ok(_) | Err(SurfaceError::NotFound(_)) => {}
            Err(SurfaceError::Closed) => break,
            Err(e) => debug!("Speaker poll failed: {}", e),
        }
    }
    debug!("Speaker polling stopped");
}

async fn poll_chat(
    driver: Arc<Driver>,
    selectors: ChatSelectors,
    mut seen: usize,
    poll: Duration,
    tx: mpsc::Sender<Observation>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let batch = {
            let _frame = driver.frame_lock.lock().await;
            read_new_messages(&driver, &selectors, &mut seen).await
        };
        match batch {
            Ok(observations) => {
                for observation in observations {
                    if tx.send(observation).await.is_err() {
                        return;
                    }
                }
            }
            Err(SurfaceError::Closed) => break,
            Err(e) => debug!("Chat poll failed: {}", e),
        }
    }
    debug!("Chat polling stopped");
}

async fn read_new_messages(
    driver: &Driver,
    selectors: &ChatSelectors,
    seen: &mut usize,
) -> Result<Vec<Observation>, SurfaceError> {
    driver.switch_to(selectors.frame.as_deref()).await?;
    let items = driver
        .find_all(None, &Selector::Css(selectors.item.clone()))
        .await?;
    // The list was re-rendered shorter; start counting from here
    if items.len() < *seen {
        *seen = items.len();
    }

    let mut observations = Vec::new();
    for item in &items[*seen..] {
        let sender = driver.child_text(item, &selectors.sender).await?;
        let text = driver
            .child_text(item, &selectors.text)
            .await?
            .unwrap_or_default();

        let attachment = match &selectors.attachment {
            Some(css) => {
                let found = driver
                    .find_all(Some(item), &Selector::Css(css.clone()))
                    .await?;
                match found.first() {
                    Some(element) => {
                        let file_name = driver.attribute(element, "title").await?;
                        let link = driver.attribute(element, "href").await?;
                        file_name.zip(link).map(|(file_name, link)| Attachment { file_name, link })
                    }
                    None => None,
                }
            }
            None => None,
        };

        observations.push(Observation::Chat {
            sender,
            text,
            attachment,
        });
    }
    *seen = items.len();
    Ok(observations)
}

/// Opens a new browser session per call.
pub struct WebDriverFactory {
    config: BrowserConfig,
}

impl WebDriverFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SurfaceFactory for WebDriverFactory {
    async fn create(&self) -> Result<Box<dyn RenderSurface>> {
        Ok(Box::new(WebDriverSurface::connect(&self.config).await?))
    }
}
