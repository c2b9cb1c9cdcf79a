//! Fake collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use scribe::db;
use scribe::platform::{
    Locator, Observation, ObserverSpec, RenderSurface, SurfaceError, SurfaceFactory,
};
use scribe::scheduler::{ScheduleEntry, SqliteTriggerBackend, TriggerBackend};
use scribe::summary::{Summary, SummaryDelivery};

/// What a fake page did, shared with the test after the surface is gone.
#[derive(Default)]
pub struct PageLog {
    pub visited: Mutex<Vec<String>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub clicked: Mutex<Vec<String>>,
}

impl PageLog {
    pub fn typed_text(&self) -> Vec<String> {
        self.typed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

/// A page where every element exists except the ones listed as missing.
/// Waiting for a missing element runs out the full timeout.
pub struct FakeSurface {
    missing: HashSet<String>,
    chat_script: Vec<Observation>,
    fail_speaker: bool,
    fail_chat: bool,
    log: Arc<PageLog>,
}

impl FakeSurface {
    pub fn new(log: Arc<PageLog>) -> Self {
        Self {
            missing: HashSet::new(),
            chat_script: Vec::new(),
            fail_speaker: false,
            fail_chat: false,
            log,
        }
    }

    pub fn missing(mut self, locator: &Locator) -> Self {
        self.missing.insert(locator.to_string());
        self
    }

    /// Registering the active-speaker observer fails.
    pub fn failing_speaker_observer(mut self) -> Self {
        self.fail_speaker = true;
        self
    }

    /// Registering the chat observer fails.
    pub fn failing_chat_observer(mut self) -> Self {
        self.fail_chat = true;
        self
    }

    /// Chat messages that show up once the chat observer is registered.
    pub fn with_chat(mut self, script: Vec<Observation>) -> Self {
        self.chat_script = script;
        self
    }
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn goto(&self, url: &str) -> Result<(), SurfaceError> {
        self.log.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, SurfaceError> {
        Ok(self
            .log
            .visited
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default())
    }

    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<(), SurfaceError> {
        if self.missing.contains(&locator.to_string()) {
            tokio::time::sleep(timeout).await;
            return Err(SurfaceError::timeout(locator, timeout));
        }
        Ok(())
    }

    async fn wait_for_absent(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SurfaceError> {
        if self.missing.contains(&locator.to_string()) {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(SurfaceError::timeout(locator, timeout))
    }

    async fn click(&self, locator: &Locator) -> Result<(), SurfaceError> {
        if self.missing.contains(&locator.to_string()) {
            return Err(SurfaceError::NotFound(locator.to_string()));
        }
        self.log.clicked.lock().unwrap().push(locator.to_string());
        Ok(())
    }

    async fn type_text(
        &self,
        locator: &Locator,
        text: &str,
        _submit: bool,
    ) -> Result<(), SurfaceError> {
        self.log
            .typed
            .lock()
            .unwrap()
            .push((locator.to_string(), text.to_string()));
        Ok(())
    }

    async fn observe(
        &self,
        spec: ObserverSpec,
    ) -> Result<mpsc::Receiver<Observation>, SurfaceError> {
        match &spec {
            ObserverSpec::ActiveSpeaker(locator) if self.fail_speaker => {
                return Err(SurfaceError::NotFound(locator.to_string()));
            }
            ObserverSpec::Chat(selectors) if self.fail_chat => {
                return Err(SurfaceError::NotFound(selectors.item.clone()));
            }
            _ => {}
        }

        let (tx, rx) = mpsc::channel(64);
        if let ObserverSpec::Chat(_) = spec {
            let script = self.chat_script.clone();
            tokio::spawn(async move {
                for observation in script {
                    if tx.send(observation).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(rx)
    }

    async fn close(&self) -> Result<(), SurfaceError> {
        Ok(())
    }
}

/// Hands out one prepared surface.
pub struct OneSurface(pub Mutex<Option<FakeSurface>>);

impl OneSurface {
    pub fn new(surface: FakeSurface) -> Self {
        Self(Mutex::new(Some(surface)))
    }
}

#[async_trait]
impl SurfaceFactory for OneSurface {
    async fn create(&self) -> Result<Box<dyn RenderSurface>> {
        match self.0.lock().unwrap().take() {
            Some(surface) => Ok(Box::new(surface)),
            None => bail!("surface already used"),
        }
    }
}

#[derive(Default)]
pub struct CapturingDelivery {
    pub delivered: Mutex<Vec<Summary>>,
}

#[async_trait]
impl SummaryDelivery for CapturingDelivery {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn deliver(&self, summary: &Summary) -> Result<()> {
        self.delivered.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

pub fn chat(sender: &str, text: &str) -> Observation {
    Observation::Chat {
        sender: Some(sender.to_string()),
        text: text.to_string(),
        attachment: None,
    }
}

/// Trigger backend whose next `put_failures` writes fail. With
/// `write_before_fail` the write lands before the error is reported, like a
/// lost acknowledgement.
pub struct FlakyBackend {
    pub inner: SqliteTriggerBackend,
    pub put_failures: AtomicU32,
    pub write_before_fail: bool,
    pub puts: AtomicU32,
}

impl FlakyBackend {
    pub fn new(put_failures: u32, write_before_fail: bool) -> Self {
        Self {
            inner: SqliteTriggerBackend::new(db::in_memory().unwrap()),
            put_failures: AtomicU32::new(put_failures),
            write_before_fail,
            puts: AtomicU32::new(0),
        }
    }

    pub fn heal(&self) {
        self.put_failures.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl TriggerBackend for FlakyBackend {
    async fn get(&self, invite_id: &str) -> Result<Option<ScheduleEntry>> {
        self.inner.get(invite_id).await
    }

    async fn put(&self, entry: &ScheduleEntry) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .put_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            if self.write_before_fail {
                self.inner.put(entry).await?;
            }
            bail!("injected trigger backend failure");
        }
        self.inner.put(entry).await
    }

    async fn delete(&self, invite_id: &str) -> Result<bool> {
        self.inner.delete(invite_id).await
    }

    async fn list(&self) -> Result<Vec<ScheduleEntry>> {
        self.inner.list().await
    }
}
