//! The page a session drives.
//!
//! [`RenderSurface`] is the narrow contract the join flows need from a browser:
//! navigate, wait for an element, click, type, and watch parts of the page
//! without blocking the flow. Observers push into bounded channels.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::Attachment;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("Timed out after {ms} ms waiting for {selector}")]
    Timeout { selector: String, ms: u64 },

    #[error("No element matches {0}")]
    NotFound(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Render surface is closed")]
    Closed,
}

impl SurfaceError {
    pub fn timeout(locator: &Locator, timeout: Duration) -> Self {
        Self::Timeout {
            selector: locator.to_string(),
            ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    /// Element whose visible text is exactly this
    Text(String),
}

/// Where to find an element: a selector, optionally inside an iframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// CSS selector of the enclosing iframe
    pub frame: Option<String>,
    pub selector: Selector,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            frame: None,
            selector: Selector::Css(css.into()),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            frame: None,
            selector: Selector::Text(text.into()),
        }
    }

    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = Some(frame.into());
        self
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(frame) = &self.frame {
            write!(f, "{} >> ", frame)?;
        }
        match &self.selector {
            Selector::Css(css) => f.write_str(css),
            Selector::Text(text) => write!(f, "text=\"{}\"", text),
        }
    }
}

/// How to read chat messages off a platform's chat panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSelectors {
    pub frame: Option<String>,
    /// One element per message, in display order
    pub item: String,
    /// Relative to the item. Missing on grouped follow-up messages.
    pub sender: String,
    /// Relative to the item
    pub text: String,
    /// Relative to the item; `title` is the file name, `href` the link
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverSpec {
    /// Report the text of an active-speaker label each time it changes
    ActiveSpeaker(Locator),
    /// Report every chat message added after registration
    Chat(ChatSelectors),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Speaker(String),
    Chat {
        sender: Option<String>,
        text: String,
        attachment: Option<Attachment>,
    },
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), SurfaceError>;

    async fn current_url(&self) -> Result<String, SurfaceError>;

    /// Wait until an element matches.
    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<(), SurfaceError>;

    /// Wait until no element matches.
    async fn wait_for_absent(&self, locator: &Locator, timeout: Duration)
        -> Result<(), SurfaceError>;

    async fn click(&self, locator: &Locator) -> Result<(), SurfaceError>;

    /// Type into the element, pressing Enter afterwards when `submit` is set.
    async fn type_text(&self, locator: &Locator, text: &str, submit: bool)
        -> Result<(), SurfaceError>;

    /// Start watching part of the page. The receiver closes when the surface does.
    async fn observe(&self, spec: ObserverSpec) -> Result<mpsc::Receiver<Observation>, SurfaceError>;

    /// Release the browser. Safe to call more than once.
    async fn close(&self) -> Result<(), SurfaceError>;
}

/// Launches a fresh surface for each session.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn create(&self) -> anyhow::Result<Box<dyn RenderSurface>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::css("#name").to_string(), "#name");
        assert_eq!(
            Locator::text("Mute")
                .in_frame("iframe[name=\"thinIframe\"]")
                .to_string(),
            "iframe[name=\"thinIframe\"] >> text=\"Mute\""
        );
    }

    #[test]
    fn test_timeout_error() {
        let err = SurfaceError::timeout(&Locator::css("#chat"), Duration::from_secs(5));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timed out after 5000 ms waiting for #chat");
    }

    #[test]
    fn test_timeout_saturates_instead_of_wrapping() {
        let err = SurfaceError::timeout(&Locator::css("#chat"), Duration::MAX);
        assert_eq!(
            err,
            SurfaceError::Timeout {
                selector: "#chat".to_string(),
                ms: u64::MAX,
            }
        );
    }
}
