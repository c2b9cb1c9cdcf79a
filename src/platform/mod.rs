//! Meeting platforms.
//!
//! Each platform only supplies its DOM policy: how to get from a meeting id to
//! the lobby, what admission looks like, where chat lives and how the meeting
//! ends. The session itself (admission wait, introduction, observers, command
//! handling, end wait) is the shared [`flow::SessionFlow`].

pub mod chime;
pub mod flow;
pub mod surface;
pub mod teams;
pub mod webdriver;
pub mod webex;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::invite::Platform;
use crate::session::SessionContext;

pub use chime::ChimeAdapter;
pub use flow::{SessionFlow, SessionOutcome};
pub use surface::{
    ChatSelectors, Locator, Observation, ObserverSpec, RenderSurface, Selector, SurfaceError,
    SurfaceFactory,
};
pub use teams::TeamsAdapter;
pub use webdriver::{WebDriverFactory, WebDriverSurface};
pub use webex::WebexAdapter;

/// Reasons a session ends before anything could be recorded.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Your scribe could not open the meeting")]
    Navigation(#[source] SurfaceError),

    #[error("Your scribe was unable to join the meeting")]
    NameEntry(#[source] SurfaceError),

    #[error("Your scribe could not use the meeting controls")]
    JoinControl(#[source] SurfaceError),

    #[error("Your scribe was not admitted into the meeting")]
    NotAdmitted { waited_ms: u64 },
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Open the meeting, enter the bot's name, turn off outgoing media and
    /// ask to join.
    async fn join(&self, surface: &dyn RenderSurface, ctx: &SessionContext)
        -> Result<(), JoinError>;

    /// Appears once the bot has been let in.
    fn admission_signal(&self) -> Locator;

    async fn open_chat(&self, surface: &dyn RenderSurface) -> Result<(), SurfaceError> {
        surface.click(&self.admission_signal()).await
    }

    fn chat_input(&self) -> Locator;

    fn speaker_observer(&self) -> ObserverSpec;

    fn chat_observer(&self) -> ObserverSpec;

    /// Resolve when the meeting is over; `Timeout` when `timeout` elapses first.
    async fn wait_for_end(
        &self,
        surface: &dyn RenderSurface,
        timeout: Duration,
    ) -> Result<(), SurfaceError>;

    /// Chat senders that are the platform itself, never a participant.
    fn system_senders(&self) -> &'static [&'static str] {
        &[]
    }
}

pub fn adapter_for(platform: Platform, config: &Config) -> Box<dyn PlatformAdapter> {
    let element_timeout = Duration::from_millis(config.browser.element_timeout_ms);
    match platform {
        Platform::Chime => Box::new(ChimeAdapter::new(element_timeout)),
        Platform::Webex => Box::new(WebexAdapter::new(
            element_timeout,
            config.delivery.sender.clone(),
        )),
        Platform::Teams => Box::new(TeamsAdapter::new(element_timeout)),
    }
}

pub(crate) async fn click_when_ready(
    surface: &dyn RenderSurface,
    locator: &Locator,
    timeout: Duration,
) -> Result<(), SurfaceError> {
    surface.wait_for(locator, timeout).await?;
    surface.click(locator).await
}

pub(crate) async fn type_when_ready(
    surface: &dyn RenderSurface,
    locator: &Locator,
    text: &str,
    submit: bool,
    timeout: Duration,
) -> Result<(), SurfaceError> {
    surface.wait_for(locator, timeout).await?;
    surface.type_text(locator, text, submit).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_by_platform() {
        let config = Config::default();
        for platform in [Platform::Chime, Platform::Webex, Platform::Teams] {
            assert_eq!(adapter_for(platform, &config).platform(), platform);
        }
    }
}
