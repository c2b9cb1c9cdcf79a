//! Webex guest join. Almost the whole meeting UI lives inside one iframe.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::{
    click_when_ready, type_when_ready, ChatSelectors, JoinError, Locator, ObserverSpec,
    PlatformAdapter, RenderSurface, SurfaceError,
};
use crate::invite::Platform;
use crate::session::SessionContext;

const JOIN_URL: &str = "https://signin.webex.com/join";
const APP_FRAME: &str = r#"iframe[name="thinIframe"]"#;

const MEETING_INPUT: &str = "#join-meeting-form";
const MEETING_FOUND: &str = ".meet_message_H1";
const NAME_INPUT: &str = r#"input[aria-labelledby="nameLabel"]"#;
const EMAIL_INPUT: &str = r#"input[aria-labelledby="emailLabel"]"#;
const COOKIE_BUTTON: &str = ".cookie-manage-close-handler";
const CHAT_INPUT: &str = r#"textarea[placeholder="Type your message here"]"#;
const SPEAKING_TILE: &str = r#"div[class*="videoitem-in-speaking"]"#;
const MEETING_END: &str = ".style-end-message-2PkYs";

pub struct WebexAdapter {
    element_timeout: Duration,
    guest_email: String,
}

impl WebexAdapter {
    pub fn new(element_timeout: Duration, guest_email: String) -> Self {
        Self {
            element_timeout,
            guest_email,
        }
    }

    fn in_app(locator: Locator) -> Locator {
        locator.in_frame(APP_FRAME)
    }

    /// Force the browser client instead of the desktop app prompt.
    pub fn launch_url(current: &str) -> String {
        let separator = if current.contains('?') { '&' } else { '?' };
        format!("{}{}launchApp=true", current, separator)
    }
}

#[async_trait]
impl PlatformAdapter for WebexAdapter {
    fn platform(&self) -> Platform {
        Platform::Webex
    }

    async fn join(
        &self,
        surface: &dyn RenderSurface,
        ctx: &SessionContext,
    ) -> Result<(), JoinError> {
        let timeout = self.element_timeout;

        info!("Getting meeting link");
        surface.goto(JOIN_URL).await.map_err(JoinError::Navigation)?;

        info!("Entering meeting ID");
        type_when_ready(
            surface,
            &Locator::css(MEETING_INPUT),
            &ctx.invite.meeting_id,
            true,
            timeout,
        )
        .await
        .map_err(JoinError::Navigation)?;

        info!("Launching app");
        surface
            .wait_for(&Locator::css(MEETING_FOUND), timeout)
            .await
            .map_err(JoinError::Navigation)?;
        let current = surface.current_url().await.map_err(JoinError::Navigation)?;
        surface
            .goto(&Self::launch_url(&current))
            .await
            .map_err(JoinError::Navigation)?;

        info!("Entering name");
        type_when_ready(
            surface,
            &Self::in_app(Locator::css(NAME_INPUT)),
            &ctx.identity,
            false,
            timeout,
        )
        .await
        .map_err(JoinError::NameEntry)?;

        info!("Entering email");
        type_when_ready(
            surface,
            &Self::in_app(Locator::css(EMAIL_INPUT)),
            &self.guest_email,
            true,
            timeout,
        )
        .await
        .map_err(JoinError::NameEntry)?;

        info!("Dismissing cookie banner");
        click_when_ready(surface, &Locator::css(COOKIE_BUTTON), timeout)
            .await
            .map_err(JoinError::JoinControl)?;

        info!("Turning off microphone and video");
        for label in ["Mute", "Stop video"] {
            click_when_ready(surface, &Self::in_app(Locator::text(label)), timeout)
                .await
                .map_err(JoinError::JoinControl)?;
        }

        info!("Clicking join button");
        click_when_ready(
            surface,
            &Self::in_app(Locator::text("Join meeting")),
            timeout,
        )
        .await
        .map_err(JoinError::JoinControl)
    }

    fn admission_signal(&self) -> Locator {
        Self::in_app(Locator::text("Chat"))
    }

    fn chat_input(&self) -> Locator {
        Self::in_app(Locator::css(CHAT_INPUT))
    }

    fn speaker_observer(&self) -> ObserverSpec {
        ObserverSpec::ActiveSpeaker(Self::in_app(Locator::css(SPEAKING_TILE)))
    }

    fn chat_observer(&self) -> ObserverSpec {
        ObserverSpec::Chat(ChatSelectors {
            frame: Some(APP_FRAME.to_string()),
            item: r#"div[class^="style-chat-box"] > *"#.to_string(),
            sender: r#"h3[class^="style-chat-label"]"#.to_string(),
            text: r#"span[class^="style-chat-msg"]"#.to_string(),
            attachment: None,
        })
    }

    async fn wait_for_end(
        &self,
        surface: &dyn RenderSurface,
        timeout: Duration,
    ) -> Result<(), SurfaceError> {
        surface
            .wait_for(&Self::in_app(Locator::css(MEETING_END)), timeout)
            .await
    }
}
