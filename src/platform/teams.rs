use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::{
    click_when_ready, type_when_ready, ChatSelectors, JoinError, Locator, ObserverSpec,
    PlatformAdapter, RenderSurface, SurfaceError,
};
use crate::invite::Platform;
use crate::session::SessionContext;

const NAME_INPUT: &str = r#"input[placeholder="Enter name"]"#;
const JOIN_OPTIONS: &str = r#"button[aria-label="Join options"]"#;
const MUTE_BUTTON: &str = r#"button[aria-label="Mute microphone"]"#;
const CAMERA_BUTTON: &str = r#"button[aria-label="Turn camera off"]"#;
const JOIN_BUTTON: &str = r#"button[aria-label="Join meeting"]"#;
const CONVERSATION_BUTTON: &str = r#"button[aria-label="Show conversation"]"#;
const CHAT_INPUT: &str = r#"div[role="textbox"][aria-label*="message"]"#;
const ACTIVE_SPEAKER: &str = r#"[data-tid="active-speaker-name"]"#;
const LEAVE_BUTTON: &str = r#"[aria-label="Leave the call"]"#;

/// Teams joins straight from the invite's meeting link.
pub struct TeamsAdapter {
    element_timeout: Duration,
}

impl TeamsAdapter {
    pub fn new(element_timeout: Duration) -> Self {
        Self { element_timeout }
    }
}

#[async_trait]
impl PlatformAdapter for TeamsAdapter {
    fn platform(&self) -> Platform {
        Platform::Teams
    }

    async fn join(
        &self,
        surface: &dyn RenderSurface,
        ctx: &SessionContext,
    ) -> Result<(), JoinError> {
        info!("Getting meeting link");
        surface
            .goto(&ctx.invite.meeting_id)
            .await
            .map_err(JoinError::Navigation)?;

        info!("Entering name");
        type_when_ready(
            surface,
            &Locator::css(NAME_INPUT),
            &ctx.identity,
            true,
            self.element_timeout,
        )
        .await
        .map_err(JoinError::NameEntry)?;

        for (step, control) in [
            ("Opening join options", JOIN_OPTIONS),
            ("Muting microphone", MUTE_BUTTON),
            ("Turning camera off", CAMERA_BUTTON),
            ("Clicking join button", JOIN_BUTTON),
        ] {
            info!("{}", step);
            click_when_ready(surface, &Locator::css(control), self.element_timeout)
                .await
                .map_err(JoinError::JoinControl)?;
        }
        Ok(())
    }

    fn admission_signal(&self) -> Locator {
        Locator::css(CONVERSATION_BUTTON)
    }

    fn chat_input(&self) -> Locator {
        Locator::css(CHAT_INPUT)
    }

    fn speaker_observer(&self) -> ObserverSpec {
        ObserverSpec::ActiveSpeaker(Locator::css(ACTIVE_SPEAKER))
    }

    fn chat_observer(&self) -> ObserverSpec {
        ObserverSpec::Chat(ChatSelectors {
            frame: None,
            item: ".ts-message-list > *".to_string(),
            sender: ".message-author".to_string(),
            text: ".message-body".to_string(),
            attachment: None,
        })
    }

    /// The call controls disappear once the meeting is over.
    async fn wait_for_end(
        &self,
        surface: &dyn RenderSurface,
        timeout: Duration,
    ) -> Result<(), SurfaceError> {
        surface
            .wait_for_absent(&Locator::css(LEAVE_BUTTON), timeout)
            .await
    }
}
