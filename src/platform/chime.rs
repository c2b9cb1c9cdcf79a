use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::{
    click_when_ready, type_when_ready, ChatSelectors, JoinError, Locator, ObserverSpec,
    PlatformAdapter, RenderSurface, SurfaceError,
};
use crate::invite::Platform;
use crate::session::SessionContext;

const MEETING_URL: &str = "https://app.chime.aws/meetings/";

const NAME_INPUT: &str = "#name";
const MUTE_BUTTON: &str = r#"button[data-testid="button"][aria-label^="Mute"]"#;
const VIDEO_BUTTON: &str = r#"button[data-testid="button"][aria-label^="Turn off video"]"#;
const JOIN_BUTTON: &str = r#"button[data-testid="button"][aria-label="Join"]"#;
const CHAT_PANEL_BUTTON: &str = r#"button[data-testid="button"][aria-label^="Open chat panel"]"#;
const CHAT_INPUT: &str = r#"textarea[placeholder="Message all attendees"]"#;
const ACTIVE_SPEAKER: &str = ".activeSpeakerCell .ppi5x8cvVEQgbl_hLeiRW";
const MEETING_END: &str = ".MeetingEndContainer__subTitle, .Hq90rPeHQDqoB-F07ML2t";

pub struct ChimeAdapter {
    element_timeout: Duration,
}

impl ChimeAdapter {
    pub fn new(element_timeout: Duration) -> Self {
        Self { element_timeout }
    }

    pub fn meeting_url(meeting_id: &str) -> String {
        format!("{}{}", MEETING_URL, meeting_id.trim())
    }
}

#[async_trait]
impl PlatformAdapter for ChimeAdapter {
    fn platform(&self) -> Platform {
        Platform::Chime
    }

    async fn join(
        &self,
        surface: &dyn RenderSurface,
        ctx: &SessionContext,
    ) -> Result<(), JoinError> {
        info!("Getting meeting link");
        surface
            .goto(&Self::meeting_url(&ctx.invite.meeting_id))
            .await
            .map_err(JoinError::Navigation)?;

        info!("Entering scribe name");
        type_when_ready(
            surface,
            &Locator::css(NAME_INPUT),
            &ctx.identity,
            true,
            self.element_timeout,
        )
        .await
        .map_err(JoinError::NameEntry)?;

        info!("Turning off microphone and video");
        for control in [MUTE_BUTTON, VIDEO_BUTTON] {
            click_when_ready(surface, &Locator::css(control), self.element_timeout)
                .await
                .map_err(JoinError::JoinControl)?;
        }

        info!("Clicking join button");
        click_when_ready(surface, &Locator::css(JOIN_BUTTON), self.element_timeout)
            .await
            .map_err(JoinError::JoinControl)
    }

    fn admission_signal(&self) -> Locator {
        Locator::css(CHAT_PANEL_BUTTON)
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
            item: ".chatMessage".to_string(),
            sender: r#"h3[data-testid="chat-bubble-sender-name"]"#.to_string(),
            text: ".Linkify".to_string(),
            attachment: Some(".SLFfm3Dwo5MfFzks4uM11".to_string()),
        })
    }

    async fn wait_for_end(
        &self,
        surface: &dyn RenderSurface,
        timeout: Duration,
    ) -> Result<(), SurfaceError> {
        surface.wait_for(&Locator::css(MEETING_END), timeout).await
    }

    fn system_senders(&self) -> &'static [&'static str] {
        &["Amazon Chime"]
    }
}
