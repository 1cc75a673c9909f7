use std::sync::Arc;

use super::{
    camera::{CaptureDevice, CommandCaptureDevice},
    face::{PresenceDetector, SkinToneDetector},
    input::InputHook,
    window::{CommandWindowInspector, WindowInspector},
};
use crate::settings::UserSettings;

/// Optional platform features, resolved once at startup. Sessions branch on
/// which entries are present; a session with none of them is a plain timer.
#[derive(Clone)]
pub struct Capabilities {
    pub camera: Option<Arc<dyn CaptureDevice>>,
    pub detector: Arc<dyn PresenceDetector>,
    pub input: Option<Arc<dyn InputHook>>,
    pub window: Option<Arc<dyn WindowInspector>>,
}

impl Capabilities {
    pub fn none() -> Self {
        Self {
            camera: None,
            detector: Arc::new(SkinToneDetector::default()),
            input: None,
            window: None,
        }
    }

    pub async fn detect(settings: &UserSettings) -> Self {
        let camera = settings
            .camera_command
            .clone()
            .and_then(CommandCaptureDevice::new)
            .map(|device| Arc::new(device) as Arc<dyn CaptureDevice>);

        let window = CommandWindowInspector::probe()
            .await
            .map(|inspector| Arc::new(inspector) as Arc<dyn WindowInspector>);

        let capabilities = Self {
            camera,
            input: detect_input(),
            window,
            ..Self::none()
        };
        log::info!("capabilities: {}", capabilities.summary());
        capabilities
    }

    pub fn summary(&self) -> String {
        let flag = |present: bool| if present { "available" } else { "unavailable" };
        format!(
            "camera {}, input hook {}, window inspector {}",
            flag(self.camera.is_some()),
            flag(self.input.is_some()),
            flag(self.window.is_some())
        )
    }
}

#[cfg(feature = "input-hook")]
fn detect_input() -> Option<Arc<dyn InputHook>> {
    super::input::RdevInputHook::probe().map(|hook| Arc::new(hook) as Arc<dyn InputHook>)
}

#[cfg(not(feature = "input-hook"))]
fn detect_input() -> Option<Arc<dyn InputHook>> {
    None
}
