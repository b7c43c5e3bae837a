//! Closed capability vocabulary for nodes.
//!
//! Adding a capability is a coordinated code change on both the gateway and
//! the companions; unknown strings received on the wire fail validation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FileManagement,
    ApplicationControl,
    SystemInfo,
    CodeExecution,
    Camera,
    Microphone,
    AudioOutput,
    Notifications,
    HomeAutomation,
    Clipboard,
    ScreenCapture,
}

impl Capability {
    /// Capabilities the local primary node offers out of the box.
    pub fn primary_defaults() -> Vec<Capability> {
        vec![
            Capability::FileManagement,
            Capability::ApplicationControl,
            Capability::SystemInfo,
            Capability::CodeExecution,
            Capability::Notifications,
            Capability::Clipboard,
            Capability::ScreenCapture,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::FileManagement => "file_management",
            Capability::ApplicationControl => "application_control",
            Capability::SystemInfo => "system_info",
            Capability::CodeExecution => "code_execution",
            Capability::Camera => "camera",
            Capability::Microphone => "microphone",
            Capability::AudioOutput => "audio_output",
            Capability::Notifications => "notifications",
            Capability::HomeAutomation => "home_automation",
            Capability::Clipboard => "clipboard",
            Capability::ScreenCapture => "screen_capture",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip_uses_snake_case() {
        let json = serde_json::to_string(&Capability::AudioOutput).unwrap();
        assert_eq!(json, "\"audio_output\"");
        let cap: Capability = serde_json::from_str("\"screen_capture\"").unwrap();
        assert_eq!(cap, Capability::ScreenCapture);
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let result: Result<Capability, _> = serde_json::from_str("\"mind_reading\"");
        assert!(result.is_err());
    }
}
