//! Local media capture settings.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::platform::{AudioConstraints, CaptureSettings, FacingMode};

/// Local media capture settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Media {
    /// Processing applied to the captured microphone audio.
    pub audio: AudioProcessing,

    /// Camera capture settings. Used by video calls only.
    pub video: Video,
}

/// Processing applied to the captured microphone audio.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct AudioProcessing {
    /// Defaults to `true`.
    #[default = true]
    pub echo_cancellation: bool,

    /// Defaults to `true`.
    #[default = true]
    pub auto_gain_control: bool,

    /// Defaults to `true`.
    #[default = true]
    pub noise_suppression: bool,

    /// Defaults to `true`.
    #[default = true]
    pub high_pass_filter: bool,
}

impl From<AudioProcessing> for AudioConstraints {
    fn from(conf: AudioProcessing) -> Self {
        Self {
            echo_cancellation: conf.echo_cancellation,
            auto_gain_control: conf.auto_gain_control,
            noise_suppression: conf.noise_suppression,
            high_pass_filter: conf.high_pass_filter,
        }
    }
}

/// Camera capture settings.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Video {
    /// Width of captured frames in pixels.
    ///
    /// Defaults to `640`.
    #[default = 640]
    pub width: u32,

    /// Height of captured frames in pixels.
    ///
    /// Defaults to `480`.
    #[default = 480]
    pub height: u32,

    /// Frames per second to capture with.
    ///
    /// Defaults to `30`.
    #[default = 30]
    pub frame_rate: u32,

    /// Camera to start capturing from.
    ///
    /// Defaults to [`FacingMode::Front`].
    pub facing: FacingMode,
}

impl From<Video> for CaptureSettings {
    #[inline]
    fn from(conf: Video) -> Self {
        Self {
            width: conf.width,
            height: conf.height,
            frame_rate: conf.frame_rate,
        }
    }
}
