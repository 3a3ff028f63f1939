//! Voice answer capture: microphone permission, countdown, time-boxed recording
//! and preview, plus the async loop that feeds it timer ticks.

mod device;
mod driver;
mod engine;
mod meter;

pub use device::{
    AudioDevice, AudioStream, CaptureDeviceError, DeviceStats, SimulatedMicrophone,
};
pub use driver::{drive, CaptureCommand, DriverCadence};
pub use engine::{
    CaptureError, CaptureOutcome, CaptureStage, RecorderClaim, RecordingEnd, VoiceCaptureEngine,
    COUNTDOWN_TICKS,
};
pub use meter::{LevelMeter, LEVEL_BINS};
