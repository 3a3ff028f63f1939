use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::device::{AudioDevice, CaptureDeviceError, StreamLease};
use super::meter::LevelMeter;
use crate::assessment::clock::Clock;
use crate::assessment::domain::{
    AssessmentQuestion, QuestionKind, Response, ResponsePayload, TimeLimit, VoiceRecording,
};

/// Ticks shown before recording starts on its own.
pub const COUNTDOWN_TICKS: u8 = 3;

/// Stages of a voice question, in the only order they can occur.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStage {
    Permission { error: Option<CaptureDeviceError> },
    Ready,
    Countdown { remaining: u8 },
    Recording { remaining_secs: u32 },
    Preview { recording: VoiceRecording },
    Submitted,
    Cancelled,
}

impl CaptureStage {
    pub fn label(&self) -> &'static str {
        match self {
            CaptureStage::Permission { .. } => "permission",
            CaptureStage::Ready => "ready",
            CaptureStage::Countdown { .. } => "countdown",
            CaptureStage::Recording { .. } => "recording",
            CaptureStage::Preview { .. } => "preview",
            CaptureStage::Submitted => "submitted",
            CaptureStage::Cancelled => "cancelled",
        }
    }
}

/// How a recording left the `recording` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEnd {
    ManualStop,
    Timeout,
    DeviceLost,
}

/// A finished voice answer ready for the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub response: Response,
    pub ended_by: RecordingEnd,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("question {0} is not a voice question")]
    NotVoiceQuestion(usize),
    #[error("cannot {action} while {stage}")]
    InvalidTransition {
        action: &'static str,
        stage: &'static str,
    },
    #[error("an audio stream is already open for this question")]
    StreamAlreadyOpen,
    #[error("capture cannot be cancelled while {0}")]
    NotCancellable(&'static str),
    #[error(transparent)]
    Device(#[from] CaptureDeviceError),
}

const CLAIM_OPEN: u8 = 0;
const CLAIM_RECORDING: u8 = 1;
const CLAIM_RELEASED: u8 = 2;

/// Outlives the recorder it was taken from: tells the issuer whether that recorder
/// ever started recording, or was cancelled or dropped without doing so.
#[derive(Debug, Clone, Default)]
pub struct RecorderClaim {
    state: Arc<AtomicU8>,
}

impl RecorderClaim {
    pub fn recording_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLAIM_RECORDING
    }

    pub fn released_unused(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLAIM_RELEASED
    }

    fn mark_recording(&self) {
        self.state.store(CLAIM_RECORDING, Ordering::Release);
    }

    fn release(&self) {
        let _ = self.state.compare_exchange(
            CLAIM_OPEN,
            CLAIM_RELEASED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Time-boxed recorder for one voice question.
///
/// Driven by explicit calls: `tick` once per second, `frame` at animation cadence,
/// and the candidate's `begin`/`stop`/`submit`. Time comes from the injected clock,
/// so the countdown and auto-submit paths run without real waiting. There is no
/// re-record: `preview` only offers `submit`.
pub struct VoiceCaptureEngine<C> {
    question_index: usize,
    time_limit: TimeLimit,
    clock: C,
    device: Box<dyn AudioDevice>,
    lease: StreamLease,
    meter: LevelMeter,
    stage: CaptureStage,
    text_revealed: bool,
    countdown_started: Option<DateTime<Utc>>,
    recording_started: Option<DateTime<Utc>>,
    captured: Vec<u8>,
    mime_type: String,
    claim: RecorderClaim,
}

impl<C: Clock> VoiceCaptureEngine<C> {
    pub fn new(
        question_index: usize,
        question: &AssessmentQuestion,
        device: Box<dyn AudioDevice>,
        clock: C,
    ) -> Result<Self, CaptureError> {
        if question.kind != QuestionKind::Voice {
            return Err(CaptureError::NotVoiceQuestion(question_index));
        }

        Ok(Self {
            question_index,
            time_limit: question.effective_time_limit(),
            clock,
            device,
            lease: StreamLease::empty(),
            meter: LevelMeter::default(),
            stage: CaptureStage::Permission { error: None },
            text_revealed: !question.hide_text_until_recording,
            countdown_started: None,
            recording_started: None,
            captured: Vec::new(),
            mime_type: String::new(),
            claim: RecorderClaim::default(),
        })
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn claim(&self) -> RecorderClaim {
        self.claim.clone()
    }

    pub fn stage(&self) -> &CaptureStage {
        &self.stage
    }

    pub fn time_limit(&self) -> TimeLimit {
        self.time_limit
    }

    pub fn text_visible(&self) -> bool {
        self.text_revealed
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.stage, CaptureStage::Recording { .. })
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.stage,
            CaptureStage::Submitted | CaptureStage::Cancelled
        )
    }

    pub fn is_stream_open(&self) -> bool {
        self.lease.is_held()
    }

    pub fn remaining_secs(&self) -> Option<u32> {
        match self.stage {
            CaptureStage::Recording { remaining_secs } => Some(remaining_secs),
            _ => None,
        }
    }

    pub fn levels(&self) -> &[u8] {
        self.meter.levels()
    }

    /// Ask for the microphone. A failure keeps the engine in `permission` for retry.
    pub fn request_permission(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.stage, CaptureStage::Permission { .. }) {
            return Err(self.invalid("request permission"));
        }
        if self.lease.is_held() {
            return Err(CaptureError::StreamAlreadyOpen);
        }

        match self.device.acquire() {
            Ok(stream) => {
                self.mime_type = stream.mime_type().to_string();
                self.lease.hold(stream);
                self.stage = CaptureStage::Ready;
                debug!(question_index = self.question_index, "microphone granted");
                Ok(())
            }
            Err(error) => {
                warn!(question_index = self.question_index, %error, "microphone unavailable");
                self.stage = CaptureStage::Permission {
                    error: Some(error.clone()),
                };
                Err(error.into())
            }
        }
    }

    /// Start the countdown. Always reveals the question text.
    pub fn begin(&mut self) -> Result<(), CaptureError> {
        if self.stage != CaptureStage::Ready {
            return Err(self.invalid("begin countdown"));
        }
        self.countdown_started = Some(self.clock.now());
        self.text_revealed = true;
        self.stage = CaptureStage::Countdown {
            remaining: COUNTDOWN_TICKS,
        };
        Ok(())
    }

    /// One-second timer tick. Returns an outcome when the time limit or a lost
    /// device ended the recording.
    pub fn tick(&mut self) -> Result<Option<CaptureOutcome>, CaptureError> {
        let now = self.clock.now();

        if matches!(self.stage, CaptureStage::Countdown { .. }) {
            let started = self.countdown_started.unwrap_or(now);
            let elapsed = (now - started).num_seconds().max(0);
            if elapsed >= i64::from(COUNTDOWN_TICKS) {
                self.start_recording(now)?;
            } else {
                self.stage = CaptureStage::Countdown {
                    remaining: COUNTDOWN_TICKS - elapsed as u8,
                };
            }
            return Ok(None);
        }

        if self.is_recording() {
            return Ok(self.poll_recording(now));
        }

        Ok(None)
    }

    /// Animation-frame callback feeding the visualizer.
    pub fn frame(&mut self) {
        if !self.is_recording() {
            return;
        }
        if let Some(stream) = self.lease.stream_mut() {
            self.meter.sample(stream);
        }
    }

    /// Manual stop. Moves to `preview` unless the limit has already elapsed, in
    /// which case the timeout path wins and the outcome is returned directly.
    pub fn stop(&mut self) -> Result<Option<CaptureOutcome>, CaptureError> {
        if !self.is_recording() {
            return Err(self.invalid("stop recording"));
        }

        let now = self.clock.now();
        if self.limit_elapsed(now) {
            return Ok(Some(self.finish_without_preview(now, RecordingEnd::Timeout)));
        }

        if let Some(stream) = self.lease.stream_mut() {
            if let Ok(bytes) = stream.drain() {
                self.captured.extend(bytes);
            }
            let tail = stream.stop();
            self.captured.extend(tail);
        }
        self.meter.cancel();

        let recording = VoiceRecording {
            audio: mem::take(&mut self.captured),
            mime_type: self.mime_type.clone(),
            duration_secs: self.recorded_secs(now),
        };
        info!(
            question_index = self.question_index,
            duration_secs = recording.duration_secs,
            "voice answer stopped by candidate"
        );
        self.stage = CaptureStage::Preview { recording };
        Ok(None)
    }

    /// Submit the previewed recording as-is.
    pub fn submit(&mut self) -> Result<CaptureOutcome, CaptureError> {
        let recording = match mem::replace(&mut self.stage, CaptureStage::Submitted) {
            CaptureStage::Preview { recording } => recording,
            other => {
                self.stage = other;
                return Err(self.invalid("submit"));
            }
        };
        self.lease.release();

        let now = self.clock.now();
        Ok(CaptureOutcome {
            response: Response {
                question_index: self.question_index,
                started_at: self.recording_started.unwrap_or(now),
                completed_at: now,
                is_auto_submitted: false,
                payload: ResponsePayload::Voice(recording),
            },
            ended_by: RecordingEnd::ManualStop,
        })
    }

    /// Leave the question before anything was recorded.
    pub fn cancel(&mut self) -> Result<(), CaptureError> {
        match self.stage {
            CaptureStage::Permission { .. } | CaptureStage::Ready => {
                self.meter.cancel();
                self.lease.release();
                self.claim.release();
                self.stage = CaptureStage::Cancelled;
                Ok(())
            }
            CaptureStage::Cancelled => Ok(()),
            ref other => Err(CaptureError::NotCancellable(other.label())),
        }
    }

    fn start_recording(&mut self, now: DateTime<Utc>) -> Result<(), CaptureError> {
        let started = match self.lease.stream_mut() {
            Some(stream) => stream.start(),
            None => Err(CaptureDeviceError::Disconnected),
        };

        if let Err(error) = started {
            warn!(question_index = self.question_index, %error, "recording failed to start");
            self.lease.release();
            self.stage = CaptureStage::Permission {
                error: Some(error.clone()),
            };
            return Err(error.into());
        }

        self.recording_started = Some(now);
        self.claim.mark_recording();
        self.captured.clear();
        self.meter.start();
        self.stage = CaptureStage::Recording {
            remaining_secs: self.time_limit.seconds(),
        };
        info!(
            question_index = self.question_index,
            limit = self.time_limit.label(),
            "voice recording started"
        );
        Ok(())
    }

    fn poll_recording(&mut self, now: DateTime<Utc>) -> Option<CaptureOutcome> {
        let drained = match self.lease.stream_mut() {
            Some(stream) => stream.drain(),
            None => Err(CaptureDeviceError::Disconnected),
        };

        match drained {
            Ok(bytes) => self.captured.extend(bytes),
            Err(error) => {
                warn!(
                    question_index = self.question_index,
                    %error,
                    captured_bytes = self.captured.len(),
                    "capture device lost mid-recording; finalizing captured audio"
                );
                let ended_by = if self.limit_elapsed(now) {
                    RecordingEnd::Timeout
                } else {
                    RecordingEnd::DeviceLost
                };
                return Some(self.finish_without_preview(now, ended_by));
            }
        }

        if self.limit_elapsed(now) {
            return Some(self.finish_without_preview(now, RecordingEnd::Timeout));
        }

        let limit_ms = i64::from(self.time_limit.seconds()) * 1000;
        let remaining_ms = limit_ms - self.elapsed_ms(now);
        self.stage = CaptureStage::Recording {
            remaining_secs: ((remaining_ms + 999) / 1000) as u32,
        };
        None
    }

    fn finish_without_preview(
        &mut self,
        now: DateTime<Utc>,
        ended_by: RecordingEnd,
    ) -> CaptureOutcome {
        if let Some(stream) = self.lease.stream_mut() {
            let tail = stream.stop();
            self.captured.extend(tail);
        }
        self.meter.cancel();
        self.lease.release();

        let auto_submitted = ended_by == RecordingEnd::Timeout;
        let recording = VoiceRecording {
            audio: mem::take(&mut self.captured),
            mime_type: self.mime_type.clone(),
            duration_secs: self.recorded_secs(now),
        };
        info!(
            question_index = self.question_index,
            auto_submitted,
            duration_secs = recording.duration_secs,
            "voice answer finalized without preview"
        );
        self.stage = CaptureStage::Submitted;

        CaptureOutcome {
            response: Response {
                question_index: self.question_index,
                started_at: self.recording_started.unwrap_or(now),
                completed_at: now,
                is_auto_submitted: auto_submitted,
                payload: ResponsePayload::Voice(recording),
            },
            ended_by,
        }
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        self.recording_started
            .map(|started| (now - started).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    fn limit_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_ms(now) >= i64::from(self.time_limit.seconds()) * 1000
    }

    fn recorded_secs(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = self.elapsed_ms(now) as f64 / 1000.0;
        elapsed.min(f64::from(self.time_limit.seconds()))
    }

    fn invalid(&self, action: &'static str) -> CaptureError {
        CaptureError::InvalidTransition {
            action,
            stage: self.stage.label(),
        }
    }
}

impl<C> Drop for VoiceCaptureEngine<C> {
    fn drop(&mut self) {
        self.claim.release();
    }
}
