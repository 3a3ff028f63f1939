use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::engine::{CaptureOutcome, CaptureStage, VoiceCaptureEngine};
use crate::assessment::clock::Clock;

/// Candidate actions forwarded from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    RequestPermission,
    Begin,
    Stop,
    Submit,
    Cancel,
}

/// Timer cadences for the driver loop.
#[derive(Debug, Clone, Copy)]
pub struct DriverCadence {
    pub tick: Duration,
    pub frame: Duration,
}

impl Default for DriverCadence {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            frame: Duration::from_millis(16),
        }
    }
}

/// Run one voice question to completion.
///
/// Multiplexes the 1 Hz tick, the visualizer frame cadence and candidate commands.
/// Rejected commands and failed recording starts are logged and leave the engine
/// where it was. Returns `None` when the candidate cancelled, or when the command
/// channel closed while the engine waited on the candidate. Once recording, only
/// a stop, the time limit or a lost device ends it.
pub async fn drive<C: Clock>(
    engine: &mut VoiceCaptureEngine<C>,
    mut commands: mpsc::Receiver<CaptureCommand>,
    cadence: DriverCadence,
) -> Option<CaptureOutcome> {
    let mut ticker = time::interval(cadence.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = time::interval(cadence.frame);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut commands_open = true;

    loop {
        if engine.is_finished() {
            return None;
        }
        let recording = engine.is_recording();
        let waiting_on_candidate = !commands_open
            && !recording
            && !matches!(engine.stage(), CaptureStage::Countdown { .. });
        if waiting_on_candidate {
            debug!(
                question_index = engine.question_index(),
                stage = engine.stage().label(),
                "command channel closed; leaving voice question"
            );
            return None;
        }

        tokio::select! {
            biased;
            command = commands.recv(), if commands_open => {
                match command {
                    Some(command) => {
                        if let Some(outcome) = apply(engine, command) {
                            return Some(outcome);
                        }
                    }
                    None => commands_open = false,
                }
            }
            _ = ticker.tick() => {
                match engine.tick() {
                    Ok(Some(outcome)) => return Some(outcome),
                    Ok(None) => {}
                    Err(error) => warn!(
                        question_index = engine.question_index(),
                        %error,
                        "capture tick failed"
                    ),
                }
            }
            _ = frames.tick(), if recording => engine.frame(),
        }
    }
}

fn apply<C: Clock>(
    engine: &mut VoiceCaptureEngine<C>,
    command: CaptureCommand,
) -> Option<CaptureOutcome> {
    let result = match command {
        CaptureCommand::RequestPermission => engine.request_permission().map(|_| None),
        CaptureCommand::Begin => engine.begin().map(|_| None),
        CaptureCommand::Stop => engine.stop(),
        CaptureCommand::Submit => engine.submit().map(Some),
        CaptureCommand::Cancel => engine.cancel().map(|_| None),
    };

    match result {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(
                question_index = engine.question_index(),
                ?command,
                %error,
                "capture command rejected"
            );
            None
        }
    }
}
