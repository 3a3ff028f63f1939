use super::device::AudioStream;

pub const LEVEL_BINS: usize = 32;

/// Fixed-size visualizer buffer fed at animation-frame cadence.
///
/// Feedback only; nothing in the capture state machine reads it.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    levels: [u8; LEVEL_BINS],
    frames: u64,
    running: bool,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self {
            levels: [0; LEVEL_BINS],
            frames: 0,
            running: false,
        }
    }
}

impl LevelMeter {
    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn sample(&mut self, stream: &mut dyn AudioStream) {
        if !self.running {
            return;
        }
        stream.levels(&mut self.levels);
        self.frames += 1;
    }

    /// Stops sampling and zeroes the bars.
    pub fn cancel(&mut self) {
        self.running = false;
        self.levels = [0; LEVEL_BINS];
    }

    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
