use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Failures reported by the microphone layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureDeviceError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no audio input device available")]
    Unavailable,
    #[error("audio device disconnected")]
    Disconnected,
    #[error("audio device failure: {0}")]
    Failure(String),
}

/// Source of microphone streams; one acquisition per permission grant.
pub trait AudioDevice: Send {
    fn acquire(&mut self) -> Result<Box<dyn AudioStream>, CaptureDeviceError>;
}

/// A live capture stream plus its analysis tap.
pub trait AudioStream: Send {
    fn mime_type(&self) -> &str;
    fn start(&mut self) -> Result<(), CaptureDeviceError>;
    /// Encoded audio captured since the previous drain.
    fn drain(&mut self) -> Result<Vec<u8>, CaptureDeviceError>;
    /// Fill `levels` with the current frequency magnitudes.
    fn levels(&mut self, levels: &mut [u8]);
    /// Stop capturing and flush whatever the encoder still holds.
    fn stop(&mut self) -> Vec<u8>;
    /// Stop tracks and disconnect the analysis node.
    fn release(&mut self);
}

/// Owns the single open stream for a question and releases it on every exit path.
pub(crate) struct StreamLease {
    stream: Option<Box<dyn AudioStream>>,
}

impl StreamLease {
    pub(crate) fn empty() -> Self {
        Self { stream: None }
    }

    pub(crate) fn hold(&mut self, stream: Box<dyn AudioStream>) {
        self.release();
        self.stream = Some(stream);
    }

    pub(crate) fn is_held(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut (dyn AudioStream + 'static)> {
        self.stream.as_deref_mut()
    }

    pub(crate) fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Counters shared between a simulated microphone and whoever inspects it.
#[derive(Debug, Default)]
pub struct DeviceStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl DeviceStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn open_streams(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

/// Deterministic microphone used by the demo and scenario tests.
#[derive(Debug, Clone)]
pub struct SimulatedMicrophone {
    deny_permission: bool,
    bytes_per_drain: usize,
    disconnect_after_drains: Option<usize>,
    stats: Arc<DeviceStats>,
}

impl Default for SimulatedMicrophone {
    fn default() -> Self {
        Self {
            deny_permission: false,
            bytes_per_drain: 160,
            disconnect_after_drains: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }
}

impl SimulatedMicrophone {
    pub fn denying() -> Self {
        Self {
            deny_permission: true,
            ..Self::default()
        }
    }

    pub fn disconnecting_after(drains: usize) -> Self {
        Self {
            disconnect_after_drains: Some(drains),
            ..Self::default()
        }
    }

    pub fn allow(&mut self) {
        self.deny_permission = false;
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }
}

impl AudioDevice for SimulatedMicrophone {
    fn acquire(&mut self) -> Result<Box<dyn AudioStream>, CaptureDeviceError> {
        if self.deny_permission {
            return Err(CaptureDeviceError::PermissionDenied);
        }
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedStream {
            bytes_per_drain: self.bytes_per_drain,
            disconnect_after_drains: self.disconnect_after_drains,
            drains: 0,
            recording: false,
            released: false,
            phase: 0,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct SimulatedStream {
    bytes_per_drain: usize,
    disconnect_after_drains: Option<usize>,
    drains: usize,
    recording: bool,
    released: bool,
    phase: u8,
    stats: Arc<DeviceStats>,
}

impl AudioStream for SimulatedStream {
    fn mime_type(&self) -> &str {
        "audio/webm"
    }

    fn start(&mut self) -> Result<(), CaptureDeviceError> {
        if self.released {
            return Err(CaptureDeviceError::Disconnected);
        }
        self.recording = true;
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<u8>, CaptureDeviceError> {
        if !self.recording {
            return Ok(Vec::new());
        }
        if self
            .disconnect_after_drains
            .is_some_and(|limit| self.drains >= limit)
        {
            self.recording = false;
            return Err(CaptureDeviceError::Disconnected);
        }
        self.drains += 1;
        Ok(vec![self.drains as u8; self.bytes_per_drain])
    }

    fn levels(&mut self, levels: &mut [u8]) {
        self.phase = self.phase.wrapping_add(7);
        for (offset, level) in levels.iter_mut().enumerate() {
            *level = self.phase.wrapping_add((offset as u8).wrapping_mul(13));
        }
    }

    fn stop(&mut self) -> Vec<u8> {
        if !self.recording {
            return Vec::new();
        }
        self.recording = false;
        vec![0; self.bytes_per_drain / 2]
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.recording = false;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_releases_on_drop() {
        let mut microphone = SimulatedMicrophone::default();
        let stats = microphone.stats();
        {
            let mut lease = StreamLease::empty();
            lease.hold(microphone.acquire().expect("granted"));
            assert!(lease.is_held());
            assert_eq!(stats.open_streams(), 1);
        }
        assert_eq!(stats.open_streams(), 0);
        assert_eq!(stats.released(), 1);
    }

    #[test]
    fn denied_microphone_never_opens_a_stream() {
        let mut microphone = SimulatedMicrophone::denying();
        assert!(matches!(
            microphone.acquire(),
            Err(CaptureDeviceError::PermissionDenied)
        ));
        assert_eq!(microphone.stats().acquired(), 0);
    }

    #[test]
    fn disconnect_surfaces_after_configured_drains() {
        let mut microphone = SimulatedMicrophone::disconnecting_after(1);
        let mut stream = microphone.acquire().expect("granted");
        stream.start().expect("start");
        assert_eq!(stream.drain().expect("first drain").len(), 160);
        assert_eq!(stream.drain(), Err(CaptureDeviceError::Disconnected));
    }
}
