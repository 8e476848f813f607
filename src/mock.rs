//! Mock media provider and stream for testing without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::traits::{
    CaptureError, Dimensions, FrameReceiver, MediaConstraints, MediaProvider, MediaStream, Result,
    StreamFrame,
};

type SenderSlot = Arc<Mutex<Option<Arc<watch::Sender<Option<StreamFrame>>>>>>;

/// Scripted acquisition outcome.
#[derive(Debug, Clone)]
enum MockOutcome {
    /// Grant access and latch this frame as the first delivery.
    Grant(StreamFrame),
    /// Grant access but end the stream before any frame is delivered.
    DeadStream,
    /// Deny access with the given reason.
    Deny(String),
}

/// Mock device-media provider with a scripted outcome.
///
/// Exposes counters and handles so tests can observe acquisitions, track
/// stops, and drive the frame channel of the granted stream.
pub struct MockProvider {
    outcome: MockOutcome,
    acquisitions: Arc<AtomicUsize>,
    stopped: Arc<Mutex<Vec<String>>>,
    sender: SenderSlot,
    fail_stop: bool,
}

impl MockProvider {
    /// Provider that grants access and immediately delivers `first_frame`.
    #[must_use]
    pub fn granting(first_frame: StreamFrame) -> Self {
        Self::with_outcome(MockOutcome::Grant(first_frame))
    }

    /// Provider that denies access with `reason`.
    #[must_use]
    pub fn denying(reason: &str) -> Self {
        Self::with_outcome(MockOutcome::Deny(reason.to_owned()))
    }

    /// Provider whose granted stream dies before the first frame.
    #[must_use]
    pub fn dead_stream() -> Self {
        Self::with_outcome(MockOutcome::DeadStream)
    }

    fn with_outcome(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            acquisitions: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(Mutex::new(Vec::new())),
            sender: Arc::new(Mutex::new(None)),
            fail_stop: false,
        }
    }

    /// Make every `stop_track` on granted streams fail.
    #[must_use]
    pub const fn with_failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Counter of `acquire` invocations.
    #[must_use]
    pub fn acquisitions(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.acquisitions)
    }

    /// Track ids passed to `stop_track` across all granted streams.
    #[must_use]
    pub fn stopped_tracks(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.stopped)
    }

    /// Closure that pushes a frame into the most recently granted stream.
    /// A no-op when no stream is live.
    #[must_use]
    pub fn frame_pusher(&self) -> impl Fn(StreamFrame) + Send + Sync + 'static {
        let slot = Arc::clone(&self.sender);
        move |frame| {
            let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(Some(frame));
            }
        }
    }

    /// Closure that ends the most recently granted stream, simulating a
    /// mid-stream runtime failure.
    #[must_use]
    pub fn stream_ender(&self) -> impl Fn() + Send + Sync + 'static {
        let slot = Arc::clone(&self.sender);
        move || {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take();
        }
    }
}

#[async_trait]
impl MediaProvider for MockProvider {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn MediaStream>> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if !constraints.video {
            return Err(CaptureError::AcquisitionFailed(
                "constraints did not request video".to_owned(),
            ));
        }
        match &self.outcome {
            MockOutcome::Deny(reason) => Err(CaptureError::AcquisitionFailed(reason.clone())),
            MockOutcome::DeadStream => {
                let (tx, rx) = watch::channel::<Option<StreamFrame>>(None);
                drop(tx);
                Ok(Box::new(MockStream {
                    id: "mock:dead".to_owned(),
                    tracks: vec!["mock:dead#video0".to_owned()],
                    rx,
                    sender_slot: Arc::clone(&self.sender),
                    stopped: Arc::clone(&self.stopped),
                    fail_stop: self.fail_stop,
                }))
            }
            MockOutcome::Grant(frame) => {
                let (tx, rx) = watch::channel(Some(frame.clone()));
                let tx = Arc::new(tx);
                {
                    let mut slot = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
                    // replacing the slot drops any previous stream's sender
                    *slot = Some(Arc::clone(&tx));
                }
                Ok(Box::new(MockStream {
                    id: "mock:camera".to_owned(),
                    tracks: vec!["mock:camera#video0".to_owned()],
                    rx,
                    sender_slot: Arc::clone(&self.sender),
                    stopped: Arc::clone(&self.stopped),
                    fail_stop: self.fail_stop,
                }))
            }
        }
    }
}

/// Mock stream handle produced by [`MockProvider`].
pub struct MockStream {
    id: String,
    tracks: Vec<String>,
    rx: FrameReceiver,
    sender_slot: SenderSlot,
    stopped: Arc<Mutex<Vec<String>>>,
    fail_stop: bool,
}

impl MediaStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn track_ids(&self) -> Vec<String> {
        self.tracks.clone()
    }

    fn stop_track(&mut self, track_id: &str) -> Result<()> {
        {
            let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
            stopped.push(track_id.to_owned());
        }
        if self.fail_stop {
            return Err(CaptureError::StreamError(format!(
                "simulated failure stopping {track_id}"
            )));
        }
        // the only track: stopping it ends the stream
        let mut slot = self
            .sender_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.take();
        Ok(())
    }

    fn frames(&self) -> FrameReceiver {
        self.rx.clone()
    }
}

/// Generate a solid-color RGBA frame.
#[must_use]
pub fn solid_rgba(dims: Dimensions, rgba: [u8; 4]) -> StreamFrame {
    let pixels = dims.width as usize * dims.height as usize;
    let mut data = Vec::with_capacity(pixels * 4);
    for _ in 0..pixels {
        data.extend_from_slice(&rgba);
    }
    StreamFrame {
        width: dims.width,
        height: dims.height,
        data,
    }
}

/// Generate a horizontal dark-to-light grayscale gradient frame.
#[must_use]
pub fn gradient_rgba(dims: Dimensions) -> StreamFrame {
    let mut data = Vec::with_capacity(dims.width as usize * dims.height as usize * 4);
    for _ in 0..dims.height {
        for x in 0..dims.width {
            #[allow(clippy::cast_possible_truncation)]
            let level = ((u64::from(x) * 255) / u64::from(dims.width.max(1))) as u8;
            data.extend_from_slice(&[level, level, level, 255]);
        }
    }
    StreamFrame {
        width: dims.width,
        height: dims.height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_granting_provider_latches_first_frame() {
        let provider = MockProvider::granting(solid_rgba(Dimensions::new(2, 2), [1, 2, 3, 4]));
        let stream = provider
            .acquire(MediaConstraints::video())
            .await
            .expect("grant");
        assert_eq!(stream.track_ids().len(), 1);

        let rx = stream.frames();
        let frame = rx.borrow().clone().expect("latched frame");
        assert_eq!(frame.data.len(), 16);
        assert_eq!(&frame.data[..4], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_denying_provider_errors() {
        let provider = MockProvider::denying("nope");
        let result = provider.acquire(MediaConstraints::video()).await;
        assert!(matches!(result, Err(CaptureError::AcquisitionFailed(_))));
        assert_eq!(provider.acquisitions().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_track_ends_stream() {
        let provider = MockProvider::granting(solid_rgba(Dimensions::new(2, 2), [0, 0, 0, 255]));
        let mut stream = provider
            .acquire(MediaConstraints::video())
            .await
            .expect("grant");
        let rx = stream.frames();
        assert!(rx.has_changed().is_ok());

        for track in stream.track_ids() {
            stream.stop_track(&track).expect("stop");
        }
        assert!(rx.has_changed().is_err(), "sender must be gone");
    }

    #[test]
    fn test_solid_pattern_layout() {
        let frame = solid_rgba(Dimensions::new(3, 2), [9, 8, 7, 6]);
        assert_eq!(frame.data.len(), 24);
        assert_eq!(&frame.data[20..24], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_gradient_pattern_ramps() {
        let frame = gradient_rgba(Dimensions::new(256, 1));
        assert_eq!(frame.data.first().copied(), Some(0));
        assert!(frame.data[4 * 255] > 250);
    }
}
