//! Device acquisition session and its lifecycle state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::traits::{
    CaptureError, FrameSource, MediaConstraints, MediaProvider, MediaStream, Shared, SurfaceKey,
};

/// Acquisition lifecycle states.
///
/// Happy path: `Idle -> Requesting -> Available`. A failed attempt ends in
/// `Failed`, which is terminal for that attempt only; a later request
/// re-enters `Requesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Initial state. No stream handle, availability is false.
    Idle,
    /// A device-access request is in flight.
    Requesting,
    /// Stream handle present and the first frame has been delivered.
    Available,
    /// The last acquisition attempt failed; reads must fail fast.
    Failed,
}

/// Side-table mapping surface identity to its initialization marker.
///
/// The marker is scoped to the frame-source handle rather than to any
/// controller instance, so it survives controller re-construction while a
/// fresh surface under the same key re-triggers acquisition.
#[derive(Debug, Clone, Default)]
pub struct InitTable(Arc<Mutex<HashMap<SurfaceKey, bool>>>);

impl InitTable {
    /// Whether the surface under `key` has completed initialization.
    #[must_use]
    pub fn is_initialized(&self, key: &SurfaceKey) -> bool {
        let table = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        table.get(key).copied().unwrap_or(false)
    }

    /// Mark the surface under `key` as initialized.
    pub fn mark(&self, key: &SurfaceKey) {
        let mut table = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        table.insert(key.clone(), true);
    }

    /// Clear the marker for `key`.
    pub fn clear(&self, key: &SurfaceKey) {
        let mut table = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        table.remove(key);
    }
}

/// Owns the media-stream handle and tracks the acquisition outcome.
///
/// The session requests device access through the injected provider,
/// gates availability on the first delivered frame, and releases the
/// underlying device tracks on teardown.
pub struct DeviceSession<P> {
    provider: Option<P>,
    stream: Option<Box<dyn MediaStream>>,
    state: AcquisitionState,
    avail: Arc<AtomicBool>,
    init: InitTable,
    active_key: Option<SurfaceKey>,
}

impl<P: MediaProvider> DeviceSession<P> {
    /// Create a session. `provider` is `None` in contexts without any
    /// device-media capability.
    #[must_use]
    pub fn new(provider: Option<P>, init: InitTable) -> Self {
        Self {
            provider,
            stream: None,
            state: AcquisitionState::Idle,
            avail: Arc::new(AtomicBool::new(false)),
            init,
            active_key: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> AcquisitionState {
        self.state
    }

    /// True only after the frame source has begun producing frames from a
    /// live stream.
    #[must_use]
    pub fn availability(&self) -> bool {
        self.state == AcquisitionState::Available
    }

    /// Shared flag mirroring [`Self::availability`], readable without
    /// locking the session.
    #[must_use]
    pub fn availability_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.avail)
    }

    fn set_state(&mut self, state: AcquisitionState) {
        self.state = state;
        self.avail
            .store(state == AcquisitionState::Available, Ordering::SeqCst);
    }

    /// Request device access and bind the resulting stream to `source`.
    ///
    /// Idempotent in effect: a repeated call for a surface already marked
    /// initialized is a no-op. Acquisition and first-frame failures are
    /// logged and recorded in the state machine; they never propagate to
    /// the caller.
    pub async fn request_access<S: FrameSource>(&mut self, source: &Shared<S>) {
        let key = source.lock().await.key().clone();

        if self.init.is_initialized(&key) {
            if matches!(
                self.state,
                AcquisitionState::Requesting | AcquisitionState::Available
            ) {
                debug!("surface {key} already initialized; skipping acquisition");
                return;
            }
            // Initialized by an earlier controller sharing this registry.
            // Adopt the surface if it is still live; teardown stays with
            // the controller that initialized it.
            if source.lock().await.is_live() {
                debug!("adopting live surface {key} initialized elsewhere");
                self.set_state(AcquisitionState::Available);
                return;
            }
            debug!("stale initialization marker for {key}; re-acquiring");
            self.init.clear(&key);
        }

        if matches!(
            self.state,
            AcquisitionState::Requesting | AcquisitionState::Available
        ) {
            debug!("acquisition already in progress; skipping");
            return;
        }

        let Some(provider) = self.provider.as_ref() else {
            warn!("{}", CaptureError::AcquisitionUnsupported);
            self.set_state(AcquisitionState::Failed);
            return;
        };

        // direct field writes: `set_state` would re-borrow self mutably
        // while `provider` is held
        self.state = AcquisitionState::Requesting;
        self.avail.store(false, Ordering::SeqCst);
        let acquired = provider.acquire(MediaConstraints::video()).await;
        match acquired {
            Ok(stream) => {
                let frames = stream.frames();
                let attached = source.lock().await.attach(frames).await;
                match attached {
                    Ok(()) => {
                        info!("camera stream {} live on {key}", stream.id());
                        self.stream = Some(stream);
                        self.active_key = Some(key.clone());
                        self.init.mark(&key);
                        self.set_state(AcquisitionState::Available);
                    }
                    Err(err) => {
                        error!("stream failed before delivering a frame: {err}");
                        self.set_state(AcquisitionState::Failed);
                    }
                }
            }
            Err(err) => {
                error!("an error occurred while accessing the camera: {err}");
                self.set_state(AcquisitionState::Failed);
            }
        }
    }

    /// Record a runtime error reported by a live stream.
    ///
    /// Only logs; availability is left untouched and the next `read` is
    /// expected to fail naturally if the stream is dead.
    pub fn report_stream_error(&self, reason: &str) {
        error!("{}", CaptureError::StreamError(reason.to_owned()));
    }

    /// Stop every track of the owned stream and clear the handle.
    ///
    /// Tolerates a missing stream and swallows per-track failures; release
    /// runs during teardown where no caller can recover, so it never
    /// raises.
    pub fn release(&mut self) {
        match self.stream.take() {
            None => debug!("release: no active stream"),
            Some(mut stream) => {
                for track in stream.track_ids() {
                    match stream.stop_track(&track) {
                        Ok(()) => info!("stopped stream track {track}"),
                        Err(err) => warn!("failed to stop track {track}: {err}"),
                    }
                }
            }
        }
        if let Some(key) = self.active_key.take() {
            self.init.clear(&key);
        }
        self.set_state(AcquisitionState::Idle);
    }
}
