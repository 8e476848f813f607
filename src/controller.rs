//! Top-level capture lifecycle controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::buffer::{FrameBuffer, SnapshotSlot};
use crate::dimensions;
use crate::session::{DeviceSession, InitTable};
use crate::traits::{
    BufferSurface, CaptureError, Dimensions, FrameSource, MediaProvider, Result, Shared,
    SurfaceKey, SurfaceRegistry,
};

/// Registry name of the controller's frame-source surface.
pub const FRAME_SOURCE_KEY: &str = "webcam-capture__frame-source";
/// Registry name of the controller's capture buffer surface.
pub const CAPTURE_BUFFER_KEY: &str = "webcam-capture__capture-buffer";

/// Interval bounding one iteration of the background grab loop; teardown
/// is observed within this window.
const GRAB_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Execution mode of a capture controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Synchronous single-shot frame read per `read` call.
    Direct,
    /// Continuous background grab: the first `read` starts a loop that
    /// keeps capturing until teardown. For contexts without direct access
    /// to the device-media provider.
    Deferred,
}

/// The shared surface state of one controller.
struct SurfaceSet<R: SurfaceRegistry> {
    registry: R,
    source: Option<Shared<R::Source>>,
    buffer: FrameBuffer<R::Buffer>,
}

impl<R: SurfaceRegistry> SurfaceSet<R> {
    /// Lazily create (or reuse identically-keyed) surfaces sized to
    /// `dims`. Idempotent; safe to call on every `start`.
    fn ensure(&mut self, dims: Dimensions) -> Shared<R::Source> {
        let source = self
            .registry
            .frame_source(&SurfaceKey::new(FRAME_SOURCE_KEY), dims);
        let buffer = self
            .registry
            .buffer_surface(&SurfaceKey::new(CAPTURE_BUFFER_KEY), dims);
        self.buffer.ensure_surface(buffer);
        self.source = Some(Arc::clone(&source));
        source
    }

    /// Detach and unregister both surfaces and drop the snapshot.
    async fn teardown(&mut self) {
        if let Some(source) = self.source.take() {
            source.lock().await.detach();
        }
        self.registry.remove(&SurfaceKey::new(FRAME_SOURCE_KEY));
        self.registry.remove(&SurfaceKey::new(CAPTURE_BUFFER_KEY));
        self.buffer.clear();
    }
}

/// Coordinates the device session and the frame buffer behind a cloneable
/// handle.
///
/// `start` kicks off asynchronous device acquisition; `read` extracts a
/// pixel snapshot once the session is available; `get` samples the last
/// snapshot; `release` tears everything down and is also wired to the
/// host's exit notification via [`Self::register_exit_hook`].
pub struct CaptureController<P, R: SurfaceRegistry> {
    session: Arc<AsyncMutex<DeviceSession<P>>>,
    surfaces: Arc<AsyncMutex<SurfaceSet<R>>>,
    snapshot: SnapshotSlot,
    dims: Dimensions,
    mode: CaptureMode,
    started: Arc<AtomicBool>,
    grabbing: Arc<AtomicBool>,
    available: Arc<AtomicBool>,
}

impl<P, R: SurfaceRegistry> Clone for CaptureController<P, R> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            surfaces: Arc::clone(&self.surfaces),
            snapshot: Arc::clone(&self.snapshot),
            dims: self.dims,
            mode: self.mode,
            started: Arc::clone(&self.started),
            grabbing: Arc::clone(&self.grabbing),
            available: Arc::clone(&self.available),
        }
    }
}

impl<P, R> CaptureController<P, R>
where
    P: MediaProvider + 'static,
    R: SurfaceRegistry + 'static,
{
    /// Create a controller with a fresh initialization side-table.
    ///
    /// `provider` is `None` in contexts without device-media capability;
    /// `start` then records the acquisition as unsupported.
    #[must_use]
    pub fn new(provider: Option<P>, registry: R, dims: Dimensions, mode: CaptureMode) -> Self {
        Self::with_init_table(provider, registry, dims, mode, InitTable::default())
    }

    /// Create a controller whose initialization side-table is shared with
    /// other controllers, so a surface initialized by one of them is not
    /// re-acquired by another.
    #[must_use]
    pub fn with_init_table(
        provider: Option<P>,
        registry: R,
        dims: Dimensions,
        mode: CaptureMode,
        init: InitTable,
    ) -> Self {
        let session = DeviceSession::new(provider, init);
        let available = session.availability_flag();
        let buffer = FrameBuffer::new();
        let snapshot = buffer.snapshot_slot();
        Self {
            session: Arc::new(AsyncMutex::new(session)),
            surfaces: Arc::new(AsyncMutex::new(SurfaceSet {
                registry,
                source: None,
                buffer,
            })),
            snapshot,
            dims,
            mode,
            started: Arc::new(AtomicBool::new(false)),
            grabbing: Arc::new(AtomicBool::new(false)),
            available,
        }
    }

    /// Create a controller from a `"...size=<W>x<H>..."` spec string.
    #[must_use]
    pub fn from_spec(provider: Option<P>, registry: R, spec: Option<&str>, mode: CaptureMode) -> Self {
        Self::new(provider, registry, dimensions::resolve(spec), mode)
    }

    /// Requested capture dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dims
    }

    /// Begin capture. Never blocks the caller: surfaces are ensured and
    /// device acquisition runs on a background task, with the outcome
    /// reported through [`Self::available`] rather than a return value.
    /// A no-op when the current frame-source identity is already
    /// initialized.
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move {
            let source = {
                let mut surfaces = this.surfaces.lock().await;
                if !this.started.load(Ordering::SeqCst) {
                    debug!("released before acquisition began; aborting start");
                    return;
                }
                surfaces.ensure(this.dims)
            };
            let mut session = this.session.lock().await;
            // release() takes this lock too: either a completed teardown is
            // observed here, or it waits for the acquisition and then stops
            // the acquired tracks
            if !this.started.load(Ordering::SeqCst) {
                debug!("released before acquisition began; aborting start");
                return;
            }
            session.request_access(&source).await;
        });
    }

    /// True only after acquisition succeeded and the frame source began
    /// producing frames.
    #[must_use]
    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Poll [`Self::available`] until it turns true or `timeout` elapses.
    pub async fn wait_available(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.available() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.available()
    }

    /// Capture a frame into the pixel snapshot.
    ///
    /// Fails fast with [`CaptureError::NotAvailable`] outside the
    /// available state, leaving the last snapshot untouched. In direct
    /// mode one capture happens relative to the caller's await point; in
    /// deferred mode the first call starts the background grab loop and
    /// returns immediately.
    pub async fn read(&self) -> Result<()> {
        if !self.available() {
            return Err(CaptureError::NotAvailable);
        }
        match self.mode {
            CaptureMode::Direct => self.capture_current().await,
            CaptureMode::Deferred => {
                if !self.grabbing.swap(true, Ordering::SeqCst) {
                    self.spawn_grab_loop();
                }
                Ok(())
            }
        }
    }

    /// Packed pixel `(alpha << 24) | (red << 16) | (green << 8) | blue` at
    /// `(x, y)` of the last snapshot, or 0 when no `read` has ever
    /// captured one. Never fails due to missing data.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        let slot = self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.as_ref().map_or(0, |snapshot| snapshot.sample(x, y))
    }

    /// Compatibility path: copy the live frame source directly onto the
    /// host's destination surface, bypassing snapshot extraction. Still
    /// requires the available state.
    pub async fn draw_to<T: BufferSurface>(&self, target: &mut T) -> Result<()> {
        if !self.available() {
            return Err(CaptureError::NotAvailable);
        }
        let frame = {
            let surfaces = self.surfaces.lock().await;
            let source = surfaces.source.as_ref().ok_or(CaptureError::NotAvailable)?;
            let guard = source.lock().await;
            guard.latest()?
        };
        target.draw(&frame)
    }

    /// Tear down the capture session: stop the device stream, remove both
    /// surfaces, drop the snapshot and reset to idle. Safe to call when
    /// `start` was never invoked, and idempotent.
    pub async fn release(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            debug!("release: capture was not started");
        }
        {
            let mut session = self.session.lock().await;
            session.release();
        }
        let mut surfaces = self.surfaces.lock().await;
        surfaces.teardown().await;
        info!("capture released");
    }

    /// Register teardown with the host's exit notification channel.
    ///
    /// The hook fires once, on the first shutdown signal or when the host
    /// drops the sender, even if the host signals exit multiple times.
    pub fn register_exit_hook(&self, mut exit: watch::Receiver<bool>) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = exit.changed().await;
            debug!("host exit notification received; releasing capture");
            this.release().await;
        });
    }

    /// One capture of the source's current frame.
    async fn capture_current(&self) -> Result<()> {
        let mut surfaces = self.surfaces.lock().await;
        let frame = {
            let source = surfaces.source.as_ref().ok_or(CaptureError::NotAvailable)?;
            let guard = source.lock().await;
            guard.latest()?
        };
        surfaces.buffer.capture(&frame).await
    }

    /// One capture paced by frame arrival; used by the grab loop.
    ///
    /// Only the wait for a fresh frame is bounded, so teardown is observed
    /// within one frame interval; a frame that did arrive is drawn and read
    /// back to completion, never cancelled mid-capture.
    async fn capture_next(&self) -> Result<()> {
        let mut surfaces = self.surfaces.lock().await;
        let frame = {
            let source = surfaces.source.as_ref().ok_or(CaptureError::NotAvailable)?;
            let mut guard = source.lock().await;
            match tokio::time::timeout(GRAB_FRAME_INTERVAL, guard.next_frame()).await {
                Ok(frame) => frame?,
                // no fresh frame within the interval; let the loop re-check
                // the started flag
                Err(_) => return Ok(()),
            }
        };
        surfaces.buffer.capture(&frame).await
    }

    /// Continuous background grab. Each iteration awaits one capture to
    /// completion, so captures are never issued concurrently; the started
    /// flag is re-checked every iteration and the wait for a fresh frame is
    /// bounded, so teardown stops the loop within one frame interval.
    fn spawn_grab_loop(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            debug!("background grab loop started");
            while this.started.load(Ordering::SeqCst) {
                if let Err(err) = this.capture_next().await {
                    warn!("background grab stopped: {err}");
                    let session = this.session.lock().await;
                    session.report_stream_error(&err.to_string());
                    break;
                }
                tokio::task::yield_now().await;
            }
            this.grabbing.store(false, Ordering::SeqCst);
            debug!("background grab loop stopped");
        });
    }
}
