//! Frame capture buffering and pixel snapshot management.

use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::{BufferSurface, CaptureError, FrameSnapshot, Result, Shared, StreamFrame};

/// Shared slot holding the most recent snapshot of a session.
pub type SnapshotSlot = Arc<Mutex<Option<FrameSnapshot>>>;

/// Owns the drawing surface and the most recently captured pixel snapshot.
///
/// Copies the live frame into the surface, extracts the pixel array, and
/// manages snapshot lifetime: the previous snapshot is dropped before its
/// replacement is installed, never left to accumulate.
pub struct FrameBuffer<B> {
    surface: Option<Shared<B>>,
    snapshot: SnapshotSlot,
}

impl<B: BufferSurface> FrameBuffer<B> {
    /// Create an empty frame buffer with no surface bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            surface: None,
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind the registry-provided surface. Idempotent; safe to call on
    /// every `start`, and a surface bound earlier is kept.
    pub fn ensure_surface(&mut self, surface: Shared<B>) {
        if self.surface.is_none() {
            self.surface = Some(surface);
        }
    }

    /// Handle to the snapshot slot, readable without locking the buffer.
    #[must_use]
    pub fn snapshot_slot(&self) -> SnapshotSlot {
        Arc::clone(&self.snapshot)
    }

    /// Draw `frame` onto the surface at (0, 0), read back the full
    /// `width x height` region and install it as the new snapshot.
    pub async fn capture(&mut self, frame: &StreamFrame) -> Result<()> {
        let surface = self.surface.as_ref().ok_or(CaptureError::NotAvailable)?;
        let (pixels, dims) = {
            let mut surface = surface.lock().await;
            surface.draw(frame)?;
            (surface.read_pixels().await?, surface.dimensions())
        };
        let next = FrameSnapshot {
            width: dims.width,
            height: dims.height,
            data: pixels,
        };
        let mut slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        // Release the previous snapshot's backing memory before installing
        // the replacement; never hold two live snapshots.
        slot.take();
        *slot = Some(next);
        Ok(())
    }

    /// Packed pixel at `(x, y)` from the current snapshot, or 0 when no
    /// snapshot has ever been captured.
    #[must_use]
    pub fn sample(&self, x: u32, y: u32) -> u32 {
        let slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map_or(0, |snapshot| snapshot.sample(x, y))
    }

    /// Whether a snapshot has been captured since the last clear.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        let slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.is_some()
    }

    /// Drop the surface handle and the retained snapshot.
    pub fn clear(&mut self) {
        self.surface = None;
        let mut slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take();
    }
}

impl<B: BufferSurface> Default for FrameBuffer<B> {
    fn default() -> Self {
        Self::new()
    }
}
