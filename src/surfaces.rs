//! In-memory surface implementations and the keyed surface registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::traits::{
    BufferSurface, CaptureError, Dimensions, FrameReceiver, FrameSource, Result, Shared,
    StreamFrame, SurfaceKey, SurfaceRegistry,
};

/// In-memory frame source backed by a stream's latched frame channel.
///
/// Stands in for the hidden live-video element: once attached it always
/// holds the most recently decoded frame of its stream.
pub struct MemoryFrameSource {
    key: SurfaceKey,
    dims: Dimensions,
    frames: Option<FrameReceiver>,
    live: bool,
}

impl MemoryFrameSource {
    /// Create a detached frame source.
    #[must_use]
    pub const fn new(key: SurfaceKey, dims: Dimensions) -> Self {
        Self {
            key,
            dims,
            frames: None,
            live: false,
        }
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    fn key(&self) -> &SurfaceKey {
        &self.key
    }

    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    async fn attach(&mut self, mut frames: FrameReceiver) -> Result<()> {
        // A frame may already be latched in the channel.
        while frames.borrow_and_update().is_none() {
            frames.changed().await.map_err(|_| {
                CaptureError::StreamError("stream ended before the first frame".to_owned())
            })?;
        }
        self.frames = Some(frames);
        self.live = true;
        Ok(())
    }

    fn latest(&self) -> Result<StreamFrame> {
        let frames = self.frames.as_ref().ok_or(CaptureError::NotAvailable)?;
        if frames.has_changed().is_err() {
            return Err(CaptureError::StreamError("stream has ended".to_owned()));
        }
        frames
            .borrow()
            .clone()
            .ok_or(CaptureError::NotAvailable)
    }

    async fn next_frame(&mut self) -> Result<StreamFrame> {
        let frames = self.frames.as_mut().ok_or(CaptureError::NotAvailable)?;
        frames
            .changed()
            .await
            .map_err(|_| CaptureError::StreamError("stream has ended".to_owned()))?;
        frames
            .borrow_and_update()
            .clone()
            .ok_or(CaptureError::NotAvailable)
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn detach(&mut self) {
        self.frames = None;
        self.live = false;
    }
}

/// In-memory RGBA drawing surface.
pub struct MemoryBufferSurface {
    key: SurfaceKey,
    dims: Dimensions,
    pixels: Vec<u8>,
    draws: u64,
}

impl MemoryBufferSurface {
    /// Create a zeroed surface sized exactly to `dims`.
    #[must_use]
    pub fn new(key: SurfaceKey, dims: Dimensions) -> Self {
        let len = 4 * dims.width as usize * dims.height as usize;
        Self {
            key,
            dims,
            pixels: vec![0; len],
            draws: 0,
        }
    }

    /// Number of frames drawn onto this surface since creation.
    #[must_use]
    pub const fn draw_count(&self) -> u64 {
        self.draws
    }
}

#[async_trait]
impl BufferSurface for MemoryBufferSurface {
    fn key(&self) -> &SurfaceKey {
        &self.key
    }

    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn draw(&mut self, frame: &StreamFrame) -> Result<()> {
        let copy_width = 4 * self.dims.width.min(frame.width) as usize;
        let rows = self.dims.height.min(frame.height) as usize;
        let src_stride = 4 * frame.width as usize;
        let dst_stride = 4 * self.dims.width as usize;

        for row in 0..rows {
            let src = row * src_stride;
            let dst = row * dst_stride;
            let (Some(src_row), Some(dst_row)) = (
                frame.data.get(src..src + copy_width),
                self.pixels.get_mut(dst..dst + copy_width),
            ) else {
                return Err(CaptureError::SurfaceError(format!(
                    "frame data shorter than its advertised {}x{}",
                    frame.width, frame.height
                )));
            };
            dst_row.copy_from_slice(src_row);
        }
        self.draws += 1;
        Ok(())
    }

    async fn read_pixels(&self) -> Result<Vec<u8>> {
        Ok(self.pixels.clone())
    }
}

/// Cloneable surface registry over a shared keyed map.
///
/// Clones share the same underlying map, so identically-keyed lookups
/// return the same surface even across controller re-constructions.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    sources: Arc<Mutex<HashMap<SurfaceKey, Shared<MemoryFrameSource>>>>,
    buffers: Arc<Mutex<HashMap<SurfaceKey, Shared<MemoryBufferSurface>>>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SurfaceRegistry for MemoryRegistry {
    type Source = MemoryFrameSource;
    type Buffer = MemoryBufferSurface;

    fn frame_source(&mut self, key: &SurfaceKey, dims: Dimensions) -> Shared<MemoryFrameSource> {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sources.entry(key.clone()).or_insert_with(|| {
            debug!("creating frame source {key} at {dims}");
            Arc::new(AsyncMutex::new(MemoryFrameSource::new(key.clone(), dims)))
        }))
    }

    fn buffer_surface(&mut self, key: &SurfaceKey, dims: Dimensions) -> Shared<MemoryBufferSurface> {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buffers.entry(key.clone()).or_insert_with(|| {
            debug!("creating buffer surface {key} at {dims}");
            Arc::new(AsyncMutex::new(MemoryBufferSurface::new(key.clone(), dims)))
        }))
    }

    fn remove(&mut self, key: &SurfaceKey) {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        if sources.remove(key).is_some() {
            debug!("removed frame source {key}");
        }
        drop(sources);
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.remove(key).is_some() {
            debug!("removed buffer surface {key}");
        }
    }
}
