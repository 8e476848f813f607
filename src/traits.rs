//! Core types, error taxonomy and collaborator traits for camera capture.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

/// A surface handle guarded for shared access between a controller and its
/// background tasks.
pub type Shared<T> = Arc<tokio::sync::Mutex<T>>;

/// Requested capture dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimensions pair.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Constraints passed to a media provider when requesting device access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Whether a video track is requested.
    pub video: bool,
}

impl MediaConstraints {
    /// Constraints requesting video only.
    #[must_use]
    pub const fn video() -> Self {
        Self { video: true }
    }
}

/// Identity of a frame-source or buffer surface within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceKey(String);

impl SurfaceKey {
    /// Create a key from a surface name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded RGBA frame as delivered by a live media stream.
///
/// Pixel data is row-major with four bytes per pixel (R, G, B, A).
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw RGBA bytes, `4 * width * height` long.
    pub data: Vec<u8>,
}

/// The most recently extracted pixel snapshot of a capture session.
///
/// At most one snapshot is live per session; the previous snapshot is
/// dropped before its replacement is installed.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Snapshot width in pixels.
    pub width: u32,
    /// Snapshot height in pixels.
    pub height: u32,
    /// Raw RGBA bytes, row-major, `4 * width * height` long.
    pub data: Vec<u8>,
}

impl FrameSnapshot {
    /// Pack the pixel at `(x, y)` into a single 32-bit value.
    ///
    /// Reads four consecutive bytes starting at `4 * (x + y * width)` and
    /// composes them as `(alpha << 24) | (red << 16) | (green << 8) | blue`.
    /// Coordinates outside the byte layout yield 0.
    #[must_use]
    pub fn sample(&self, x: u32, y: u32) -> u32 {
        let index = u64::from(x) + u64::from(y) * u64::from(self.width);
        let Some(offset) = index.checked_mul(4).and_then(|o| usize::try_from(o).ok()) else {
            return 0;
        };
        match self.data.get(offset..offset.saturating_add(4)) {
            Some(&[r, g, b, a]) => {
                (u32::from(a) << 24) | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
            }
            _ => 0,
        }
    }
}

/// Error type for capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No device-media provider is present in this context.
    #[error("media provider unavailable; camera acquisition unsupported")]
    AcquisitionUnsupported,
    /// The provider was invoked but denied permission or errored.
    #[error("camera acquisition failed: {0}")]
    AcquisitionFailed(String),
    /// A live stream reported a runtime failure.
    #[error("stream error: {0}")]
    StreamError(String),
    /// `read`/`draw_to` was called before acquisition completed or after
    /// it failed.
    #[error("capture not available; device acquisition has not completed")]
    NotAvailable,
    /// A drawing surface rejected an operation.
    #[error("surface error: {0}")]
    SurfaceError(String),
    /// I/O error from the device backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Receiver side of a live stream's frame channel.
///
/// The channel latches the most recent frame; `None` means no frame has
/// been delivered yet. The sender half is dropped when the stream ends.
pub type FrameReceiver = watch::Receiver<Option<StreamFrame>>;

/// Abstraction over the device-media provider.
///
/// Given constraints, asynchronously yields a live media stream handle or
/// fails. In a deferred (worker) context this seam is implemented by a
/// relay that delegates to the host application.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Request device access. Resolves once the device has been acquired
    /// and its stream handle is live, or fails with the acquisition error.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn MediaStream>>;
}

/// A live media stream handle owned by a capture session.
pub trait MediaStream: Send {
    /// Stable identifier of this stream.
    fn id(&self) -> &str;

    /// Identifiers of the stream's live tracks.
    fn track_ids(&self) -> Vec<String>;

    /// Stop a single track. Failures are reported so the caller can log
    /// them; stopping an already-stopped track is a no-op.
    fn stop_track(&mut self, track_id: &str) -> Result<()>;

    /// Subscribe to the stream's decoded frames.
    fn frames(&self) -> FrameReceiver;
}

/// Abstraction over the live video surface continuously fed by a stream.
#[async_trait]
pub trait FrameSource: Send {
    /// Identity of this surface.
    fn key(&self) -> &SurfaceKey;

    /// Surface dimensions.
    fn dimensions(&self) -> Dimensions;

    /// Begin consuming frames from a stream. Resolves only once the first
    /// frame has landed; acquisition success and first-frame-ready are
    /// distinct events and availability gates on the latter.
    async fn attach(&mut self, frames: FrameReceiver) -> Result<()>;

    /// The most recently delivered frame. Fails with
    /// [`CaptureError::StreamError`] once the stream has ended.
    fn latest(&self) -> Result<StreamFrame>;

    /// Wait for the next frame not yet observed by this surface.
    async fn next_frame(&mut self) -> Result<StreamFrame>;

    /// Whether the surface has delivered at least one frame since the last
    /// attach.
    fn is_live(&self) -> bool;

    /// Disconnect from the stream and drop the retained frame.
    fn detach(&mut self);
}

/// Abstraction over a 2D drawing surface that can composite a frame and
/// expose its pixels as a rectangular RGBA array.
#[async_trait]
pub trait BufferSurface: Send {
    /// Identity of this surface.
    fn key(&self) -> &SurfaceKey;

    /// Surface dimensions.
    fn dimensions(&self) -> Dimensions;

    /// Composite a frame onto the surface at offset (0, 0).
    fn draw(&mut self, frame: &StreamFrame) -> Result<()>;

    /// Read back the full `width x height` region as RGBA bytes.
    ///
    /// Async because a deferred execution context may require an explicit
    /// buffer hand-off before the pixels can be queried.
    async fn read_pixels(&self) -> Result<Vec<u8>>;
}

/// Keyed registry of surface handles.
///
/// "Create if absent" is an explicit idempotent factory call: looking up
/// the same key returns the same underlying surface, including across
/// controller re-constructions sharing one registry. This replaces
/// implicit lookup-by-id global state.
pub trait SurfaceRegistry: Send {
    /// The frame-source surface type produced by this registry.
    type Source: FrameSource + 'static;
    /// The buffer surface type produced by this registry.
    type Buffer: BufferSurface + 'static;

    /// Get or create the frame source registered under `key`.
    ///
    /// An existing surface is reused as-is; `dims` only applies on
    /// creation.
    fn frame_source(&mut self, key: &SurfaceKey, dims: Dimensions) -> Shared<Self::Source>;

    /// Get or create the buffer surface registered under `key`.
    fn buffer_surface(&mut self, key: &SurfaceKey, dims: Dimensions) -> Shared<Self::Buffer>;

    /// Remove the surface registered under `key`, if any. A later lookup
    /// creates a fresh surface.
    fn remove(&mut self, key: &SurfaceKey);
}
