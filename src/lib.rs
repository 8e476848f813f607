//! Webcam-Capture: a webcam acquisition and pixel-grab library
//!
//! This library models the full lifecycle of a capture session: resolving
//! capture dimensions from a device description, acquiring a media stream
//! from a provider, buffering frames into an offscreen surface, and sampling
//! packed `(alpha << 24) | (red << 16) | (green << 8) | blue` pixels out of
//! the most recent snapshot.
//!
//! Trait seams at the provider, frame source, and buffer surface boundaries
//! enable both production use with real V4L2 hardware and testing with
//! in-memory mocks.

pub mod buffer;
pub mod controller;
pub mod device;
pub mod dimensions;
pub mod relay;
pub mod session;
pub mod surfaces;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use buffer::FrameBuffer;
pub use controller::{CaptureController, CaptureMode, CAPTURE_BUFFER_KEY, FRAME_SOURCE_KEY};
pub use device::V4l2Provider;
pub use relay::{acquisition_channel, AcquisitionRelay, RelayProvider};
pub use session::{AcquisitionState, DeviceSession, InitTable};
pub use surfaces::{MemoryBufferSurface, MemoryFrameSource, MemoryRegistry};
pub use traits::{
    BufferSurface, CaptureError, Dimensions, FrameReceiver, FrameSnapshot, FrameSource,
    MediaConstraints, MediaProvider, MediaStream, Result, Shared, StreamFrame, SurfaceKey,
    SurfaceRegistry,
};
