//! V4L2-backed media provider using the v4l crate.
//!
//! Acquisition opens the device, verifies capture capability, configures
//! YUYV and hands the device to a dedicated capture thread. The thread
//! converts every frame to RGBA and publishes it on the stream's frame
//! channel; stopping the video track signals the thread, which drops the
//! sender so attached frame sources observe the ended stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CaptureError, FrameReceiver, MediaConstraints, MediaProvider, MediaStream, Result, StreamFrame,
};

/// Media provider backed by a V4L2 device index (e.g. 0 for /dev/video0).
pub struct V4l2Provider {
    index: u32,
}

impl V4l2Provider {
    /// Provider for /dev/video`index`.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self { index }
    }
}

#[async_trait]
impl MediaProvider for V4l2Provider {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn MediaStream>> {
        if !constraints.video {
            return Err(CaptureError::AcquisitionFailed(
                "constraints did not request video".to_owned(),
            ));
        }

        let index = self.index;
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();

        let stop_for_thread = Arc::clone(&stop);
        std::thread::Builder::new()
            .name(format!("v4l2-capture-{index}"))
            .spawn(move || capture_loop(index, &stop_for_thread, &frame_tx, ready_tx))
            .map_err(CaptureError::Io)?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("v4l2 device {index} acquired and streaming");
                Ok(Box::new(V4l2MediaStream {
                    id: format!("v4l2:{index}"),
                    stop,
                    frames: frame_rx,
                }))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CaptureError::AcquisitionFailed(
                "capture thread exited before reporting readiness".to_owned(),
            )),
        }
    }
}

/// Live stream handle over a V4L2 capture thread.
pub struct V4l2MediaStream {
    id: String,
    stop: Arc<AtomicBool>,
    frames: FrameReceiver,
}

impl MediaStream for V4l2MediaStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn track_ids(&self) -> Vec<String> {
        vec![format!("{}#video0", self.id)]
    }

    fn stop_track(&mut self, track_id: &str) -> Result<()> {
        debug!("signalling capture thread to stop {track_id}");
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }
}

impl Drop for V4l2MediaStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Open and configure the device for YUYV capture at its current
/// resolution.
fn configure_device(index: u32) -> Result<(Device, v4l::Format)> {
    let mut device = Device::new(index as usize)
        .map_err(|err| CaptureError::AcquisitionFailed(format!("open /dev/video{index}: {err}")))?;

    let caps = device
        .query_caps()
        .map_err(|err| CaptureError::AcquisitionFailed(format!("query capabilities: {err}")))?;
    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Err(CaptureError::AcquisitionFailed(format!(
            "device {} cannot capture video",
            caps.card
        )));
    }
    if !caps
        .capabilities
        .contains(v4l::capability::Flags::STREAMING)
    {
        return Err(CaptureError::AcquisitionFailed(format!(
            "device {} does not support streaming",
            caps.card
        )));
    }

    let mut fmt = device
        .format()
        .map_err(|err| CaptureError::StreamError(err.to_string()))?;
    fmt.fourcc = v4l::FourCC::new(b"YUYV");
    let fmt = device
        .set_format(&fmt)
        .map_err(|err| CaptureError::StreamError(err.to_string()))?;
    if fmt.fourcc.repr != *b"YUYV" {
        return Err(CaptureError::AcquisitionFailed(format!(
            "device {} does not support YUYV",
            caps.card
        )));
    }

    debug!(
        "configured /dev/video{index}: {}x{} {:?}",
        fmt.width, fmt.height, fmt.fourcc
    );
    Ok((device, fmt))
}

/// Blocking capture loop run on a dedicated thread.
fn capture_loop(
    index: u32,
    stop: &AtomicBool,
    frames: &watch::Sender<Option<StreamFrame>>,
    ready: oneshot::Sender<Result<()>>,
) {
    let (mut device, fmt) = match configure_device(index) {
        Ok(configured) => configured,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let mut stream = match MmapStream::with_buffers(&mut device, Type::VideoCapture, 4) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(CaptureError::StreamError(err.to_string())));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        // acquisition was abandoned before the device came up
        return;
    }

    while !stop.load(Ordering::SeqCst) {
        match stream.next() {
            Ok((buffer, _meta)) => {
                let frame = StreamFrame {
                    width: fmt.width,
                    height: fmt.height,
                    data: yuyv_to_rgba(buffer, fmt.width, fmt.height),
                };
                if frames.send(Some(frame)).is_err() {
                    debug!("all frame receivers dropped; stopping capture thread");
                    break;
                }
            }
            Err(err) => {
                error!("v4l2 capture error on /dev/video{index}: {err}");
                break;
            }
        }
    }
    debug!("capture thread for /dev/video{index} exiting");
}

/// Convert a packed YUYV frame to RGBA.
fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut rgba = Vec::with_capacity(pixels * 4);
    // YUYV: [Y0 U Y1 V] covers two pixels sharing U/V
    for chunk in data.chunks_exact(4).take(pixels.div_ceil(2)) {
        if let &[y0, u, y1, v] = chunk {
            for luma in [y0, y1] {
                let (r, g, b) = yuv_to_rgb(luma, u, v);
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
        }
    }
    rgba.resize(pixels * 4, 0);
    rgba
}

/// ITU-R BT.601 YUV to RGB conversion, clamped to 0-255.
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        if val < 0.0 {
            0
        } else if val > 255.0 {
            255
        } else {
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            {
                val as u8
            }
        }
    };

    (clamp(r), clamp(g), clamp(b))
}
