//! Integration tests using the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded: `sudo modprobe vivid`
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! Tests will fail if vivid is not available.

#![cfg(feature = "integration")]

use std::fs;
use std::path::Path;
use std::time::Duration;

use serial_test::serial;
use webcam_capture::traits::{BufferSurface, CaptureError, Dimensions, FrameSnapshot, SurfaceKey};
use webcam_capture::validation::validate_shape;
use webcam_capture::{
    CaptureController, CaptureMode, MemoryBufferSurface, MemoryRegistry, V4l2Provider,
};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Find all available vivid virtual camera devices.
///
/// Uses sysfs to check device names before opening, avoiding
/// unnecessary device opens on real cameras.
fn find_vivid_devices() -> Vec<u32> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    for index in 0..10 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };

        if name.to_lowercase().contains("vivid") {
            devices.push(index);
        }
    }
    devices
}

/// Macro to fail test if vivid is not available.
///
/// Returns the first vivid device index.
/// Integration tests MUST have vivid loaded - they should fail, not silently
/// skip. This ensures CI catches missing vivid configuration.
macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first().copied() {
            Some(idx) => idx,
            None => {
                panic!(
                    "vivid virtual camera not available.\n\
                     Load vivid with: sudo modprobe vivid\n\
                     Or run unit tests only: cargo test --lib"
                );
            }
        }
    };
}

fn vivid_controller(index: u32, mode: CaptureMode) -> CaptureController<V4l2Provider, MemoryRegistry> {
    CaptureController::new(
        Some(V4l2Provider::new(index)),
        MemoryRegistry::new(),
        Dimensions::new(640, 480),
        mode,
    )
}

#[tokio::test]
#[serial]
async fn test_vivid_direct_lifecycle() {
    let device_index = require_vivid!();
    let controller = vivid_controller(device_index, CaptureMode::Direct);

    controller.start();
    assert!(
        controller.wait_available(AVAILABILITY_TIMEOUT).await,
        "vivid capture never became available"
    );

    controller.read().await.expect("read failed");
    let center = controller.get(320, 240);
    assert!(
        center >= 0xFF00_0000,
        "center pixel should carry an opaque alpha channel, got {center:#010X}"
    );

    controller.release().await;
    assert!(!controller.available(), "release should end availability");
}

#[tokio::test]
#[serial]
async fn test_vivid_multiple_direct_reads() {
    let device_index = require_vivid!();
    let controller = vivid_controller(device_index, CaptureMode::Direct);

    controller.start();
    assert!(controller.wait_available(AVAILABILITY_TIMEOUT).await);

    for _ in 0..5 {
        controller.read().await.expect("read failed");
        assert!(controller.get(320, 240) >= 0xFF00_0000);
        tokio::time::sleep(Duration::from_millis(33)).await;
    }

    controller.release().await;
}

#[tokio::test]
#[serial]
async fn test_vivid_deferred_grab_loop() {
    let device_index = require_vivid!();
    let controller = vivid_controller(device_index, CaptureMode::Deferred);

    controller.start();
    assert!(controller.wait_available(AVAILABILITY_TIMEOUT).await);

    // First read kicks off the background grab loop; frames arrive on
    // the device's own schedule afterwards.
    controller.read().await.expect("read failed");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(controller.get(320, 240) >= 0xFF00_0000);

    controller.release().await;
}

#[tokio::test]
#[serial]
async fn test_vivid_draw_to_external_surface() {
    let device_index = require_vivid!();
    let controller = vivid_controller(device_index, CaptureMode::Direct);

    controller.start();
    assert!(controller.wait_available(AVAILABILITY_TIMEOUT).await);

    let dims = controller.dimensions();
    let mut target = MemoryBufferSurface::new(SurfaceKey::new("external"), dims);
    controller.draw_to(&mut target).await.expect("draw_to failed");

    let snapshot = FrameSnapshot {
        width: dims.width,
        height: dims.height,
        data: target.read_pixels().await.expect("read_pixels failed"),
    };
    validate_shape(&snapshot).expect("snapshot shape invalid");

    controller.release().await;
}

#[tokio::test]
#[serial]
async fn test_missing_device_never_available() {
    // No vivid requirement: the point is that a bogus device index fails
    // acquisition without panicking or blocking.
    let controller = vivid_controller(99, CaptureMode::Direct);

    controller.start();
    assert!(
        !controller.wait_available(Duration::from_secs(2)).await,
        "device 99 should never become available"
    );

    let err = controller.read().await.expect_err("read should fail");
    assert!(matches!(err, CaptureError::NotAvailable));

    controller.release().await;
}

#[tokio::test]
#[serial]
async fn test_vivid_release_is_idempotent() {
    let device_index = require_vivid!();
    let controller = vivid_controller(device_index, CaptureMode::Direct);

    controller.start();
    assert!(controller.wait_available(AVAILABILITY_TIMEOUT).await);

    controller.release().await;
    controller.release().await;

    let err = controller.read().await.expect_err("read should fail after release");
    assert!(matches!(err, CaptureError::NotAvailable));
}
