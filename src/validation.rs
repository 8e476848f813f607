//! Snapshot validation utilities for capture verification.
//!
//! This module provides functions to validate that extracted snapshots
//! contain expected pixel content. Useful for integration testing against
//! virtual cameras and for sanity-checking a live capture pipeline.

use crate::traits::{CaptureError, FrameSnapshot, Result};

/// Tolerance for RGB channel matching (accounts for YUV->RGB conversion
/// errors on real devices).
const COLOR_TOLERANCE: u32 = 15;

/// Unpacks a `(alpha << 24) | (red << 16) | (green << 8) | blue` pixel
/// into its `(r, g, b, a)` channels.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn unpack_pixel(pixel: u32) -> (u8, u8, u8, u8) {
    (
        ((pixel >> 16) & 0xFF) as u8,
        ((pixel >> 8) & 0xFF) as u8,
        (pixel & 0xFF) as u8,
        ((pixel >> 24) & 0xFF) as u8,
    )
}

/// Validates that a snapshot's byte layout matches its declared dimensions.
///
/// # Errors
///
/// Returns `StreamError` if the data length is not `4 * width * height`,
/// or if either dimension is zero.
pub fn validate_shape(snapshot: &FrameSnapshot) -> Result<()> {
    if snapshot.width == 0 || snapshot.height == 0 {
        return Err(CaptureError::StreamError(format!(
            "Degenerate snapshot dimensions {}x{}",
            snapshot.width, snapshot.height
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let expected = (4 * u64::from(snapshot.width) * u64::from(snapshot.height)) as usize;
    if snapshot.data.len() != expected {
        return Err(CaptureError::StreamError(format!(
            "Snapshot byte length {} does not match {}x{} (expected {expected})",
            snapshot.data.len(),
            snapshot.width,
            snapshot.height
        )));
    }

    Ok(())
}

/// Validates that a snapshot is a solid color within tolerance.
///
/// This function samples the four corners and the center of the snapshot,
/// verifying that each position contains the expected color with a
/// tolerance for conversion inaccuracies.
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The snapshot shape is invalid
/// - Any sampled position doesn't match the expected color within tolerance
pub fn validate_solid(snapshot: &FrameSnapshot, expected_rgb: (u8, u8, u8)) -> Result<()> {
    validate_shape(snapshot)?;

    let right = snapshot.width - 1;
    let bottom = snapshot.height - 1;
    let probes = [
        (0, 0),
        (right, 0),
        (0, bottom),
        (right, bottom),
        (snapshot.width / 2, snapshot.height / 2),
    ];

    for (x, y) in probes {
        let (r, g, b, _) = unpack_pixel(snapshot.sample(x, y));
        if !colors_match((r, g, b), expected_rgb, COLOR_TOLERANCE) {
            return Err(CaptureError::StreamError(format!(
                "Solid color mismatch at ({x}, {y}): \
                 expected RGB{expected_rgb:?}, got RGB{:?}",
                (r, g, b)
            )));
        }
    }

    Ok(())
}

/// Validates that a snapshot contains a horizontal gradient pattern.
///
/// This function samples a horizontal line at the center of the snapshot
/// and verifies that the luminance increases monotonically from left to
/// right. It also checks that there is a significant overall luminance
/// change across the frame (not a solid color).
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The snapshot shape is invalid
/// - The luminance doesn't increase monotonically
/// - The total luminance change is too small (solid color)
pub fn validate_gradient(snapshot: &FrameSnapshot) -> Result<()> {
    validate_shape(snapshot)?;

    let center_y = snapshot.height / 2;

    // Sample every 10 pixels to check for monotonic increase
    let sample_step = 10u32;
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;
    let mut last_luminance: Option<f32> = None;

    for x in (0..snapshot.width).step_by(sample_step as usize) {
        let (r, g, b, _) = unpack_pixel(snapshot.sample(x, center_y));

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if first_luminance.is_none() {
            first_luminance = Some(luminance);
        }

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                // Allow small decreases due to rounding
                return Err(CaptureError::StreamError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        prev_luminance = Some(luminance);
        last_luminance = Some(luminance);
    }

    // Check that there's a significant luminance change across the frame
    if let (Some(first), Some(last)) = (first_luminance, last_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CaptureError::StreamError(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Helper function to check if two RGB colors match within a tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    let r_diff = u32::from(ar).abs_diff(u32::from(er));
    let g_diff = u32::from(ag).abs_diff(u32::from(eg));
    let b_diff = u32::from(ab).abs_diff(u32::from(eb));

    r_diff <= tolerance && g_diff <= tolerance && b_diff <= tolerance
}
