//! Dimension-spec decoding and the static device listing.

use crate::traits::Dimensions;

/// Decode requested dimensions from a `"...size=<W>x<H>..."` spec string.
///
/// An absent spec resolves to the 800x600 default. When present, the first
/// `size=` pair is decoded; width and height are parsed independently, so
/// a field that fails to parse as a non-negative integer keeps its default
/// while the other still applies.
#[must_use]
pub fn resolve(spec: Option<&str>) -> Dimensions {
    let mut dims = Dimensions::default();
    let Some(spec) = spec else {
        return dims;
    };
    let Some(start) = spec.find("size=") else {
        return dims;
    };
    let Some(rest) = spec.get(start + "size=".len()..) else {
        return dims;
    };
    let pair = rest.split(',').next().unwrap_or("");
    let Some((width, height)) = pair.split_once('x') else {
        return dims;
    };
    if let Ok(width) = width.parse::<u32>() {
        dims.width = width;
    }
    if let Ok(height) = height.parse::<u32>() {
        dims.height = height;
    }
    dims
}

/// Static single-element device enumeration.
///
/// This is a placeholder, not a real device query; callers must not rely
/// on it reflecting actual hardware.
#[must_use]
pub fn list_devices() -> Vec<String> {
    vec!["name=Unknown,size=800x600,fps=30".to_owned()]
}
