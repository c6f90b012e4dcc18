//! Thumbnail encoding: `DynamicImage` → `data:image/png;base64,…` URL.
//!
//! PNG keeps rendered text crisp at thumbnail size; the data URL can be shown
//! by any front-end without a second round trip to the engine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a PNG data URL.
pub fn encode_data_url(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} thumbnail → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(format!("data:image/png;base64,{b64}"))
}

/// Decode a data URL produced by [`encode_data_url`] back to PNG bytes.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let b64 = url.strip_prefix("data:image/png;base64,")?;
    STANDARD.decode(b64).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 20, Rgba([255, 0, 0, 255])));
        let url = encode_data_url(&img).expect("encode should succeed");
        assert!(url.starts_with("data:image/png;base64,"));
        let png = decode_data_url(&url).expect("valid base64");
        assert_eq!(&png[1..4], b"PNG");
        let back = image::load_from_memory(&png).unwrap();
        assert_eq!((back.width(), back.height()), (16, 20));
    }

    #[test]
    fn decode_rejects_other_schemes() {
        assert!(decode_data_url("blob:ocr-upload/abc").is_none());
    }
}
