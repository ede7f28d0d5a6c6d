pub mod image_helper {
    use crate::error::{AnalyticsError, Result};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use image::{DynamicImage, ImageEncoder, ImageFormat, RgbaImage};
    use std::io::Cursor;
    use std::path::Path;

    /// Writes an RGBA buffer to `path` as PNG.
    pub fn save(path: impl AsRef<Path>, image: &RgbaImage) -> Result<()> {
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::Rgba8)?;

        Ok(())
    }

    /// Reads any supported image format from disk as RGBA.
    pub fn load(path: impl AsRef<Path>) -> Result<RgbaImage> {
        Ok(image::open(path)?.to_rgba8())
    }

    /// Encodes an image as a self-contained data URI: lossless PNG when the
    /// image has an alpha channel, JPEG otherwise.
    pub fn to_data_uri(image: &DynamicImage) -> Result<String> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AnalyticsError::Encoding("cannot encode an empty image".to_string()));
        }
        let mut bytes = Vec::new();
        let mime = if image.color().has_alpha() {
            image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            "image/png"
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
            "image/jpeg"
        };
        Ok(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
    }

    /// Like `to_data_uri`, but yields an empty string on failure and hands the
    /// fault back to the caller.
    pub fn to_data_uri_or_empty(image: &DynamicImage) -> (String, Option<AnalyticsError>) {
        match to_data_uri(image) {
            Ok(uri) => (uri, None),
            Err(err) => {
                log::error!("error converting image to base64: {err}");
                (String::new(), Some(err))
            }
        }
    }
}
