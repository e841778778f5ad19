use eframe::egui::ColorImage;

/// Downloads and decodes the thumbnail yt-dlp reported for a video.
///
/// Blocking; call it from `spawn_blocking`. A missing thumbnail is not worth
/// an error in the UI, so failures are only logged.
pub fn fetch_thumbnail(url: &str) -> Option<ColorImage> {
    let bytes = reqwest::blocking::get(url)
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.bytes())
        .map_err(|e| log::debug!("thumbnail {url} unavailable: {e}"))
        .ok()?;
    decode_thumbnail(&bytes)
}

fn decode_thumbnail(bytes: &[u8]) -> Option<ColorImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| log::debug!("thumbnail could not be decoded: {e}"))
        .ok()?
        // Keep the texture small; the preview is drawn at ~160px wide.
        .thumbnail(320, 180)
        .to_rgba8();
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_shrinks_png() {
        let mut png = Vec::new();
        image::DynamicImage::new_rgba8(640, 360)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();

        let decoded = decode_thumbnail(&png).unwrap();
        assert_eq!(decoded.size, [320, 180]);
    }

    #[test]
    fn garbage_is_ignored() {
        assert!(decode_thumbnail(b"<html>404</html>").is_none());
    }
}
