//! Local first-page rasterization with PDFium.

use std::{io::Cursor, panic};

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use tokio::task;

use crate::storage::RasterizeError;

pub const THUMBNAIL_WIDTH: u32 = 300;
pub const THUMBNAIL_HEIGHT: u32 = 400;

const PDF_MAGIC: &[u8] = b"%PDF-";

pub async fn rasterize_first_page(pdf: Bytes) -> Result<Vec<u8>, RasterizeError> {
    if !looks_like_pdf(&pdf) {
        return Err(RasterizeError::Unsupported(
            "missing %PDF- header".to_string(),
        ));
    }

    task::spawn_blocking(move || render_first_page(&pdf))
        .await
        .map_err(|err| RasterizeError::Render(format!("render task failed: {err}")))?
}

/// Leading whitespace is tolerated, the same way PDF readers do.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(PDF_MAGIC)
}

fn render_first_page(bytes: &[u8]) -> Result<Vec<u8>, RasterizeError> {
    let pdfium = panic::catch_unwind(|| Pdfium::default())
        .map_err(|_| RasterizeError::Unsupported("PDFium library unavailable".to_string()))?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| RasterizeError::Render(format!("load pdf: {err}")))?;

    let page = document
        .pages()
        .get(0)
        .map_err(|err| RasterizeError::Render(format!("load first page: {err}")))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(THUMBNAIL_WIDTH as i32)
        .set_maximum_height(THUMBNAIL_HEIGHT as i32)
        .render_form_data(true);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|err| RasterizeError::Render(format!("render pdf page: {err}")))?;

    let image = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
    let image = if image.width() > THUMBNAIL_WIDTH || image.height() > THUMBNAIL_HEIGHT {
        image.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT)
    } else {
        image
    };

    encode_png(image)
}

fn encode_png(image: DynamicImage) -> Result<Vec<u8>, RasterizeError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|err| RasterizeError::Io(err.to_string()))?;
    Ok(cursor.into_inner())
}
