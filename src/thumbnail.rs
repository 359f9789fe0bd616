//! Preview images for uploaded PDFs.
//!
//! A rendered first page is preferred. When rendering or storing it fails
//! for any reason a labelled SVG placeholder is stored instead, so only a
//! failure to store the placeholder itself reaches the caller.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    render::{THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH},
    storage::{with_timeout, ObjectStore, RasterizeError, StoragePurpose, StoredObject, StorageError},
};

const MAX_LABEL_LINES: usize = 6;
const LABEL_LINE_CHARS: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailSource {
    Rendered,
    Placeholder { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedThumbnail {
    pub object: StoredObject,
    pub source: ThumbnailSource,
}

pub struct ThumbnailDeriver {
    store: Arc<dyn ObjectStore>,
    call_timeout: Duration,
}

impl ThumbnailDeriver {
    pub fn new(store: Arc<dyn ObjectStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    pub async fn derive(
        &self,
        pdf: &Bytes,
        title: &str,
        base_name: &str,
    ) -> Result<DerivedThumbnail, StorageError> {
        let reason = match self.render_and_store(pdf, base_name).await {
            Ok(object) => {
                debug!(storage_id = %object.storage_id, "stored rendered thumbnail");
                return Ok(DerivedThumbnail {
                    object,
                    source: ThumbnailSource::Rendered,
                });
            }
            Err(reason) => reason,
        };

        warn!(title = %title, reason = %reason, "falling back to placeholder thumbnail");
        let svg = placeholder_svg(title)
            .map_err(|err| StorageError::Rejected(format!("writing placeholder svg: {err}")))?;
        let object = with_timeout(
            self.call_timeout,
            self.store.store(
                Bytes::from(svg),
                &format!("thumb_{base_name}.svg"),
                StoragePurpose::Thumbnail,
            ),
        )
        .await?;

        Ok(DerivedThumbnail {
            object,
            source: ThumbnailSource::Placeholder { reason },
        })
    }

    async fn render_and_store(&self, pdf: &Bytes, base_name: &str) -> Result<StoredObject, String> {
        let png = match timeout(
            self.call_timeout,
            self.store.rasterize_first_page(pdf.clone()),
        )
        .await
        {
            Ok(Ok(png)) => png,
            Ok(Err(err)) => return Err(err.to_string()),
            Err(_) => return Err(RasterizeError::Timeout(self.call_timeout).to_string()),
        };

        with_timeout(
            self.call_timeout,
            self.store.store(
                Bytes::from(png),
                &format!("thumb_{base_name}.png"),
                StoragePurpose::Thumbnail,
            ),
        )
        .await
        .map_err(|err| format!("storing rendered thumbnail: {err}"))
    }
}

/// Same title, same bytes.
pub fn placeholder_svg(title: &str) -> Result<Vec<u8>, quick_xml::Error> {
    let digest = Sha256::digest(title.as_bytes());
    let background = format!(
        "#{:02x}{:02x}{:02x}",
        soften(digest[0]),
        soften(digest[1]),
        soften(digest[2])
    );

    let lines = wrap_label(title);
    let line_height = 28;
    let first_baseline =
        (THUMBNAIL_HEIGHT as usize / 2).saturating_sub(lines.len() * line_height / 2) + 20;

    let width = THUMBNAIL_WIDTH.to_string();
    let height = THUMBNAIL_HEIGHT.to_string();
    let view_box = format!("0 0 {width} {height}");
    let frame_width = (THUMBNAIL_WIDTH - 40).to_string();
    let frame_height = (THUMBNAIL_HEIGHT - 40).to_string();

    let mut writer = Writer::new(Vec::new());

    let mut svg = BytesStart::new("svg");
    svg.push_attribute(("xmlns", "http://www.w3.org/2000/svg"));
    svg.push_attribute(("width", width.as_str()));
    svg.push_attribute(("height", height.as_str()));
    svg.push_attribute(("viewBox", view_box.as_str()));
    writer.write_event(Event::Start(svg))?;

    let mut fill = BytesStart::new("rect");
    fill.push_attribute(("width", "100%"));
    fill.push_attribute(("height", "100%"));
    fill.push_attribute(("fill", background.as_str()));
    writer.write_event(Event::Empty(fill))?;

    let mut frame = BytesStart::new("rect");
    frame.push_attribute(("x", "20"));
    frame.push_attribute(("y", "20"));
    frame.push_attribute(("width", frame_width.as_str()));
    frame.push_attribute(("height", frame_height.as_str()));
    frame.push_attribute(("fill", "none"));
    frame.push_attribute(("stroke", "#ffffff"));
    frame.push_attribute(("stroke-width", "2"));
    writer.write_event(Event::Empty(frame))?;

    write_label(&mut writer, "60", "18", "PDF")?;
    for (index, line) in lines.iter().enumerate() {
        let y = (first_baseline + index * line_height).to_string();
        write_label(&mut writer, &y, "20", line)?;
    }

    writer.write_event(Event::End(BytesEnd::new("svg")))?;
    Ok(writer.into_inner())
}

fn write_label(
    writer: &mut Writer<Vec<u8>>,
    y: &str,
    font_size: &str,
    content: &str,
) -> Result<(), quick_xml::Error> {
    let mut text = BytesStart::new("text");
    text.push_attribute(("x", "50%"));
    text.push_attribute(("y", y));
    text.push_attribute(("text-anchor", "middle"));
    text.push_attribute(("font-family", "sans-serif"));
    text.push_attribute(("font-size", font_size));
    text.push_attribute(("fill", "#ffffff"));
    writer.write_event(Event::Start(text))?;
    writer.write_event(Event::Text(BytesText::new(content)))?;
    writer.write_event(Event::End(BytesEnd::new("text")))?;
    Ok(())
}

// Keeps white text readable on any hash-derived background.
fn soften(channel: u8) -> u8 {
    channel / 2 + 32
}

fn wrap_label(title: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in title.split_whitespace() {
        let word: String = word.chars().take(LABEL_LINE_CHARS).collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > LABEL_LINE_CHARS && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > MAX_LABEL_LINES {
        lines.truncate(MAX_LABEL_LINES);
        if let Some(last) = lines.last_mut() {
            last.push('…');
        }
    }
    if lines.is_empty() {
        lines.push("Untitled".to_string());
    }
    lines
}
