//! In-memory image gallery.
//!
use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use common::protocol::{EntrySource, GalleryEntryView};
use image::{ImageFormat, ImageOutputFormat, RgbImage};

/// One image of the gallery.
pub struct GalleryEntry {
    pub id: u64,
    pub source: EntrySource,
    /// Decoded pixels the prediction runs on.
    pub image: Arc<RgbImage>,
    /// Encoded image as served to the page.
    pub encoded: Bytes,
    pub mime: &'static str,
}

impl GalleryEntry {
    pub fn view(&self) -> GalleryEntryView {
        let (width, height) = self.image.dimensions();
        GalleryEntryView {
            id: self.id,
            source: self.source.clone(),
            width,
            height,
            mime: self.mime.to_owned(),
        }
    }
}

/// A decoded image that is not yet part of the gallery.
pub struct NewEntry {
    pub source: EntrySource,
    pub image: RgbImage,
    pub encoded: Bytes,
    pub mime: &'static str,
}

impl NewEntry {
    /// Decode an uploaded file, keeping the original bytes for display.
    pub fn decode(file_name: Option<String>, data: Bytes) -> Result<Self> {
        let format = image::guess_format(&data).context("unrecognized image format")?;
        let image = image::load_from_memory_with_format(&data, format)
            .context("failed to decode image")?
            .to_rgb8();

        Ok(Self {
            source: EntrySource::Upload { file_name },
            image,
            encoded: data,
            mime: mime_of(format),
        })
    }

    /// Wrap a captured frame, encoded as PNG for display.
    pub fn snapshot(image: RgbImage) -> Result<Self> {
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageOutputFormat::Png)
            .context("failed to encode snapshot")?;

        Ok(Self {
            source: EntrySource::Snapshot,
            image,
            encoded: Bytes::from(buf.into_inner()),
            mime: "image/png",
        })
    }
}

fn mime_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Ico => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    entries: Vec<Arc<GalleryEntry>>,
}

/// Collection of all uploaded and captured images.
///
/// Entries are kept in insertion order and never removed.
#[derive(Default)]
pub struct Gallery {
    inner: Mutex<Entries>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image and return its id.
    pub fn insert(&self, new_entry: NewEntry) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;

        inner.entries.push(Arc::new(GalleryEntry {
            id,
            source: new_entry.source,
            image: Arc::new(new_entry.image),
            encoded: new_entry.encoded,
            mime: new_entry.mime,
        }));
        log::debug!("Added gallery entry {}", id);

        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<GalleryEntry>> {
        let inner = self.inner.lock().unwrap();
        // Ids are handed out in insertion order
        inner
            .entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|index| Arc::clone(&inner.entries[index]))
    }

    pub fn views(&self) -> Vec<GalleryEntryView> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().map(|entry| entry.view()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {

    use image::Rgb;

    use super::*;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let image = RgbImage::from_pixel(width, height, Rgb([0, 128, 0]));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    #[test]
    fn decode_keeps_original_bytes() -> Result<()> {
        let data = png_bytes(5, 7);
        let entry = NewEntry::decode(Some("leaf.png".into()), data.clone())?;
        assert_eq!(entry.image.dimensions(), (5, 7));
        assert_eq!(entry.encoded, data);
        assert_eq!(entry.mime, "image/png");
        Ok(())
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = NewEntry::decode(None, Bytes::from_static(b"definitely not an image"));
        assert!(result.is_err());
    }

    #[test]
    fn ids_follow_insertion_order() -> Result<()> {
        let gallery = Gallery::new();
        let first = gallery.insert(NewEntry::snapshot(RgbImage::new(2, 2))?);
        let second = gallery.insert(NewEntry::decode(None, png_bytes(3, 3))?);

        assert!(first < second);
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.get(second).unwrap().image.dimensions(), (3, 3));
        assert!(gallery.get(second + 1).is_none());

        let views = gallery.views();
        assert_eq!(views[0].source, EntrySource::Snapshot);
        assert_eq!(views[1].id, second);

        Ok(())
    }
}
