//! Image decoding, deduplication, and XObject emission
//!
//! Input is a base64 payload, with or without a `data:...;base64,` prefix.
//! JPEG bytes pass through untouched under `/DCTDecode`; PNG is rendered to
//! raw RGB (alpha composited against white) and Flate-compressed. SVG input
//! is handed to a pluggable converter that produces Form XObject operators.
//!
//! Decodes are cached process-wide, keyed by FNV-1a of the payload, so a
//! repeated image is decoded once ever; within a generation a repeated
//! payload maps to a single XObject referenced many times.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::ImageFormat;
use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::pdf::buffer::PdfBuffer;
use crate::pdf::page::PageManager;

/// Converts an SVG document into Form XObject content operators with a
/// 1x1 BBox. The engine treats the conversion itself as a collaborator.
pub trait SvgConverter: Send + Sync {
    fn convert(&self, svg: &[u8]) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    /// Original JPEG bytes, untouched
    Dct,
    /// Raw RGB, zlib-compressed
    Flate,
}

/// Decoded image data independent of any generation
#[derive(Debug, Clone)]
struct DecodedImage {
    width: u32,
    height: u32,
    filter: ImageFilter,
    data: Arc<Vec<u8>>,
    is_form: bool,
}

/// An image registered with one generation
#[derive(Debug, Clone)]
pub struct ImageXObject {
    pub object_id: u32,
    pub width: u32,
    pub height: u32,
    pub filter: ImageFilter,
    pub data: Arc<Vec<u8>>,
    /// Form XObject (SVG) rather than a raster image
    pub is_form: bool,
}

impl ImageXObject {
    /// Resource name used from content streams
    pub fn resource_name(&self) -> String {
        format!("Im{}", self.object_id)
    }

    /// Serialize the XObject body (dict + stream envelope)
    pub fn emit(&self) -> Vec<u8> {
        let mut buf = PdfBuffer::new();
        if self.is_form {
            buf.push_str("<< /Type /XObject /Subtype /Form /BBox [0 0 1 1] /Length ");
            buf.push_int(self.data.len() as i64);
            buf.push_str(" >>\nstream\n");
        } else {
            buf.push_str("<< /Type /XObject /Subtype /Image /Width ");
            buf.push_int(self.width as i64);
            buf.push_str(" /Height ");
            buf.push_int(self.height as i64);
            buf.push_str(" /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter ");
            buf.push_name(match self.filter {
                ImageFilter::Dct => "DCTDecode",
                ImageFilter::Flate => "FlateDecode",
            });
            buf.push_str(" /Length ");
            buf.push_int(self.data.len() as i64);
            buf.push_str(" >>\nstream\n");
        }
        let mut out = buf.into_bytes();
        out.extend_from_slice(&self.data);
        out.extend_from_slice(b"\nendstream");
        out
    }
}

lazy_static! {
    static ref DECODE_CACHE: RwLock<HashMap<u64, DecodedImage>> = RwLock::new(HashMap::new());
}

/// FNV-1a over the stripped base64 payload
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Drop any `data:<mime>;base64,` prefix
fn strip_data_url(payload: &str) -> &str {
    if let Some(rest) = payload.strip_prefix("data:") {
        if let Some(idx) = rest.find(";base64,") {
            return &rest[idx + ";base64,".len()..];
        }
    }
    payload
}

/// Per-generation image registry
#[derive(Default)]
pub struct ImageStore {
    by_hash: HashMap<u64, usize>,
    images: Vec<ImageXObject>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base64 payload, decoding at most once per process
    ///
    /// Returns `None` when the payload cannot be decoded; callers fall
    /// back to a placeholder drawing.
    pub fn register(
        &mut self,
        payload: &str,
        pm: &mut PageManager,
        svg: Option<&dyn SvgConverter>,
    ) -> Option<usize> {
        let stripped = strip_data_url(payload.trim());
        let hash = fnv1a64(stripped.as_bytes());
        if let Some(&index) = self.by_hash.get(&hash) {
            return Some(index);
        }

        // The read guard must drop before a decode takes the write lock
        let cached = DECODE_CACHE.read().get(&hash).cloned();
        let decoded = match cached {
            Some(cached) => cached,
            None => {
                let decoded = decode_payload(stripped, svg)?;
                DECODE_CACHE.write().insert(hash, decoded.clone());
                decoded
            }
        };

        let image = ImageXObject {
            object_id: pm.alloc_resource_id(),
            width: decoded.width,
            height: decoded.height,
            filter: decoded.filter,
            data: decoded.data,
            is_form: decoded.is_form,
        };
        self.by_hash.insert(hash, self.images.len());
        self.images.push(image);
        Some(self.images.len() - 1)
    }

    /// Look up a previously registered payload
    pub fn find(&self, payload: &str) -> Option<&ImageXObject> {
        let hash = fnv1a64(strip_data_url(payload.trim()).as_bytes());
        self.by_hash.get(&hash).map(|&i| &self.images[i])
    }

    pub fn get(&self, index: usize) -> &ImageXObject {
        &self.images[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageXObject> {
        self.images.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn decode_payload(stripped: &str, svg: Option<&dyn SvgConverter>) -> Option<DecodedImage> {
    let bytes = match BASE64.decode(stripped) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("image payload is not valid base64: {e}");
            return None;
        }
    };

    if looks_like_svg(&bytes) {
        let ops = svg.and_then(|c| c.convert(&bytes));
        return match ops {
            Some(ops) => Some(DecodedImage {
                width: 1,
                height: 1,
                filter: ImageFilter::Flate,
                data: Arc::new(ops),
                is_form: true,
            }),
            None => {
                log::warn!("SVG image skipped: no converter available");
                None
            }
        };
    }

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        // JPEG passes through so the original compression survives
        let (width, height) = image::ImageReader::with_format(
            std::io::Cursor::new(&bytes),
            ImageFormat::Jpeg,
        )
        .into_dimensions()
        .map_err(|e| log::warn!("unreadable JPEG header: {e}"))
        .ok()?;
        return Some(DecodedImage {
            width,
            height,
            filter: ImageFilter::Dct,
            data: Arc::new(bytes),
            is_form: false,
        });
    }

    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return decode_png(&bytes);
    }

    log::warn!("unsupported image format (not JPEG, PNG, or SVG)");
    None
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(256)];
    let text = String::from_utf8_lossy(head);
    text.trim_start().starts_with("<svg") || text.contains("<svg")
}

fn decode_png(bytes: &[u8]) -> Option<DecodedImage> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| log::warn!("unreadable PNG: {e}"))
        .ok()?;
    let (width, height) = (decoded.width(), decoded.height());

    let rgb = if decoded.color().has_alpha() {
        // Composite against a white page background
        let rgba = decoded.to_rgba8();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for px in rgba.pixels() {
            let [r, g, b, a] = px.0;
            let a = a as u16;
            for channel in [r, g, b] {
                rgb.push(((channel as u16 * a + 255 * (255 - a)) / 255) as u8);
            }
        }
        rgb
    } else {
        decoded.to_rgb8().into_raw()
    };

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&rgb).ok()?;
    let compressed = encoder.finish().ok()?;

    Some(DecodedImage {
        width,
        height,
        filter: ImageFilter::Flate,
        data: Arc::new(compressed),
        is_form: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PageDimensions;
    use crate::template::{Orientation, PageSize};

    fn manager() -> PageManager {
        PageManager::new(PageDimensions::new(PageSize::A4, Orientation::Portrait))
    }

    /// 1x1 red PNG without alpha
    const RED_PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    #[test]
    fn data_url_prefix_is_stripped() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("AAAA"), "AAAA");
    }

    #[test]
    fn fnv_is_stable() {
        // Reference FNV-1a 64 value
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_ne!(fnv1a64(b"a"), fnv1a64(b"b"));
    }

    #[test]
    fn png_decodes_to_flate_rgb() {
        let mut pm = manager();
        let mut store = ImageStore::new();
        let index = store.register(RED_PIXEL_PNG, &mut pm, None).unwrap();
        let image = store.get(index);
        assert_eq!(image.width, 1);
        assert_eq!(image.height, 1);
        assert_eq!(image.filter, ImageFilter::Flate);
        assert!(!image.is_form);
        assert_eq!(image.object_id, 1000);
    }

    #[test]
    fn duplicate_payloads_share_one_xobject() {
        let mut pm = manager();
        let mut store = ImageStore::new();
        let a = store.register(RED_PIXEL_PNG, &mut pm, None).unwrap();
        let with_prefix = format!("data:image/png;base64,{RED_PIXEL_PNG}");
        let b = store.register(&with_prefix, &mut pm, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.iter().count(), 1);
        assert!(store.find(RED_PIXEL_PNG).is_some());
    }

    #[test]
    fn invalid_payload_is_skipped() {
        let mut pm = manager();
        let mut store = ImageStore::new();
        assert!(store.register("not base64 at all!!!", &mut pm, None).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn emitted_dictionary_matches_stream_length() {
        let mut pm = manager();
        let mut store = ImageStore::new();
        let index = store.register(RED_PIXEL_PNG, &mut pm, None).unwrap();
        let body = store.get(index).emit();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("/Subtype /Image"));
        assert!(text.contains("/ColorSpace /DeviceRGB"));
        assert!(text.contains(&format!("/Length {}", store.get(index).data.len())));
    }
}
