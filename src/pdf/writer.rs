//! Final document assembly: header, objects, xref table, trailer
//!
//! Objects are emitted in a fixed order (catalog, page tree, pages,
//! content streams, standard fonts, images, custom fonts, extra objects)
//! and each object's byte offset is recorded as it is written, so the
//! cross-reference table falls out of the same pass. Object IDs are sparse
//! by design; the xref groups consecutive IDs into subsections.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::pdf::buffer::PdfBuffer;
use crate::pdf::fonts::FontRegistry;
use crate::pdf::images::ImageStore;
use crate::pdf::page::PageManager;

/// Document-level objects the catalog and trailer reference
#[derive(Debug, Default)]
pub struct DocumentRefs {
    pub outlines: Option<u32>,
    pub dests: Option<u32>,
    pub acroform: Option<u32>,
    pub metadata: Option<u32>,
    pub output_intent: Option<u32>,
    pub info: Option<u32>,
}

struct Assembler {
    out: Vec<u8>,
    offsets: BTreeMap<u32, usize>,
}

impl Assembler {
    fn write_object(&mut self, id: u32, body: &[u8]) -> Result<()> {
        if self.offsets.insert(id, self.out.len()).is_some() {
            return Err(Error::Internal(format!("object {id} emitted twice")));
        }
        let mut header = String::new();
        let _ = write!(header, "{id} 0 obj\n");
        self.out.extend_from_slice(header.as_bytes());
        self.out.extend_from_slice(body);
        self.out.extend_from_slice(b"\nendobj\n");
        Ok(())
    }
}

/// Zlib-compress a content stream and wrap it in a stream object body
fn content_stream_body(content: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content)?;
    let compressed = encoder.finish()?;
    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Filter /FlateDecode /Length ");
    buf.push_int(compressed.len() as i64);
    buf.push_str(" >>\nstream\n");
    buf.push_bytes(&compressed);
    buf.push_str("\nendstream");
    Ok(buf.into_bytes())
}

fn catalog_body(refs: &DocumentRefs, pdfa: bool) -> Vec<u8> {
    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Type /Catalog /Pages 2 0 R");
    if let Some(id) = refs.outlines {
        buf.push_str(" /Outlines ");
        buf.push_ref(id);
    }
    if let Some(id) = refs.dests {
        buf.push_str(" /Names << /Dests ");
        buf.push_ref(id);
        buf.push_str(" >>");
    }
    if let Some(id) = refs.acroform {
        buf.push_str(" /AcroForm ");
        buf.push_ref(id);
    }
    if let Some(id) = refs.metadata {
        buf.push_str(" /Metadata ");
        buf.push_ref(id);
    }
    if pdfa {
        if let Some(id) = refs.output_intent {
            buf.push_str(" /OutputIntents [");
            buf.push_ref(id);
            buf.push_str("]");
        }
    }
    buf.push_str(" >>");
    buf.into_bytes()
}

fn page_body(
    pm: &PageManager,
    registry: &FontRegistry,
    images: &ImageStore,
    index: usize,
) -> Vec<u8> {
    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 ");
    buf.push_f2(pm.dims.width);
    buf.push_str(" ");
    buf.push_f2(pm.dims.height);
    buf.push_str("] /Contents ");
    buf.push_ref(pm.content_stream_id(index));

    buf.push_str(" /Resources <<");
    let fonts = registry.resources();
    if !fonts.is_empty() {
        buf.push_str(" /Font <<");
        for (name, id) in &fonts {
            buf.push_str(" ");
            buf.push_name(name);
            buf.push_str(" ");
            buf.push_ref(*id);
        }
        buf.push_str(" >>");
    }
    if !images.is_empty() {
        buf.push_str(" /XObject <<");
        for image in images.iter() {
            buf.push_str(" ");
            buf.push_name(&image.resource_name());
            buf.push_str(" ");
            buf.push_ref(image.object_id);
        }
        buf.push_str(" >>");
    }
    buf.push_str(" >>");

    let annots = pm.annots_for(index);
    if !annots.is_empty() {
        buf.push_str(" /Annots [");
        for (i, id) in annots.iter().enumerate() {
            if i > 0 {
                buf.push_str(" ");
            }
            buf.push_ref(*id);
        }
        buf.push_str("]");
    }
    buf.push_str(" >>");
    buf.into_bytes()
}

fn hex16(digest: &[u8; 16]) -> String {
    let mut s = String::with_capacity(32);
    for b in digest {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Group object IDs into consecutive runs for xref subsections
fn subsections(ids: &[u32]) -> Vec<(u32, Vec<u32>)> {
    let mut groups: Vec<(u32, Vec<u32>)> = Vec::new();
    for &id in ids {
        match groups.last_mut() {
            Some((start, members)) if *start + members.len() as u32 == id => members.push(id),
            _ => groups.push((id, vec![id])),
        }
    }
    groups
}

/// Assemble the final byte stream per the fixed emission order
pub fn assemble(
    pm: &PageManager,
    registry: &FontRegistry,
    images: &ImageStore,
    refs: &DocumentRefs,
    pdfa: bool,
) -> Result<Vec<u8>> {
    let mut asm = Assembler {
        out: Vec::with_capacity(16 * 1024),
        offsets: BTreeMap::new(),
    };

    // Header plus a binary comment so sniffing readers treat us as binary
    asm.out
        .extend_from_slice(if pdfa { b"%PDF-2.0\n" } else { b"%PDF-1.7\n" });
    asm.out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    asm.write_object(1, &catalog_body(refs, pdfa))?;

    let mut pages = PdfBuffer::new();
    pages.push_str("<< /Type /Pages /Kids [");
    for (i, id) in pm.page_ids().iter().enumerate() {
        if i > 0 {
            pages.push_str(" ");
        }
        pages.push_ref(*id);
    }
    pages.push_str("] /Count ");
    pages.push_int(pm.page_count() as i64);
    pages.push_str(" >>");
    asm.write_object(2, &pages.into_bytes())?;

    for index in 0..pm.page_count() {
        asm.write_object(pm.page_id(index), &page_body(pm, registry, images, index))?;
    }
    for index in 0..pm.page_count() {
        let body = content_stream_body(pm.content_for(index).as_bytes())?;
        asm.write_object(pm.content_stream_id(index), &body)?;
    }

    for (id, body) in registry.standard_font_objects() {
        asm.write_object(id, &body)?;
    }
    for image in images.iter() {
        asm.write_object(image.object_id, &image.emit())?;
    }
    for font in registry.custom_fonts() {
        for (id, body) in font.emit_objects()? {
            asm.write_object(id, &body)?;
        }
    }
    for (id, body) in pm.extra_objects() {
        asm.write_object(id, body)?;
    }

    // Document ID: MD5 of everything so far, MD5 of a fresh nonce
    let first = Md5::digest(&asm.out);
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    let mut nonce = Vec::with_capacity(24);
    nonce.extend_from_slice(&nanos.to_be_bytes());
    nonce.extend_from_slice(&(asm.out.len() as u64).to_be_bytes());
    nonce.extend_from_slice(&std::process::id().to_be_bytes());
    let second = Md5::digest(&nonce);

    // Cross-reference table with compact subsections
    let ids: Vec<u32> = asm.offsets.keys().copied().collect();
    let startxref = asm.out.len();
    asm.out.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    for (start, members) in subsections(&ids) {
        let mut header = String::new();
        let _ = write!(header, "{start} {}\n", members.len());
        asm.out.extend_from_slice(header.as_bytes());
        for id in members {
            let mut entry = String::new();
            let _ = write!(entry, "{:010} 00000 n \n", asm.offsets[&id]);
            asm.out.extend_from_slice(entry.as_bytes());
        }
    }

    let size = ids.iter().max().copied().unwrap_or(0) + 1;
    let mut trailer = PdfBuffer::new();
    trailer.push_str("trailer\n<< /Size ");
    trailer.push_int(size as i64);
    trailer.push_str(" /Root 1 0 R");
    if let Some(info) = refs.info {
        trailer.push_str(" /Info ");
        trailer.push_ref(info);
    }
    trailer.push_str(" /ID [<");
    trailer.push_str(&hex16(&first.into()));
    trailer.push_str("> <");
    trailer.push_str(&hex16(&second.into()));
    trailer.push_str(">] >>\nstartxref\n");
    trailer.push_int(startxref as i64);
    trailer.push_str("\n%%EOF\n");
    asm.out.extend_from_slice(trailer.as_bytes());

    Ok(asm.out)
}
