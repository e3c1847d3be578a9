//! Document metadata: Info dictionary, XMP packet, PDF/A output intent
//!
//! The XMP packet is always embedded. The Info dictionary is skipped
//! entirely in PDF/A mode (PDF/A-4 forbids it). PDF/A output additionally
//! carries an sRGB OutputIntent whose ICC profile is assembled from
//! scratch, field by field, rather than pasted from a blob.

use chrono::{DateTime, Utc};

use crate::pdf::buffer::PdfBuffer;
use crate::pdf::page::PageManager;
use crate::template::Config;

const PRODUCER: &str = "pdf-suite";

/// Info dictionary body (non-PDF/A output only)
pub fn emit_info(pm: &mut PageManager, config: &Config, now: DateTime<Utc>) -> u32 {
    let mut buf = PdfBuffer::new();
    buf.push_str("<<");
    for (key, value) in [
        ("Title", &config.title),
        ("Author", &config.author),
        ("Subject", &config.subject),
        ("Creator", &config.creator),
    ] {
        if let Some(value) = value {
            buf.push_str(" ");
            buf.push_name(key);
            buf.push_str(" ");
            buf.push_literal_string(value);
        }
    }
    buf.push_str(" /Producer ");
    buf.push_literal_string(PRODUCER);
    buf.push_str(" /CreationDate ");
    buf.push_literal_string(&now.format("D:%Y%m%d%H%M%SZ").to_string());
    buf.push_str(" >>");
    pm.add_extra_object(buf.into_bytes())
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// XMP metadata stream
pub fn emit_xmp(pm: &mut PageManager, config: &Config, now: DateTime<Utc>) -> u32 {
    let mut xml = String::new();
    xml.push_str("<?xpacket begin=\"\u{FEFF}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    xml.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xml.push_str(" <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");
    xml.push_str(
        "  <rdf:Description rdf:about=\"\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
         xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\" \
         xmlns:pdf=\"http://ns.adobe.com/pdf/1.3/\" \
         xmlns:pdfaid=\"http://www.aiim.org/pdfa/ns/id/\">\n",
    );
    if let Some(title) = &config.title {
        xml.push_str(&format!(
            "   <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>\n",
            xml_escape(title)
        ));
    }
    if let Some(author) = &config.author {
        xml.push_str(&format!(
            "   <dc:creator><rdf:Seq><rdf:li>{}</rdf:li></rdf:Seq></dc:creator>\n",
            xml_escape(author)
        ));
    }
    xml.push_str(&format!(
        "   <xmp:CreateDate>{}</xmp:CreateDate>\n",
        now.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    xml.push_str(&format!("   <pdf:Producer>{PRODUCER}</pdf:Producer>\n"));
    if config.pdfa {
        xml.push_str("   <pdfaid:part>4</pdfaid:part>\n");
    }
    xml.push_str("  </rdf:Description>\n </rdf:RDF>\n</x:xmpmeta>\n");
    xml.push_str("<?xpacket end=\"w\"?>");

    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Type /Metadata /Subtype /XML /Length ");
    buf.push_int(xml.len() as i64);
    buf.push_str(" >>\nstream\n");
    buf.push_str(&xml);
    buf.push_str("\nendstream");
    pm.add_extra_object(buf.into_bytes())
}

/// Emit the ICC stream and the OutputIntent referencing it (PDF/A)
pub fn emit_output_intent(pm: &mut PageManager) -> (u32, u32) {
    let profile = build_srgb_profile();
    let mut icc = PdfBuffer::new();
    icc.push_str("<< /N 3 /Length ");
    icc.push_int(profile.len() as i64);
    icc.push_str(" >>\nstream\n");
    icc.push_bytes(&profile);
    icc.push_str("\nendstream");
    let icc_id = pm.add_extra_object(icc.into_bytes());

    let mut intent = PdfBuffer::new();
    intent.push_str(
        "<< /Type /OutputIntent /S /GTS_PDFA1 /OutputConditionIdentifier (sRGB) \
         /Info (sRGB IEC61966-2.1) /DestOutputProfile ",
    );
    intent.push_ref(icc_id);
    intent.push_str(" >>");
    let intent_id = pm.add_extra_object(intent.into_bytes());
    (icc_id, intent_id)
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_tag(out: &mut Vec<u8>, tag: &[u8; 4]) {
    out.extend_from_slice(tag);
}

/// s15Fixed16 fixed-point encoding used by ICC XYZ numbers
fn s15f16(v: f64) -> u32 {
    ((v * 65536.0).round() as i32) as u32
}

fn xyz_tag(x: f64, y: f64, z: f64) -> Vec<u8> {
    let mut data = Vec::with_capacity(20);
    push_tag(&mut data, b"XYZ ");
    push_u32(&mut data, 0);
    push_u32(&mut data, s15f16(x));
    push_u32(&mut data, s15f16(y));
    push_u32(&mut data, s15f16(z));
    data
}

fn curv_tag(gamma_u8f8: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(14);
    push_tag(&mut data, b"curv");
    push_u32(&mut data, 0);
    push_u32(&mut data, 1);
    data.extend_from_slice(&gamma_u8f8.to_be_bytes());
    // Tag data is padded to a 4-byte boundary
    data.extend_from_slice(&[0, 0]);
    data
}

fn desc_tag(text: &str) -> Vec<u8> {
    let mut data = Vec::new();
    push_tag(&mut data, b"desc");
    push_u32(&mut data, 0);
    push_u32(&mut data, text.len() as u32 + 1);
    data.extend_from_slice(text.as_bytes());
    data.push(0);
    // Unicode and ScriptCode description blocks, both empty
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(&[0u8; 67]);
    while data.len() % 4 != 0 {
        data.push(0);
    }
    data
}

fn text_tag(text: &str) -> Vec<u8> {
    let mut data = Vec::new();
    push_tag(&mut data, b"text");
    push_u32(&mut data, 0);
    data.extend_from_slice(text.as_bytes());
    data.push(0);
    while data.len() % 4 != 0 {
        data.push(0);
    }
    data
}

/// Build a minimal valid sRGB display profile
///
/// Matrix/TRC profile: D50 white point, D50-adapted sRGB primaries, and a
/// gamma 2.2 curve per channel. Assembled field by field so every length
/// and offset is computed, not copied.
pub fn build_srgb_profile() -> Vec<u8> {
    let gamma = 0x0233u16; // 2.199 in u8Fixed8
    let tags: Vec<([u8; 4], Vec<u8>)> = vec![
        (*b"desc", desc_tag("sRGB")),
        (*b"cprt", text_tag("Public Domain")),
        (*b"wtpt", xyz_tag(0.9642, 1.0, 0.8249)),
        (*b"rXYZ", xyz_tag(0.4360, 0.2225, 0.0139)),
        (*b"gXYZ", xyz_tag(0.3851, 0.7169, 0.0971)),
        (*b"bXYZ", xyz_tag(0.1431, 0.0606, 0.7139)),
        (*b"rTRC", curv_tag(gamma)),
        (*b"gTRC", curv_tag(gamma)),
        (*b"bTRC", curv_tag(gamma)),
    ];

    // 128-byte header, then the tag table, then tag data
    let table_len = 4 + tags.len() * 12;
    let mut header = Vec::with_capacity(128);
    push_u32(&mut header, 0); // total size, patched below
    push_tag(&mut header, b"none"); // preferred CMM
    push_u32(&mut header, 0x02100000); // version 2.1
    push_tag(&mut header, b"mntr");
    push_tag(&mut header, b"RGB ");
    push_tag(&mut header, b"XYZ ");
    header.extend_from_slice(&[0u8; 12]); // creation date
    push_tag(&mut header, b"acsp");
    push_u32(&mut header, 0); // platform
    push_u32(&mut header, 0); // flags
    push_u32(&mut header, 0); // manufacturer
    push_u32(&mut header, 0); // model
    header.extend_from_slice(&[0u8; 8]); // attributes
    push_u32(&mut header, 0); // rendering intent: perceptual
    // PCS illuminant: D50
    push_u32(&mut header, s15f16(0.9642));
    push_u32(&mut header, s15f16(1.0));
    push_u32(&mut header, s15f16(0.8249));
    push_u32(&mut header, 0); // creator
    header.resize(128, 0);

    let mut table = Vec::with_capacity(table_len);
    push_u32(&mut table, tags.len() as u32);
    let mut offset = 128 + table_len;
    for (sig, data) in &tags {
        push_tag(&mut table, sig);
        push_u32(&mut table, offset as u32);
        push_u32(&mut table, data.len() as u32);
        offset += data.len();
    }

    let mut profile = header;
    profile.extend_from_slice(&table);
    for (_, data) in &tags {
        profile.extend_from_slice(data);
    }
    let total = profile.len() as u32;
    profile[0..4].copy_from_slice(&total.to_be_bytes());
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PageDimensions;
    use crate::template::{Orientation, PageSize};

    fn manager() -> PageManager {
        PageManager::new(PageDimensions::new(PageSize::A4, Orientation::Portrait))
    }

    fn extra_text(pm: &PageManager, id: u32) -> String {
        let body = pm
            .extra_objects()
            .find(|(oid, _)| *oid == id)
            .map(|(_, b)| b.to_vec())
            .unwrap();
        String::from_utf8_lossy(&body).to_string()
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn info_dictionary_fields() {
        let mut pm = manager();
        let config = Config {
            title: Some("Report".to_string()),
            author: Some("QA".to_string()),
            ..Default::default()
        };
        let id = emit_info(&mut pm, &config, fixed_now());
        let info = extra_text(&pm, id);
        assert!(info.contains("/Title (Report)"));
        assert!(info.contains("/Author (QA)"));
        assert!(info.contains("/Producer (pdf-suite)"));
        assert!(info.contains("/CreationDate (D:20240501120000Z)"));
    }

    #[test]
    fn xmp_packet_shape() {
        let mut pm = manager();
        let config = Config {
            pdfa: true,
            title: Some("A & B".to_string()),
            ..Default::default()
        };
        let id = emit_xmp(&mut pm, &config, fixed_now());
        let xmp = extra_text(&pm, id);
        assert!(xmp.contains("/Type /Metadata /Subtype /XML"));
        assert!(xmp.contains("<pdfaid:part>4</pdfaid:part>"));
        assert!(xmp.contains("A &amp; B"));
        assert!(xmp.contains("<?xpacket end=\"w\"?>"));
    }

    #[test]
    fn icc_profile_is_well_formed() {
        let profile = build_srgb_profile();
        // Declared size matches the byte count
        let declared = u32::from_be_bytes(profile[0..4].try_into().unwrap());
        assert_eq!(declared as usize, profile.len());
        assert_eq!(&profile[36..40], b"acsp");
        assert_eq!(&profile[16..20], b"RGB ");
        // Tag count and first tag signature
        let count = u32::from_be_bytes(profile[128..132].try_into().unwrap());
        assert_eq!(count, 9);
        assert_eq!(&profile[132..136], b"desc");
        // Every tag's (offset, size) stays inside the profile
        for i in 0..count as usize {
            let base = 132 + i * 12;
            let off = u32::from_be_bytes(profile[base + 4..base + 8].try_into().unwrap());
            let size = u32::from_be_bytes(profile[base + 8..base + 12].try_into().unwrap());
            assert!((off + size) as usize <= profile.len());
        }
    }

    #[test]
    fn output_intent_references_profile() {
        let mut pm = manager();
        let (icc_id, intent_id) = emit_output_intent(&mut pm);
        let intent = extra_text(&pm, intent_id);
        assert!(intent.contains("/S /GTS_PDFA1"));
        assert!(intent.contains(&format!("/DestOutputProfile {icc_id} 0 R")));
    }
}
