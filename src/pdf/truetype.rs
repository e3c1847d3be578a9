//! TrueType font embedding
//!
//! Custom fonts are emitted as CID Type-0 fonts with Identity-H encoding:
//! content streams show 16-bit glyph IDs directly, the descendant font
//! carries per-glyph widths for the used subset, and a ToUnicode CMap maps
//! glyph IDs back to text for extraction. The embedded font program is
//! subset to the used glyphs with a deterministic six-letter tag prefix.

use std::collections::{BTreeSet, HashMap};
use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use ttf_parser::Face;

use crate::error::{Error, Result};
use crate::pdf::buffer::PdfBuffer;
use crate::pdf::page::PageManager;

/// Object IDs reserved for one embedded font
#[derive(Debug, Clone, Copy)]
pub struct CustomFontIds {
    pub font: u32,
    pub descendant: u32,
    pub descriptor: u32,
    pub font_file: u32,
    pub to_unicode: u32,
}

/// A template-supplied (or PDF/A-substituted) TrueType font
pub struct CustomFont {
    pub name: String,
    pub resource_name: String,
    data: Vec<u8>,
    units_per_em: u16,
    ascent: i16,
    descent: i16,
    cap_height: i16,
    bbox: [i16; 4],
    char_to_gid: HashMap<char, u16>,
    gid_advance: HashMap<u16, u16>,
    used_chars: BTreeSet<char>,
    used: bool,
    pub object_ids: Option<CustomFontIds>,
}

impl std::fmt::Debug for CustomFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomFont")
            .field("name", &self.name)
            .field("glyphs", &self.char_to_gid.len())
            .field("used_chars", &self.used_chars.len())
            .finish()
    }
}

impl CustomFont {
    /// Parse a TTF/OTF program and precompute the cmap and advance tables
    pub fn parse(name: &str, data: Vec<u8>) -> Result<Self> {
        let face = Face::parse(&data, 0)
            .map_err(|e| Error::InvalidInput(format!("font {name}: {e}")))?;

        let units_per_em = face.units_per_em();
        let ascent = face.ascender();
        let descent = face.descender();
        let cap_height = face.capital_height().unwrap_or(ascent);
        let rect = face.global_bounding_box();
        let bbox = [rect.x_min, rect.y_min, rect.x_max, rect.y_max];

        let mut char_to_gid = HashMap::new();
        let mut gid_advance = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    let Some(c) = char::from_u32(cp) else { return };
                    let Some(gid) = subtable.glyph_index(cp) else {
                        return;
                    };
                    char_to_gid.entry(c).or_insert(gid.0);
                    gid_advance
                        .entry(gid.0)
                        .or_insert_with(|| face.glyph_hor_advance(gid).unwrap_or(0));
                });
            }
        }
        if char_to_gid.is_empty() {
            return Err(Error::InvalidInput(format!(
                "font {name}: no unicode cmap"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            resource_name: String::new(),
            data,
            units_per_em,
            ascent,
            descent,
            cap_height,
            bbox,
            char_to_gid,
            gid_advance,
            used_chars: BTreeSet::new(),
            used: false,
            object_ids: None,
        })
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Forget usage marks (pre-pagination rescans only)
    pub fn reset_usage(&mut self) {
        self.used = false;
        self.used_chars.clear();
    }

    /// Record glyph usage; the used set only ever grows during a layout
    pub fn mark_used(&mut self, text: &str) {
        self.used = true;
        for c in text.chars() {
            if self.char_to_gid.contains_key(&c) {
                self.used_chars.insert(c);
            }
        }
    }

    pub fn glyph_id(&self, c: char) -> Option<u16> {
        self.char_to_gid.get(&c).copied()
    }

    /// 16-bit Identity-H codes for `text`; unmapped chars become .notdef
    pub fn encode(&self, text: &str) -> Vec<u16> {
        text.chars()
            .map(|c| self.glyph_id(c).unwrap_or(0))
            .collect()
    }

    /// Sum of AdvanceWidth entries scaled from font units to points
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: u32 = text
            .chars()
            .filter_map(|c| self.glyph_id(c))
            .filter_map(|gid| self.gid_advance.get(&gid))
            .map(|w| *w as u32)
            .sum();
        units as f32 * size / self.units_per_em as f32
    }

    pub fn assign_object_ids(&mut self, pm: &mut PageManager) {
        self.object_ids = Some(CustomFontIds {
            font: pm.alloc_resource_id(),
            descendant: pm.alloc_resource_id(),
            descriptor: pm.alloc_resource_id(),
            font_file: pm.alloc_resource_id(),
            to_unicode: pm.alloc_resource_id(),
        });
    }

    fn used_glyphs(&self) -> Vec<(u16, char)> {
        let mut glyphs: Vec<(u16, char)> = self
            .used_chars
            .iter()
            .filter_map(|&c| self.glyph_id(c).map(|gid| (gid, c)))
            .collect();
        glyphs.sort();
        glyphs
    }

    /// Six uppercase letters derived from the font name and used glyphs
    fn subset_tag(&self) -> String {
        let mut hash: u64 = 0xcbf29ce484222325;
        let mut feed = |byte: u8| {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        };
        for b in self.name.bytes() {
            feed(b);
        }
        for (gid, _) in self.used_glyphs() {
            feed((gid >> 8) as u8);
            feed(gid as u8);
        }
        let mut tag = String::with_capacity(6);
        for _ in 0..6 {
            tag.push((b'A' + (hash % 26) as u8) as char);
            hash /= 26;
        }
        tag
    }

    /// PDF name for the subset: `ABCDEF+Name` with whitespace stripped
    fn base_font_name(&self) -> String {
        let clean: String = self
            .name
            .chars()
            .filter(|c| !c.is_whitespace() && !"()<>[]{}/%".contains(*c))
            .collect();
        format!("{}+{}", self.subset_tag(), clean)
    }

    /// Scale a font-unit value to 1000-unit glyph space
    fn to_glyph_space(&self, value: i32) -> i64 {
        (value as i64 * 1000) / self.units_per_em as i64
    }

    /// Serialize the five objects for this font
    ///
    /// IDs must have been assigned. Returns (id, body) pairs in emission
    /// order; bodies include the stream envelope where present.
    pub fn emit_objects(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let ids = self
            .object_ids
            .ok_or_else(|| Error::Internal(format!("font {}: no object ids", self.name)))?;
        let base_name = self.base_font_name();
        let glyphs = self.used_glyphs();

        // Subset the font program; fall back to the full program when the
        // subsetter rejects the face (e.g. CFF-flavored OTF).
        let mut gids: Vec<u16> = glyphs.iter().map(|(gid, _)| *gid).collect();
        if !gids.contains(&0) {
            gids.insert(0, 0);
        }
        let program = match subsetter::subset(&self.data, 0, subsetter::Profile::pdf(&gids)) {
            Ok(subset) => subset,
            Err(e) => {
                log::warn!("font {}: subsetting failed ({e:?}), embedding full program", self.name);
                self.data.clone()
            }
        };

        let mut out = Vec::new();

        // Type0 font dictionary
        let mut font = PdfBuffer::new();
        font.push_str("<< /Type /Font /Subtype /Type0 /BaseFont ");
        font.push_name(&base_name);
        font.push_str(" /Encoding /Identity-H /DescendantFonts [");
        font.push_ref(ids.descendant);
        font.push_str("] /ToUnicode ");
        font.push_ref(ids.to_unicode);
        font.push_str(" >>");
        out.push((ids.font, font.into_bytes()));

        // CIDFontType2 descendant with per-glyph widths for the subset
        let mut desc = PdfBuffer::new();
        desc.push_str("<< /Type /Font /Subtype /CIDFontType2 /BaseFont ");
        desc.push_name(&base_name);
        desc.push_str(
            " /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> /FontDescriptor ",
        );
        desc.push_ref(ids.descriptor);
        desc.push_str(" /CIDToGIDMap /Identity /DW 1000 /W [");
        for (gid, _) in &glyphs {
            let advance = self.gid_advance.get(gid).copied().unwrap_or(0);
            desc.push_str(" ");
            desc.push_int(*gid as i64);
            desc.push_str(" [");
            desc.push_int(self.to_glyph_space(advance as i32));
            desc.push_str("]");
        }
        desc.push_str(" ] >>");
        out.push((ids.descendant, desc.into_bytes()));

        // FontDescriptor
        let mut fd = PdfBuffer::new();
        fd.push_str("<< /Type /FontDescriptor /FontName ");
        fd.push_name(&base_name);
        fd.push_str(" /Flags 4 /FontBBox [");
        for (i, v) in self.bbox.iter().enumerate() {
            if i > 0 {
                fd.push_str(" ");
            }
            fd.push_int(self.to_glyph_space(*v as i32));
        }
        fd.push_str("] /ItalicAngle 0 /Ascent ");
        fd.push_int(self.to_glyph_space(self.ascent as i32));
        fd.push_str(" /Descent ");
        fd.push_int(self.to_glyph_space(self.descent as i32));
        fd.push_str(" /CapHeight ");
        fd.push_int(self.to_glyph_space(self.cap_height as i32));
        fd.push_str(" /StemV 80 /FontFile2 ");
        fd.push_ref(ids.font_file);
        fd.push_str(" >>");
        out.push((ids.descriptor, fd.into_bytes()));

        // Embedded program, zlib-compressed
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&program)?;
        let compressed = encoder.finish()?;
        let mut file = PdfBuffer::new();
        file.push_str("<< /Filter /FlateDecode /Length ");
        file.push_int(compressed.len() as i64);
        file.push_str(" /Length1 ");
        file.push_int(program.len() as i64);
        file.push_str(" >>\nstream\n");
        file.push_bytes(&compressed);
        file.push_str("\nendstream");
        out.push((ids.font_file, file.into_bytes()));

        // ToUnicode CMap over the subset
        let cmap = self.to_unicode_cmap(&glyphs);
        let mut tu = PdfBuffer::new();
        tu.push_str("<< /Length ");
        tu.push_int(cmap.len() as i64);
        tu.push_str(" >>\nstream\n");
        tu.push_bytes(&cmap);
        tu.push_str("\nendstream");
        out.push((ids.to_unicode, tu.into_bytes()));

        Ok(out)
    }

    fn to_unicode_cmap(&self, glyphs: &[(u16, char)]) -> Vec<u8> {
        let mut cmap = Vec::new();
        cmap.extend_from_slice(
            b"/CIDInit /ProcSet findresource begin\n\
              12 dict begin\n\
              begincmap\n\
              /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
              /CMapName /Adobe-Identity-UCS def\n\
              /CMapType 2 def\n\
              1 begincodespacerange\n\
              <0000> <ffff>\n\
              endcodespacerange\n",
        );
        // Max 100 entries per beginbfchar block
        for chunk in glyphs.chunks(100) {
            let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
            for (gid, c) in chunk {
                let mut utf16 = [0u16; 2];
                let encoded = c.encode_utf16(&mut utf16);
                let _ = write!(cmap, "<{gid:04x}> <");
                for unit in encoded {
                    let _ = write!(cmap, "{unit:04x}");
                }
                let _ = writeln!(cmap, ">");
            }
            cmap.extend_from_slice(b"endbfchar\n");
        }
        cmap.extend_from_slice(
            b"endcmap\n\
              CMapName currentdict /CMap defineresource pop\n\
              end\n\
              end\n",
        );
        cmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A real face is exercised in the integration tests when Liberation
    // fonts are present; unit tests cover the pure helpers.

    fn stub_font() -> CustomFont {
        let mut char_to_gid = HashMap::new();
        char_to_gid.insert('A', 36);
        char_to_gid.insert('B', 37);
        char_to_gid.insert(' ', 3);
        let mut gid_advance = HashMap::new();
        gid_advance.insert(36u16, 1366u16);
        gid_advance.insert(37, 1366);
        gid_advance.insert(3, 512);
        CustomFont {
            name: "Test Sans".to_string(),
            resource_name: "CF1".to_string(),
            data: Vec::new(),
            units_per_em: 2048,
            ascent: 1900,
            descent: -500,
            cap_height: 1400,
            bbox: [-100, -500, 2000, 1900],
            char_to_gid,
            gid_advance,
            used_chars: BTreeSet::new(),
            used: false,
            object_ids: None,
        }
    }

    #[test]
    fn encoding_maps_unknown_chars_to_notdef() {
        let font = stub_font();
        assert_eq!(font.encode("AB!"), vec![36, 37, 0]);
    }

    #[test]
    fn width_scales_by_units_per_em() {
        let font = stub_font();
        // (1366 + 1366) * 12 / 2048
        let w = font.text_width("AB", 12.0);
        assert!((w - 16.007813).abs() < 1e-3);
    }

    #[test]
    fn used_chars_accumulate() {
        let mut font = stub_font();
        assert!(!font.is_used());
        font.mark_used("A ");
        font.mark_used("B");
        assert!(font.is_used());
        let glyphs = font.used_glyphs();
        assert_eq!(glyphs, vec![(3, ' '), (36, 'A'), (37, 'B')]);
    }

    #[test]
    fn subset_tag_is_six_letters_and_deterministic() {
        let mut font = stub_font();
        font.mark_used("AB");
        let tag = font.subset_tag();
        assert_eq!(tag.len(), 6);
        assert!(tag.chars().all(|c| c.is_ascii_uppercase()));
        assert_eq!(tag, font.subset_tag());
        assert!(font.base_font_name().ends_with("+TestSans"));
    }

    #[test]
    fn cmap_lists_used_glyphs() {
        let mut font = stub_font();
        font.mark_used("A");
        let cmap = font.to_unicode_cmap(&font.used_glyphs());
        let text = String::from_utf8(cmap).unwrap();
        assert!(text.contains("1 beginbfchar"));
        assert!(text.contains("<0024> <0041>"));
    }
}
