//! Font registry: standard 14 fonts, custom TrueType fonts, width tables
//!
//! The registry is per-generation. It resolves a requested font name to a
//! concrete font (custom fonts shadow standard fonts of the same name),
//! tracks which fonts and glyphs the document actually uses, and assigns
//! object IDs late so emission order stays deterministic. Only fonts that
//! were used are ever emitted.

use std::collections::HashMap;

use crate::pdf::buffer::PdfBuffer;
use crate::pdf::page::PageManager;
use crate::pdf::truetype::CustomFont;

/// The standard 14 Type-1 fonts, in `/F1`..`/F14` resource order
pub const STANDARD_FONTS: [&str; 14] = [
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Symbol",
    "ZapfDingbats",
];

pub fn standard_index(name: &str) -> Option<usize> {
    STANDARD_FONTS.iter().position(|f| *f == name)
}

/// Resolved font handle used by the emitters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FontKey {
    Standard(usize),
    Custom(String),
}

/// How a piece of text is shown in a content stream
#[derive(Debug, Clone, PartialEq)]
pub enum TextShow {
    /// `(escaped) Tj`
    Literal(String),
    /// `<16-bit glyph codes> Tj` for Identity-H custom fonts
    Hex(Vec<u16>),
}

/// Apply bold/italic style flags to a font-family name
///
/// `Helvetica` + bold becomes `Helvetica-Bold`, `Times` family names use
/// the Roman/Italic spellings. Names outside the three styled families are
/// returned unchanged.
fn styled_name(name: &str, bold: bool, italic: bool) -> String {
    if !bold && !italic {
        return name.to_string();
    }
    let family = if name.starts_with("Helvetica") {
        "Helvetica"
    } else if name.starts_with("Times") {
        "Times"
    } else if name.starts_with("Courier") {
        "Courier"
    } else {
        return name.to_string();
    };
    let suffix = match (family, bold, italic) {
        ("Times", true, true) => "-BoldItalic",
        ("Times", true, false) => "-Bold",
        ("Times", false, true) => "-Italic",
        (_, true, true) => "-BoldOblique",
        (_, true, false) => "-Bold",
        (_, false, true) => "-Oblique",
        _ => unreachable!(),
    };
    format!("{family}{suffix}")
}

pub struct FontRegistry {
    custom: Vec<CustomFont>,
    custom_index: HashMap<String, usize>,
    used_standard: [bool; 14],
    /// Assigned late: (font dict ID, descriptor ID in Arlington mode)
    standard_ids: [Option<(u32, Option<u32>)>; 14],
    arlington: bool,
}

impl FontRegistry {
    pub fn new(arlington: bool) -> Self {
        Self {
            custom: Vec::new(),
            custom_index: HashMap::new(),
            used_standard: [false; 14],
            standard_ids: [None; 14],
            arlington,
        }
    }

    pub fn arlington(&self) -> bool {
        self.arlington
    }

    /// Register a custom font; it shadows any standard font with its name
    pub fn register_custom(&mut self, mut font: CustomFont) {
        font.resource_name = format!("CF{}", self.custom.len() + 1);
        self.custom_index
            .insert(font.name.clone(), self.custom.len());
        self.custom.push(font);
    }

    pub fn has_custom(&self, name: &str) -> bool {
        self.custom_index.contains_key(name)
    }

    /// Resolve a requested name plus style flags to a concrete font
    pub fn resolve(&self, name: &str, bold: bool, italic: bool) -> FontKey {
        let styled = styled_name(name, bold, italic);
        for candidate in [styled.as_str(), name] {
            if self.custom_index.contains_key(candidate) {
                return FontKey::Custom(candidate.to_string());
            }
        }
        for candidate in [styled.as_str(), name] {
            if let Some(index) = standard_index(candidate) {
                return FontKey::Standard(index);
            }
        }
        // Unknown family: Helvetica with the style flags applied
        let fallback = styled_name("Helvetica", bold, italic);
        FontKey::Standard(standard_index(&fallback).unwrap_or(0))
    }

    /// Record that `text` is rendered in this font (drives subsetting)
    pub fn mark_used(&mut self, key: &FontKey, text: &str) {
        match key {
            FontKey::Standard(index) => self.used_standard[*index] = true,
            FontKey::Custom(name) => {
                if let Some(&i) = self.custom_index.get(name) {
                    self.custom[i].mark_used(text);
                }
            }
        }
    }

    /// Estimated advance width of `text` at `size` points
    ///
    /// Standard fonts use a per-family average glyph factor; custom fonts
    /// sum real AdvanceWidth entries scaled by units-per-em.
    pub fn text_width(&self, key: &FontKey, text: &str, size: f32) -> f32 {
        match key {
            FontKey::Standard(index) => {
                let factor = match *index {
                    8..=11 => 0.6,  // Courier family
                    4..=7 => 0.45,  // Times family
                    _ => 0.5,       // Helvetica family and symbols
                };
                text.chars().count() as f32 * size * factor
            }
            FontKey::Custom(name) => self
                .custom_index
                .get(name)
                .map(|&i| self.custom[i].text_width(text, size))
                .unwrap_or(0.0),
        }
    }

    /// Resource name (`F1`..`F14` or `CF1`..) for content-stream `Tf` use
    pub fn resource_name(&self, key: &FontKey) -> String {
        match key {
            FontKey::Standard(index) => format!("F{}", index + 1),
            FontKey::Custom(name) => self
                .custom_index
                .get(name)
                .map(|&i| self.custom[i].resource_name.clone())
                .unwrap_or_else(|| "F1".to_string()),
        }
    }

    /// Encode text for a show operator in this font
    pub fn encode_text(&self, key: &FontKey, text: &str) -> TextShow {
        match key {
            FontKey::Standard(_) => TextShow::Literal(text.to_string()),
            FontKey::Custom(name) => match self.custom_index.get(name) {
                Some(&i) => TextShow::Hex(self.custom[i].encode(text)),
                None => TextShow::Literal(text.to_string()),
            },
        }
    }

    pub fn is_custom(&self, key: &FontKey) -> bool {
        matches!(key, FontKey::Custom(_))
    }

    /// Standard fonts the document has used so far
    pub fn used_standard_names(&self) -> Vec<&'static str> {
        (0..14)
            .filter(|&i| self.used_standard[i])
            .map(|i| STANDARD_FONTS[i])
            .collect()
    }

    /// Forget all usage marks (PDF/A rescan after substitution)
    pub fn reset_usage(&mut self) {
        self.used_standard = [false; 14];
        for font in &mut self.custom {
            font.reset_usage();
        }
    }

    /// Assign object IDs to every used font
    ///
    /// Runs after all image XObjects are registered so fonts land in the
    /// resource range behind the images, keeping emission order stable.
    pub fn assign_object_ids(&mut self, pm: &mut PageManager) {
        for font in self.custom.iter_mut().filter(|f| f.is_used()) {
            font.assign_object_ids(pm);
        }
        for index in 0..14 {
            if self.used_standard[index] {
                let dict_id = pm.alloc_resource_id();
                let descriptor_id = self.arlington.then(|| pm.alloc_resource_id());
                self.standard_ids[index] = Some((dict_id, descriptor_id));
            }
        }
    }

    /// Used fonts as (resource name, font dict object ID) pairs
    pub fn resources(&self) -> Vec<(String, u32)> {
        let mut out = Vec::new();
        for index in 0..14 {
            if let Some((dict_id, _)) = self.standard_ids[index] {
                out.push((format!("F{}", index + 1), dict_id));
            }
        }
        for font in self.custom.iter().filter(|f| f.is_used()) {
            if let Some(ids) = &font.object_ids {
                out.push((font.resource_name.clone(), ids.font));
            }
        }
        out
    }

    pub fn custom_fonts(&self) -> impl Iterator<Item = &CustomFont> {
        self.custom.iter().filter(|f| f.is_used())
    }

    /// Serialize the used standard-font objects
    ///
    /// Non-Arlington mode emits minimal Type-1 dictionaries. Arlington
    /// mode adds FirstChar/LastChar/Widths and a FontDescriptor object.
    pub fn standard_font_objects(&self) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        for index in 0..14 {
            let Some((dict_id, descriptor_id)) = self.standard_ids[index] else {
                continue;
            };
            let name = STANDARD_FONTS[index];
            let mut dict = PdfBuffer::new();
            dict.push_str("<< /Type /Font /Subtype /Type1 /BaseFont ");
            dict.push_name(name);
            if let Some(descriptor_id) = descriptor_id {
                dict.push_str(" /FirstChar 32 /LastChar 126 /Widths [");
                for (i, w) in standard_widths(index).iter().enumerate() {
                    if i > 0 {
                        dict.push_str(" ");
                    }
                    dict.push_int(*w as i64);
                }
                dict.push_str("] /FontDescriptor ");
                dict.push_ref(descriptor_id);
                dict.push_str(" >>");
                out.push((dict_id, dict.into_bytes()));
                out.push((descriptor_id, standard_descriptor(index)));
            } else {
                dict.push_str(" >>");
                out.push((dict_id, dict.into_bytes()));
            }
        }
        out
    }
}

/// Widths for ASCII 32..=126 in glyph-space units
///
/// Helvetica and Times values follow the Adobe AFM metrics; the oblique
/// and bold faces reuse the regular table, which is close enough for the
/// compliance dictionaries (layout itself never reads these). Courier is
/// fixed-pitch, Symbol and ZapfDingbats get the fixed-pitch fallback.
fn standard_widths(index: usize) -> [i32; 95] {
    match index {
        0..=3 => HELVETICA_WIDTHS,
        4..=7 => TIMES_WIDTHS,
        _ => [600; 95],
    }
}

#[rustfmt::skip]
const HELVETICA_WIDTHS: [i32; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333,
    278, 278, 556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278,
    584, 584, 584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, 722, 278,
    500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
    667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556,
    278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500,
    278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const TIMES_WIDTHS: [i32; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333,
    250, 278, 500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278,
    564, 564, 564, 444, 921, 722, 667, 667, 722, 611, 556, 722, 722, 333,
    389, 722, 611, 889, 722, 722, 556, 722, 667, 556, 611, 722, 722, 944,
    722, 722, 611, 333, 278, 333, 469, 500, 333, 444, 500, 444, 500, 444,
    333, 500, 500, 278, 278, 500, 278, 778, 500, 500, 500, 500, 333, 389,
    278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

/// Synthesized FontDescriptor for a standard font (Arlington mode)
fn standard_descriptor(index: usize) -> Vec<u8> {
    // (flags, bbox, ascent, descent, cap height, stem v)
    let (flags, bbox, ascent, descent, cap, stem) = match index {
        0..=3 => (32, [-166, -225, 1000, 931], 718, -207, 718, 88),
        4..=7 => (34, [-168, -218, 1000, 898], 683, -217, 662, 84),
        8..=11 => (33, [-23, -250, 715, 805], 629, -157, 562, 51),
        _ => (4, [-180, -293, 1090, 1010], 800, -200, 700, 85),
    };
    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Type /FontDescriptor /FontName ");
    buf.push_name(STANDARD_FONTS[index]);
    buf.push_str(" /Flags ");
    buf.push_int(flags);
    buf.push_str(" /FontBBox [");
    for (i, v) in bbox.iter().enumerate() {
        if i > 0 {
            buf.push_str(" ");
        }
        buf.push_int(*v);
    }
    buf.push_str("] /ItalicAngle 0 /Ascent ");
    buf.push_int(ascent);
    buf.push_str(" /Descent ");
    buf.push_int(descent);
    buf.push_str(" /CapHeight ");
    buf.push_int(cap);
    buf.push_str(" /StemV ");
    buf.push_int(stem);
    buf.push_str(" >>");
    buf.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PageDimensions;
    use crate::template::{Orientation, PageSize};

    fn registry() -> FontRegistry {
        FontRegistry::new(false)
    }

    #[test]
    fn standard_names_map_to_fixed_slots() {
        assert_eq!(standard_index("Helvetica"), Some(0));
        assert_eq!(standard_index("ZapfDingbats"), Some(13));
        let reg = registry();
        assert_eq!(
            reg.resource_name(&FontKey::Standard(4)),
            "F5".to_string()
        );
    }

    #[test]
    fn style_flags_select_family_members() {
        let reg = registry();
        assert_eq!(
            reg.resolve("Helvetica", true, false),
            FontKey::Standard(1)
        );
        assert_eq!(reg.resolve("Times-Roman", true, true), FontKey::Standard(7));
        assert_eq!(reg.resolve("Courier", false, true), FontKey::Standard(10));
    }

    #[test]
    fn unknown_fonts_fall_back_to_helvetica_family() {
        let reg = registry();
        assert_eq!(reg.resolve("Comic Sans", false, false), FontKey::Standard(0));
        assert_eq!(reg.resolve("Comic Sans", true, false), FontKey::Standard(1));
    }

    #[test]
    fn width_estimation_factors() {
        let reg = registry();
        let helv = reg.text_width(&FontKey::Standard(0), "abcd", 10.0);
        let courier = reg.text_width(&FontKey::Standard(8), "abcd", 10.0);
        let times = reg.text_width(&FontKey::Standard(4), "abcd", 10.0);
        assert!((helv - 20.0).abs() < 1e-4);
        assert!((courier - 24.0).abs() < 1e-4);
        assert!((times - 18.0).abs() < 1e-4);
    }

    #[test]
    fn only_used_fonts_get_objects() {
        let mut reg = registry();
        let key = reg.resolve("Helvetica", false, false);
        reg.mark_used(&key, "hello");
        let mut pm = PageManager::new(PageDimensions::new(
            PageSize::A4,
            Orientation::Portrait,
        ));
        reg.assign_object_ids(&mut pm);
        let resources = reg.resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].0, "F1");
        assert_eq!(reg.standard_font_objects().len(), 1);
    }

    #[test]
    fn arlington_emits_widths_and_descriptor() {
        let mut reg = FontRegistry::new(true);
        let key = reg.resolve("Courier", false, false);
        reg.mark_used(&key, "x");
        let mut pm = PageManager::new(PageDimensions::new(
            PageSize::A4,
            Orientation::Portrait,
        ));
        reg.assign_object_ids(&mut pm);
        let objects = reg.standard_font_objects();
        assert_eq!(objects.len(), 2);
        let dict = String::from_utf8_lossy(&objects[0].1).to_string();
        assert!(dict.contains("/FirstChar 32"));
        assert!(dict.contains("/Widths ["));
        assert!(dict.contains("/FontDescriptor"));
        let descriptor = String::from_utf8_lossy(&objects[1].1).to_string();
        assert!(descriptor.contains("/FontName /Courier"));
    }

    #[test]
    fn width_tables_cover_printable_ascii() {
        assert_eq!(HELVETICA_WIDTHS.len(), 95);
        assert_eq!(TIMES_WIDTHS.len(), 95);
        // space and digits, the two most load-bearing entries
        assert_eq!(HELVETICA_WIDTHS[0], 278);
        assert_eq!(HELVETICA_WIDTHS[(b'0' - 32) as usize], 556);
        assert_eq!(TIMES_WIDTHS[0], 250);
    }
}
