//! Declarative document template model
//!
//! A [`Template`] describes the document to generate: page configuration,
//! an optional title, tables, images, spacers, form fields, bookmarks, and
//! a footer. Templates carry no PDF state; the generation pipeline walks
//! them exactly once.
//!
//! Cell styling uses a compact "props" string:
//! `fontName:fontSize:styleCode:alignment:borderL:borderR:borderT:borderB`
//! where the style code is three `0`/`1` characters for bold, italic and
//! underline. Missing or unparsable fields fall back to
//! Helvetica / 12 / no style / left / no borders.

use serde::Deserialize;

use crate::layout::Alignment;

/// Named page sizes with a fixed dimension table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PageSize {
    #[default]
    #[serde(alias = "a4")]
    A4,
    #[serde(alias = "a5")]
    A5,
    #[serde(alias = "a3")]
    A3,
    #[serde(alias = "letter", alias = "LETTER")]
    Letter,
    #[serde(alias = "legal", alias = "LEGAL")]
    Legal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Top-level document template
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Template {
    pub config: Config,
    pub title: Option<Title>,
    pub tables: Vec<Table>,
    pub images: Vec<ImageElement>,
    pub spacers: Vec<Spacer>,
    /// Ordered mixed body; when non-empty it replaces the separate
    /// `tables` / `images` / `spacers` lists
    pub elements: Vec<Element>,
    pub footer: Option<Footer>,
}

/// Page-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub page: PageSize,
    pub orientation: Orientation,
    /// Draw a rectangle along the page margins on every page
    pub page_border: bool,
    /// Diagonal light-gray watermark text on every page
    pub watermark: Option<String>,
    /// PDF/A-4 output: PDF 2.0 header, Liberation font substitution,
    /// XMP + OutputIntent, no Info dictionary
    pub pdfa: bool,
    /// Emit full font dictionaries (FirstChar/LastChar/Widths/Descriptor)
    /// for the standard fonts
    pub arlington: bool,
    /// TrueType fonts supplied with the template, base64-encoded
    pub fonts: Vec<CustomFontSpec>,
    /// Where to look for Liberation fonts before the OS fallback paths
    pub fonts_directory: Option<std::path::PathBuf>,
    /// Allow fetching the Liberation archive on first PDF/A use
    pub allow_font_download: bool,
    pub signature: Option<SignatureField>,
    pub bookmarks: Vec<Bookmark>,
    // Document information (Info dictionary and XMP)
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
}

/// A TrueType/OTF font shipped inside the template
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFontSpec {
    /// Name used in props strings; shadows a standard font of the same name
    pub name: String,
    /// Base64-encoded font program
    pub data: String,
}

/// An invisible signature field; signing itself is an external concern
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureField {
    pub name: String,
    #[serde(default)]
    pub page: Option<usize>,
}

/// Document title: either fixed text or an embedded table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Title {
    pub text: Option<String>,
    pub props: String,
    /// Background fill behind the title text, `#RRGGBB[AA]`
    pub background: Option<String>,
    /// URI the title links to
    pub link: Option<String>,
    pub table: Option<Table>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Table {
    pub max_columns: usize,
    /// Relative column weights; wrong-length input falls back to uniform
    pub column_widths: Vec<f32>,
    /// Base row height in points before per-row multipliers
    pub row_height: f32,
    pub rows: Vec<Row>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            max_columns: 1,
            column_widths: Vec::new(),
            row_height: 25.0,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// Scales the table's base row height for this row only
    pub height_multiplier: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cell {
    pub text: Option<String>,
    pub image: Option<CellImage>,
    /// Static checkbox drawing (not a form field); `Some(true)` is checked
    pub checkbox: Option<bool>,
    /// Interactive form field widget
    pub field: Option<FormFieldSpec>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    /// Cell background fill, `#RRGGBB[AA]`
    pub background: Option<String>,
    /// Text color, `#RRGGBB[AA]`
    pub color: Option<String>,
    /// URI this cell links to
    pub link: Option<String>,
    pub props: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CellImage {
    /// Base64 payload, with or without a `data:...;base64,` prefix
    pub data: String,
    /// Placeholder label when the image cannot be decoded
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Checkbox,
    Radio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioShape {
    #[default]
    Round,
    Square,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormFieldSpec {
    pub kind: FieldKind,
    pub name: String,
    /// Text-field value, or the radio option name
    pub value: Option<String>,
    /// Checkbox/radio on state; `None` leaves the field unset
    pub checked: Option<bool>,
    pub shape: RadioShape,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageElement {
    pub data: String,
    pub width: Option<f32>,
    pub height: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Spacer {
    pub height: f32,
}

impl Default for Spacer {
    fn default() -> Self {
        Self { height: 20.0 }
    }
}

/// One entry of the ordered mixed body
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Table(Table),
    Image(ImageElement),
    Spacer(Spacer),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Footer {
    pub text: Option<String>,
    pub props: String,
}

/// Bookmark tree node
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bookmark {
    pub title: String,
    /// 1-based page number
    pub page: Option<usize>,
    pub y: Option<f32>,
    /// Named destination key; reuses an existing destination when present
    pub dest: Option<String>,
    /// Children visible when the viewer opens the document
    pub open: Option<bool>,
    pub children: Vec<Bookmark>,
}

// --- Props string grammar ---

/// Cell border widths; zero means no border on that edge
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Borders {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Borders {
    pub fn any(&self) -> bool {
        self.left > 0.0 || self.right > 0.0 || self.top > 0.0 || self.bottom > 0.0
    }
}

/// Parsed cell/title style
#[derive(Debug, Clone, PartialEq)]
pub struct CellStyle {
    pub font: String,
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub align: Alignment,
    pub borders: Borders,
}

impl Default for CellStyle {
    fn default() -> Self {
        Self {
            font: "Helvetica".to_string(),
            size: 12.0,
            bold: false,
            italic: false,
            underline: false,
            align: Alignment::Left,
            borders: Borders::default(),
        }
    }
}

impl CellStyle {
    /// Parse a props string; every missing or malformed field keeps its
    /// default, so any input yields a usable style.
    pub fn parse(props: &str) -> Self {
        let mut style = CellStyle::default();
        let mut parts = props.split(':');

        if let Some(font) = parts.next() {
            if !font.is_empty() {
                style.font = font.to_string();
            }
        }
        if let Some(size) = parts.next() {
            if let Ok(size) = size.parse::<f32>() {
                if size > 0.0 {
                    style.size = size;
                }
            }
        }
        if let Some(code) = parts.next() {
            let mut chars = code.chars();
            style.bold = chars.next() == Some('1');
            style.italic = chars.next() == Some('1');
            style.underline = chars.next() == Some('1');
        }
        if let Some(align) = parts.next() {
            style.align = Alignment::parse(align);
        }
        let mut border = |target: &mut f32| {
            if let Some(w) = parts.next() {
                if let Ok(w) = w.parse::<f32>() {
                    if w > 0.0 {
                        *target = w;
                    }
                }
            }
        };
        border(&mut style.borders.left);
        border(&mut style.borders.right);
        border(&mut style.borders.top);
        border(&mut style.borders.bottom);
        style
    }
}

// --- Colors ---

/// RGB color with alpha, each channel in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    /// Parse `#RRGGBB` or `#RRGGBBAA`; anything else is `None`
    pub fn parse(s: &str) -> Option<Color> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 && hex.len() != 8 {
            return None;
        }
        let channel = |i: usize| -> Option<f32> {
            let v = u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()?;
            Some(v as f32 / 255.0)
        };
        Some(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if hex.len() == 8 { channel(6)? } else { 1.0 },
        })
    }

    /// Parse a color that should actually paint something
    ///
    /// Invalid strings and fully transparent colors both come back `None`,
    /// so callers treat them as absent.
    pub fn parse_visible(s: &str) -> Option<Color> {
        Color::parse(s).filter(|c| c.a > 0.0)
    }
}

impl Template {
    /// Parse a template from its JSON form
    pub fn from_json(json: &str) -> crate::error::Result<Template> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::Error::InvalidInput(format!("template JSON: {e}")))
    }

    /// The document body in drawing order
    pub fn body(&self) -> Vec<Element> {
        if !self.elements.is_empty() {
            return self.elements.clone();
        }
        let mut body: Vec<Element> = Vec::new();
        body.extend(self.tables.iter().cloned().map(Element::Table));
        body.extend(self.images.iter().cloned().map(Element::Image));
        body.extend(self.spacers.iter().cloned().map(Element::Spacer));
        body
    }
}
