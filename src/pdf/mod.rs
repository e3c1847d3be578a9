//! Template-driven PDF generation
//!
//! The pipeline walks the template once per concern, in a fixed order so
//! object IDs come out deterministic: font usage scan (with PDF/A
//! substitution), image decoding, font object-ID assignment, pagination,
//! interactive objects (signature, AcroForm, outlines, destinations),
//! metadata, and finally byte assembly. A failed step fails the whole
//! generation; no partial document is ever returned.

pub mod buffer;
pub mod content;
pub mod fonts;
pub mod images;
pub mod liberation;
pub mod metadata;
pub mod outline;
pub mod page;
pub mod paginate;
pub mod truetype;
pub mod widgets;
pub mod writer;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::Result;
use crate::layout::PageDimensions;
use crate::template::{CellStyle, Element, Table, Template};

pub use images::SvgConverter;
pub use writer::DocumentRefs;

/// Post-assembly encryption is an external concern; the engine only
/// provides the seam.
pub trait EncryptionHook {
    fn encrypt(&self, bytes: Vec<u8>) -> Result<Vec<u8>>;
}

/// Collaborator hooks for a generation
#[derive(Default)]
pub struct GenerateOptions<'a> {
    pub svg: Option<&'a dyn SvgConverter>,
    pub encryption: Option<&'a dyn EncryptionHook>,
}

/// Generate a PDF from a template with default options
pub fn generate_pdf(template: &Template) -> Result<Vec<u8>> {
    generate_pdf_with(template, &GenerateOptions::default())
}

/// Generate a PDF from a template
pub fn generate_pdf_with(template: &Template, options: &GenerateOptions) -> Result<Vec<u8>> {
    let config = &template.config;
    let dims = PageDimensions::new(config.page, config.orientation);
    let mut pm = page::PageManager::new(dims);
    let mut registry = fonts::FontRegistry::new(config.arlington);

    // Template-supplied fonts; a broken font logs and falls back to the
    // standard resolution rather than failing the document
    for spec in &config.fonts {
        match BASE64
            .decode(spec.data.trim())
            .map_err(|e| crate::error::Error::InvalidInput(format!("font {}: {e}", spec.name)))
            .and_then(|bytes| truetype::CustomFont::parse(&spec.name, bytes))
        {
            Ok(font) => registry.register_custom(font),
            Err(e) => log::warn!("skipping custom font {}: {e}", spec.name),
        }
    }

    scan_font_usage(template, &mut registry);

    if config.pdfa {
        // Swap each used standard font for its Liberation face, registered
        // under the standard name so resolution is transparent, then rescan
        // so the usage marks land on the substitutes.
        let fonts_dir = config.fonts_directory.as_deref();
        for name in registry.used_standard_names() {
            let substitute =
                liberation::substitute_font(name, fonts_dir, config.allow_font_download)?;
            registry.register_custom(substitute);
        }
        registry.reset_usage();
        scan_font_usage(template, &mut registry);
    }

    let mut image_store = images::ImageStore::new();
    register_images(template, &mut image_store, &mut pm, options.svg);

    registry.assign_object_ids(&mut pm);

    let mut acro = widgets::AcroForm::default();
    {
        let mut paginator = paginate::Paginator {
            pm: &mut pm,
            registry: &mut registry,
            images: &image_store,
            acro: &mut acro,
            config,
        };
        paginator.run(template);
    }

    if let Some(signature) = &config.signature {
        let page = signature.page.unwrap_or(1).saturating_sub(1);
        widgets::emit_signature_field(&mut pm, &mut acro, &signature.name, page);
    }

    let mut refs = DocumentRefs {
        outlines: outline::build_outlines(&mut pm, &config.bookmarks),
        acroform: acro.emit(&mut pm),
        ..Default::default()
    };
    refs.dests = outline::emit_named_dests(&mut pm);

    let now = chrono::Utc::now();
    refs.metadata = Some(metadata::emit_xmp(&mut pm, config, now));
    if config.pdfa {
        let (_icc, intent) = metadata::emit_output_intent(&mut pm);
        refs.output_intent = Some(intent);
    } else {
        // PDF/A-4 forbids the Info dictionary entirely
        refs.info = Some(metadata::emit_info(&mut pm, config, now));
    }

    let bytes = writer::assemble(&pm, &registry, &image_store, &refs, config.pdfa)?;
    match options.encryption {
        Some(hook) => hook.encrypt(bytes),
        None => Ok(bytes),
    }
}

/// Mark every font the paginator will touch, before IDs are assigned
///
/// Helvetica is always used: page numbers are stamped on every page, and
/// watermarks and image placeholders draw with it too.
fn scan_font_usage(template: &Template, registry: &mut fonts::FontRegistry) {
    fn mark_props(registry: &mut fonts::FontRegistry, props: &str, text: &str) {
        let style = CellStyle::parse(props);
        let key = registry.resolve(&style.font, style.bold, style.italic);
        registry.mark_used(&key, text);
    }

    fn mark_table(registry: &mut fonts::FontRegistry, table: &Table) {
        for row in &table.rows {
            for cell in &row.cells {
                if let Some(text) = &cell.text {
                    mark_props(registry, &cell.props, text);
                }
                if let Some(field) = &cell.field {
                    let style = CellStyle::parse(&cell.props);
                    let key = registry.resolve("Helvetica", style.bold, style.italic);
                    registry.mark_used(&key, field.value.as_deref().unwrap_or(""));
                }
            }
        }
    }

    let helvetica = registry.resolve("Helvetica", false, false);
    registry.mark_used(&helvetica, "Page 0123456789 of image");

    if let Some(title) = &template.title {
        if let Some(text) = &title.text {
            mark_props(registry, &title.props, text);
        }
        if let Some(table) = &title.table {
            mark_table(registry, table);
        }
    }
    for element in template.body() {
        if let Element::Table(table) = element {
            mark_table(registry, &table);
        }
    }
    if let Some(footer) = &template.footer {
        if let Some(text) = &footer.text {
            mark_props(registry, &footer.props, text);
        }
    }
}

/// Decode and register every image payload the template references
fn register_images(
    template: &Template,
    store: &mut images::ImageStore,
    pm: &mut page::PageManager,
    svg: Option<&dyn SvgConverter>,
) {
    let register_table = |store: &mut images::ImageStore, pm: &mut page::PageManager, table: &Table| {
        for row in &table.rows {
            for cell in &row.cells {
                if let Some(image) = &cell.image {
                    store.register(&image.data, pm, svg);
                }
            }
        }
    };

    if let Some(table) = template.title.as_ref().and_then(|t| t.table.as_ref()) {
        register_table(store, pm, table);
    }
    for element in template.body() {
        match element {
            Element::Table(table) => register_table(store, pm, &table),
            Element::Image(image) => {
                store.register(&image.data, pm, svg);
            }
            Element::Spacer(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Cell, Config, Row, Title};

    #[test]
    fn minimal_template_generates() {
        let template = Template {
            title: Some(Title {
                text: Some("Hello".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let bytes = generate_pdf(&template).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.7\n"));
        assert!(bytes.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn usage_scan_covers_cells_and_footer() {
        let template = Template {
            tables: vec![Table {
                max_columns: 1,
                rows: vec![Row {
                    cells: vec![Cell {
                        text: Some("x".to_string()),
                        props: "Courier:10:100".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut registry = fonts::FontRegistry::new(false);
        scan_font_usage(&template, &mut registry);
        let names = registry.used_standard_names();
        assert!(names.contains(&"Helvetica"));
        assert!(names.contains(&"Courier-Bold"));
    }

    #[test]
    fn encryption_hook_wraps_output() {
        struct Reverse;
        impl EncryptionHook for Reverse {
            fn encrypt(&self, mut bytes: Vec<u8>) -> Result<Vec<u8>> {
                bytes.reverse();
                Ok(bytes)
            }
        }
        let template = Template::default();
        let options = GenerateOptions {
            encryption: Some(&Reverse),
            ..Default::default()
        };
        let bytes = generate_pdf_with(&template, &options).unwrap();
        assert!(bytes.starts_with(b"\nFOE%%"));
    }

    #[test]
    fn config_defaults_are_non_pdfa() {
        let config = Config::default();
        assert!(!config.pdfa);
        assert!(!config.arlington);
    }
}
