//! Interactive form widgets and the document AcroForm
//!
//! Each widget is an annotation object plus one or two appearance-stream
//! Form XObjects, all stored as extra objects and listed in the owning
//! page's annotation array. Appearance streams declare their own resources;
//! in standard mode the text-field font is an inline Helvetica dictionary,
//! in PDF/A mode it references the substituted Liberation font object.

use crate::pdf::buffer::PdfBuffer;
use crate::pdf::content;
use crate::pdf::fonts::{FontKey, FontRegistry, TextShow};
use crate::pdf::page::PageManager;
use crate::template::{CellStyle, Color, FieldKind, FormFieldSpec, RadioShape};

/// Radio flags: radio button + no-toggle-to-off
const RADIO_FLAGS: i64 = 49152;

/// Circle approximation constant for 4-segment cubic Béziers
const BEZIER_K: f32 = 0.5523;

/// Collects field object IDs for the document-level AcroForm
#[derive(Debug, Default)]
pub struct AcroForm {
    pub field_ids: Vec<u32>,
    pub has_signature: bool,
}

impl AcroForm {
    /// Emit the AcroForm dictionary; `None` when no widget exists
    pub fn emit(&self, pm: &mut PageManager) -> Option<u32> {
        if self.field_ids.is_empty() {
            return None;
        }
        let mut buf = PdfBuffer::new();
        buf.push_str("<< /Fields [");
        for (i, id) in self.field_ids.iter().enumerate() {
            if i > 0 {
                buf.push_str(" ");
            }
            buf.push_ref(*id);
        }
        buf.push_str("] /DA (/Helv 0 Tf 0 g)");
        if self.has_signature {
            buf.push_str(" /SigFlags 3");
        }
        buf.push_str(" >>");
        Some(pm.add_extra_object(buf.into_bytes()))
    }
}

/// Wrap content operators into a Form XObject body
fn form_xobject(w: f32, h: f32, resources: Option<&str>, ops: &[u8]) -> Vec<u8> {
    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Type /XObject /Subtype /Form /BBox [0 0 ");
    buf.push_f2(w);
    buf.push_str(" ");
    buf.push_f2(h);
    buf.push_str("]");
    if let Some(resources) = resources {
        buf.push_str(" /Resources ");
        buf.push_str(resources);
    }
    buf.push_str(" /Length ");
    buf.push_int(ops.len() as i64);
    buf.push_str(" >>\nstream\n");
    let mut out = buf.into_bytes();
    out.extend_from_slice(ops);
    out.extend_from_slice(b"\nendstream");
    out
}

/// Append a full circle path around (cx, cy)
fn circle_path(buf: &mut PdfBuffer, cx: f32, cy: f32, r: f32) {
    let k = BEZIER_K * r;
    let seg = |buf: &mut PdfBuffer, coords: [f32; 6]| {
        for (i, v) in coords.iter().enumerate() {
            if i > 0 {
                buf.push_str(" ");
            }
            buf.push_f2(*v);
        }
        buf.push_str(" c\n");
    };
    buf.push_f2(cx + r);
    buf.push_str(" ");
    buf.push_f2(cy);
    buf.push_str(" m\n");
    seg(buf, [cx + r, cy + k, cx + k, cy + r, cx, cy + r]);
    seg(buf, [cx - k, cy + r, cx - r, cy + k, cx - r, cy]);
    seg(buf, [cx - r, cy - k, cx - k, cy - r, cx, cy - r]);
    seg(buf, [cx + k, cy - r, cx + r, cy - k, cx + r, cy]);
}

fn checkbox_box_ops(w: f32, h: f32, with_cross: bool) -> Vec<u8> {
    let mut buf = PdfBuffer::new();
    content::stroke_rect(&mut buf, 0.5, 0.5, w - 1.0, h - 1.0, 1.0);
    if with_cross {
        content::line(&mut buf, 1.5, 1.5, w - 1.5, h - 1.5, 1.0, Color::BLACK);
        content::line(&mut buf, 1.5, h - 1.5, w - 1.5, 1.5, 1.0, Color::BLACK);
    }
    buf.into_bytes()
}

fn radio_round_ops(w: f32, h: f32, on: bool) -> Vec<u8> {
    let (cx, cy) = (w / 2.0, h / 2.0);
    let r = (w.min(h) / 2.0) - 1.0;
    let mut buf = PdfBuffer::new();
    buf.push_str("q\n0.00 0.00 0.00 RG\n1.00 1.00 1.00 rg\n1.00 w\n");
    circle_path(&mut buf, cx, cy, r);
    if on {
        buf.push_str("B\n");
        buf.push_str("0.00 0.00 0.00 rg\n");
        circle_path(&mut buf, cx, cy, r * 0.4);
        buf.push_str("f\n");
    } else {
        buf.push_str("S\n");
    }
    buf.push_str("Q\n");
    buf.into_bytes()
}

fn radio_square_ops(w: f32, h: f32, on: bool) -> Vec<u8> {
    let mut buf = PdfBuffer::new();
    content::stroke_rect(&mut buf, 0.5, 0.5, w - 1.0, h - 1.0, 1.0);
    if on {
        content::fill_rect(&mut buf, 2.5, 2.5, w - 5.0, h - 5.0, Color::BLACK);
    }
    buf.into_bytes()
}

/// Inline resources for a text-field appearance stream
///
/// Standard mode embeds a Helvetica dictionary directly; PDF/A mode must
/// reference the substituted embedded font object instead.
fn appearance_font_resources(registry: &FontRegistry, key: &FontKey) -> String {
    match key {
        FontKey::Custom(_) => {
            let id = registry
                .resources()
                .into_iter()
                .find(|(name, _)| *name == registry.resource_name(key))
                .map(|(_, id)| id)
                .unwrap_or(0);
            format!("<< /Font << /Helv {id} 0 R >> >>")
        }
        FontKey::Standard(_) => {
            "<< /Font << /Helv << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >>"
                .to_string()
        }
    }
}

fn text_field_appearance(
    registry: &FontRegistry,
    key: &FontKey,
    value: &str,
    w: f32,
    h: f32,
    size: f32,
    align: crate::layout::Alignment,
) -> Vec<u8> {
    let mut buf = PdfBuffer::new();
    buf.push_str("/Tx BMC\nq\n");
    // White field background and a hairline border
    content::fill_rect(&mut buf, 0.0, 0.0, w, h, Color { r: 1.0, g: 1.0, b: 1.0, a: 1.0 });
    content::stroke_rect(&mut buf, 0.5, 0.5, w - 1.0, h - 1.0, 0.5);
    let text_width = registry.text_width(key, value, size);
    let x = align.text_x(2.0, w - 4.0, text_width);
    let baseline = (h - size) / 2.0 + size * 0.25;
    buf.push_str("BT\n0 g\n/Helv ");
    buf.push_f2(size);
    buf.push_str(" Tf\n");
    buf.push_f2(x);
    buf.push_str(" ");
    buf.push_f2(baseline);
    buf.push_str(" Td\n");
    match registry.encode_text(key, value) {
        TextShow::Literal(text) => buf.push_literal_string(&text),
        TextShow::Hex(codes) => buf.push_hex_string(&codes),
    }
    buf.push_str(" Tj\nET\nQ\nEMC\n");
    buf.into_bytes()
}

fn widget_dict_common(buf: &mut PdfBuffer, name: &str, rect: (f32, f32, f32, f32), page_id: u32) {
    let (x, y, w, h) = rect;
    buf.push_str("<< /Type /Annot /Subtype /Widget /T ");
    buf.push_literal_string(name);
    buf.push_str(" /Rect [");
    buf.push_f2(x);
    buf.push_str(" ");
    buf.push_f2(y);
    buf.push_str(" ");
    buf.push_f2(x + w);
    buf.push_str(" ");
    buf.push_f2(y + h);
    buf.push_str("] /F 4 /P ");
    buf.push_ref(page_id);
}

/// Emit a widget for a cell's form field and register it on the page
pub fn emit_widget(
    pm: &mut PageManager,
    registry: &mut FontRegistry,
    acro: &mut AcroForm,
    spec: &FormFieldSpec,
    style: &CellStyle,
    rect: (f32, f32, f32, f32),
) -> u32 {
    let page_id = pm.page_id(pm.current_page_index());
    let (_, _, w, h) = rect;

    let widget_id = match spec.kind {
        FieldKind::Checkbox => {
            let on_id = pm.add_extra_object(form_xobject(w, h, None, &checkbox_box_ops(w, h, true)));
            let off_id =
                pm.add_extra_object(form_xobject(w, h, None, &checkbox_box_ops(w, h, false)));
            let mut buf = PdfBuffer::new();
            widget_dict_common(&mut buf, &spec.name, rect, page_id);
            buf.push_str(" /FT /Btn");
            match spec.checked {
                Some(true) => buf.push_str(" /V /Yes /AS /Yes"),
                Some(false) => buf.push_str(" /V /Off /AS /Off"),
                // Null state: no /V, off appearance selected
                None => buf.push_str(" /AS /Off"),
            }
            buf.push_str(" /AP << /N << /Yes ");
            buf.push_ref(on_id);
            buf.push_str(" /Off ");
            buf.push_ref(off_id);
            buf.push_str(" >> >> >>");
            pm.add_extra_object(buf.into_bytes())
        }
        FieldKind::Radio => {
            let on_state = spec.value.clone().unwrap_or_else(|| "Yes".to_string());
            let (on_ops, off_ops) = match spec.shape {
                RadioShape::Round => (radio_round_ops(w, h, true), radio_round_ops(w, h, false)),
                RadioShape::Square => {
                    (radio_square_ops(w, h, true), radio_square_ops(w, h, false))
                }
            };
            let on_id = pm.add_extra_object(form_xobject(w, h, None, &on_ops));
            let off_id = pm.add_extra_object(form_xobject(w, h, None, &off_ops));
            let mut buf = PdfBuffer::new();
            widget_dict_common(&mut buf, &spec.name, rect, page_id);
            buf.push_str(" /FT /Btn /Ff ");
            buf.push_int(RADIO_FLAGS);
            buf.push_str(" /MK << /BC [0 0 0] /BG [1 1 1] >>");
            if spec.checked == Some(true) {
                buf.push_str(" /V ");
                buf.push_name(&on_state);
                buf.push_str(" /AS ");
                buf.push_name(&on_state);
            } else {
                buf.push_str(" /AS /Off");
            }
            buf.push_str(" /AP << /N << ");
            buf.push_name(&on_state);
            buf.push_str(" ");
            buf.push_ref(on_id);
            buf.push_str(" /Off ");
            buf.push_ref(off_id);
            buf.push_str(" >> >> >>");
            pm.add_extra_object(buf.into_bytes())
        }
        FieldKind::Text => {
            let value = spec.value.clone().unwrap_or_default();
            let key = registry.resolve("Helvetica", style.bold, style.italic);
            // Value glyphs count toward the subset
            registry.mark_used(&key, &value);
            let resources = appearance_font_resources(registry, &key);
            let ap = text_field_appearance(
                registry,
                &key,
                &value,
                w,
                h,
                style.size,
                style.align,
            );
            let ap_id = pm.add_extra_object(form_xobject(w, h, Some(&resources), &ap));
            let mut buf = PdfBuffer::new();
            widget_dict_common(&mut buf, &spec.name, rect, page_id);
            buf.push_str(" /FT /Tx /V ");
            buf.push_literal_string(&value);
            buf.push_str(" /DA (/Helv ");
            buf.push_f2(style.size);
            buf.push_str(" Tf 0 g) /AP << /N ");
            buf.push_ref(ap_id);
            buf.push_str(" >> >>");
            pm.add_extra_object(buf.into_bytes())
        }
    };

    pm.add_annot(widget_id);
    acro.field_ids.push(widget_id);
    widget_id
}

/// Emit an invisible signature field; signing is an external concern
pub fn emit_signature_field(pm: &mut PageManager, acro: &mut AcroForm, name: &str, page: usize) {
    let page_index = page.min(pm.page_count().saturating_sub(1));
    let page_id = pm.page_id(page_index);
    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Type /Annot /Subtype /Widget /FT /Sig /T ");
    buf.push_literal_string(name);
    buf.push_str(" /Rect [0.00 0.00 0.00 0.00] /F 132 /P ");
    buf.push_ref(page_id);
    buf.push_str(" >>");
    let id = pm.add_extra_object(buf.into_bytes());
    let current = pm.current_page_index();
    pm.switch_to_page(page_index);
    pm.add_annot(id);
    pm.switch_to_page(current);
    acro.field_ids.push(id);
    acro.has_signature = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PageDimensions;
    use crate::template::{Orientation, PageSize};

    fn setup() -> (PageManager, FontRegistry, AcroForm) {
        (
            PageManager::new(PageDimensions::new(PageSize::A4, Orientation::Portrait)),
            FontRegistry::new(false),
            AcroForm::default(),
        )
    }

    fn extra_text(pm: &PageManager, id: u32) -> String {
        let body = pm
            .extra_objects()
            .find(|(oid, _)| *oid == id)
            .map(|(_, b)| b.to_vec())
            .unwrap();
        String::from_utf8_lossy(&body).to_string()
    }

    #[test]
    fn null_checkbox_has_no_value_and_off_appearance() {
        let (mut pm, mut reg, mut acro) = setup();
        let spec = FormFieldSpec {
            kind: FieldKind::Checkbox,
            name: "agree".to_string(),
            ..Default::default()
        };
        let id = emit_widget(
            &mut pm,
            &mut reg,
            &mut acro,
            &spec,
            &CellStyle::default(),
            (100.0, 500.0, 12.0, 12.0),
        );
        let dict = extra_text(&pm, id);
        assert!(!dict.contains("/V "));
        assert!(dict.contains("/AS /Off"));
        assert!(dict.contains("/FT /Btn"));
        assert_eq!(pm.annots_for(0), &[id]);
    }

    #[test]
    fn round_radio_uses_four_beziers_and_flags() {
        let (mut pm, mut reg, mut acro) = setup();
        let spec = FormFieldSpec {
            kind: FieldKind::Radio,
            name: "choice".to_string(),
            value: Some("OptA".to_string()),
            checked: Some(true),
            ..Default::default()
        };
        let id = emit_widget(
            &mut pm,
            &mut reg,
            &mut acro,
            &spec,
            &CellStyle::default(),
            (100.0, 500.0, 14.0, 14.0),
        );
        let dict = extra_text(&pm, id);
        assert!(dict.contains("/Ff 49152"));
        assert!(dict.contains("/V /OptA /AS /OptA"));
        assert!(dict.contains("/MK"));
        // On appearance: outer circle (4 segments) + dot (4 segments)
        let on_ap = extra_text(&pm, 2000);
        assert_eq!(on_ap.matches(" c\n").count(), 8);
        assert!(on_ap.contains("/BBox [0 0 14.00 14.00]"));
        let off_ap = extra_text(&pm, 2001);
        assert_eq!(off_ap.matches(" c\n").count(), 4);
    }

    #[test]
    fn text_field_appearance_is_marked_content() {
        let (mut pm, mut reg, mut acro) = setup();
        let spec = FormFieldSpec {
            kind: FieldKind::Text,
            name: "surname".to_string(),
            value: Some("Smith".to_string()),
            ..Default::default()
        };
        let id = emit_widget(
            &mut pm,
            &mut reg,
            &mut acro,
            &spec,
            &CellStyle::default(),
            (100.0, 500.0, 120.0, 18.0),
        );
        let dict = extra_text(&pm, id);
        assert!(dict.contains("/FT /Tx"));
        assert!(dict.contains("/V (Smith)"));
        assert!(dict.contains("/DA (/Helv 12.00 Tf 0 g)"));
        let ap = extra_text(&pm, 2000);
        assert!(ap.contains("/Tx BMC"));
        assert!(ap.contains("EMC"));
        assert!(ap.contains("(Smith) Tj"));
        assert!(ap.contains("/BaseFont /Helvetica"));
    }

    #[test]
    fn acroform_collects_fields_and_signature_flags() {
        let (mut pm, mut reg, mut acro) = setup();
        assert!(acro.emit(&mut pm).is_none());
        let spec = FormFieldSpec {
            kind: FieldKind::Checkbox,
            name: "x".to_string(),
            ..Default::default()
        };
        emit_widget(
            &mut pm,
            &mut reg,
            &mut acro,
            &spec,
            &CellStyle::default(),
            (0.0, 0.0, 10.0, 10.0),
        );
        emit_signature_field(&mut pm, &mut acro, "sig", 0);
        let form_id = acro.emit(&mut pm).unwrap();
        let dict = extra_text(&pm, form_id);
        assert!(dict.contains("/Fields ["));
        assert!(dict.contains("/SigFlags 3"));
    }
}
