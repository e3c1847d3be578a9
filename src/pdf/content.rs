//! Content-stream operator emission
//!
//! Operators are ASCII text appended to the current page buffer. The page
//! coordinate origin is bottom-left with Y growing upward. Every decorative
//! block that touches color, line width, or clipping is wrapped in `q ... Q`;
//! text objects sit wholly inside their wrap and never straddle one. Fill
//! color is always emitted explicitly before text, even for black, so no
//! drawing relies on leftover graphics state.

use crate::pdf::buffer::PdfBuffer;
use crate::pdf::fonts::TextShow;
use crate::template::Color;

/// Side length of the static checkbox drawing
pub const CHECKBOX_SIZE: f32 = 10.0;

/// One positioned text run
pub struct TextOp<'a> {
    pub font_res: &'a str,
    pub size: f32,
    pub x: f32,
    pub y: f32,
    pub show: &'a TextShow,
    pub color: Color,
    /// Estimated run width; present when an underline should be drawn
    pub underline_width: Option<f32>,
}

fn push_show(buf: &mut PdfBuffer, show: &TextShow) {
    match show {
        TextShow::Literal(text) => buf.push_literal_string(text),
        TextShow::Hex(codes) => buf.push_hex_string(codes),
    }
    buf.push_str(" Tj\n");
}

fn push_font_and_position(buf: &mut PdfBuffer, op: &TextOp) {
    buf.push_name(op.font_res);
    buf.push_str(" ");
    buf.push_f2(op.size);
    buf.push_str(" Tf\n1 0 0 1 0 0 Tm\n");
    buf.push_f2(op.x);
    buf.push_str(" ");
    buf.push_f2(op.y);
    buf.push_str(" Td\n");
}

/// Emit a complete text object, with the optional underline drawn between
/// an `ET`/`BT` pair so the line operators stay outside text mode.
pub fn show_text(buf: &mut PdfBuffer, op: &TextOp) {
    buf.push_str("q\nBT\n");
    buf.push_f2(op.color.r);
    buf.push_str(" ");
    buf.push_f2(op.color.g);
    buf.push_str(" ");
    buf.push_f2(op.color.b);
    buf.push_str(" rg\n");
    push_font_and_position(buf, op);
    if let Some(width) = op.underline_width {
        buf.push_str("ET\n");
        line(buf, op.x, op.y - 2.0, op.x + width, op.y - 2.0, 0.5, op.color);
        buf.push_str("BT\n");
        push_font_and_position(buf, op);
    }
    push_show(buf, op.show);
    buf.push_str("ET\nQ\n");
}

/// Filled rectangle
pub fn fill_rect(buf: &mut PdfBuffer, x: f32, y: f32, w: f32, h: f32, color: Color) {
    buf.push_str("q\n");
    buf.push_f2(color.r);
    buf.push_str(" ");
    buf.push_f2(color.g);
    buf.push_str(" ");
    buf.push_f2(color.b);
    buf.push_str(" rg\n");
    buf.push_f2(x);
    buf.push_str(" ");
    buf.push_f2(y);
    buf.push_str(" ");
    buf.push_f2(w);
    buf.push_str(" ");
    buf.push_f2(h);
    buf.push_str(" re\nf\nQ\n");
}

/// Stroked rectangle
pub fn stroke_rect(buf: &mut PdfBuffer, x: f32, y: f32, w: f32, h: f32, line_width: f32) {
    buf.push_str("q\n0.00 0.00 0.00 RG\n");
    buf.push_f2(line_width);
    buf.push_str(" w\n");
    buf.push_f2(x);
    buf.push_str(" ");
    buf.push_f2(y);
    buf.push_str(" ");
    buf.push_f2(w);
    buf.push_str(" ");
    buf.push_f2(h);
    buf.push_str(" re\nS\nQ\n");
}

/// Straight line segment
pub fn line(buf: &mut PdfBuffer, x1: f32, y1: f32, x2: f32, y2: f32, width: f32, color: Color) {
    buf.push_str("q\n");
    buf.push_f2(color.r);
    buf.push_str(" ");
    buf.push_f2(color.g);
    buf.push_str(" ");
    buf.push_f2(color.b);
    buf.push_str(" RG\n");
    buf.push_f2(width);
    buf.push_str(" w\n");
    buf.push_f2(x1);
    buf.push_str(" ");
    buf.push_f2(y1);
    buf.push_str(" m\n");
    buf.push_f2(x2);
    buf.push_str(" ");
    buf.push_f2(y2);
    buf.push_str(" l\nS\nQ\n");
}

/// Static checkbox: a square, crossed with two diagonals when checked
pub fn checkbox(buf: &mut PdfBuffer, x: f32, y: f32, checked: bool) {
    stroke_rect(buf, x, y, CHECKBOX_SIZE, CHECKBOX_SIZE, 1.0);
    if checked {
        line(buf, x, y, x + CHECKBOX_SIZE, y + CHECKBOX_SIZE, 1.0, Color::BLACK);
        line(buf, x, y + CHECKBOX_SIZE, x + CHECKBOX_SIZE, y, 1.0, Color::BLACK);
    }
}

/// Draw a registered image XObject scaled into a rectangle
///
/// The optional clip keeps an oversized image inside its cell.
pub fn draw_image(
    buf: &mut PdfBuffer,
    resource_name: &str,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    clip: Option<(f32, f32, f32, f32)>,
) {
    buf.push_str("q\n");
    if let Some((cx, cy, cw, ch)) = clip {
        buf.push_f2(cx);
        buf.push_str(" ");
        buf.push_f2(cy);
        buf.push_str(" ");
        buf.push_f2(cw);
        buf.push_str(" ");
        buf.push_f2(ch);
        buf.push_str(" re\nW\nn\n");
    }
    buf.push_f2(w);
    buf.push_str(" 0 0 ");
    buf.push_f2(h);
    buf.push_str(" ");
    buf.push_f2(x);
    buf.push_str(" ");
    buf.push_f2(y);
    buf.push_str(" cm\n");
    buf.push_name(resource_name);
    buf.push_str(" Do\nQ\n");
}

/// Diagonal light-gray watermark across the page
pub fn watermark(buf: &mut PdfBuffer, font_res: &str, text: &str, page_w: f32, page_h: f32) {
    let size = (page_w / 8.0).max(40.0);
    buf.push_str("q\nBT\n0.85 0.85 0.85 rg\n");
    buf.push_name(font_res);
    buf.push_str(" ");
    buf.push_f2(size);
    buf.push_str(" Tf\n0.7071 0.7071 -0.7071 0.7071 ");
    buf.push_f2(page_w * 0.2);
    buf.push_str(" ");
    buf.push_f2(page_h * 0.3);
    buf.push_str(" Tm\n");
    buf.push_literal_string(text);
    buf.push_str(" Tj\nET\nQ\n");
}

/// Border rectangle inset half a margin from the page edge
pub fn page_border(buf: &mut PdfBuffer, page_w: f32, page_h: f32) {
    let inset = crate::layout::MARGIN / 2.0;
    stroke_rect(buf, inset, inset, page_w - 2.0 * inset, page_h - 2.0 * inset, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(f: impl FnOnce(&mut PdfBuffer)) -> String {
        let mut buf = PdfBuffer::new();
        f(&mut buf);
        String::from_utf8(buf.into_bytes()).unwrap()
    }

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn text_block_is_balanced_and_positioned() {
        let show = TextShow::Literal("Hello".to_string());
        let out = emitted(|buf| {
            show_text(
                buf,
                &TextOp {
                    font_res: "F1",
                    size: 12.0,
                    x: 72.0,
                    y: 700.0,
                    show: &show,
                    color: Color::BLACK,
                    underline_width: None,
                },
            )
        });
        assert!(out.contains("/F1 12.00 Tf"));
        assert!(out.contains("1 0 0 1 0 0 Tm"));
        assert!(out.contains("72.00 700.00 Td"));
        assert!(out.contains("(Hello) Tj"));
        assert!(out.contains("0.00 0.00 0.00 rg"));
        assert_eq!(count(&out, "BT"), count(&out, "ET"));
        assert_eq!(count(&out, "q\n"), count(&out, "Q\n"));
    }

    #[test]
    fn underline_splits_the_text_object() {
        let show = TextShow::Literal("link".to_string());
        let out = emitted(|buf| {
            show_text(
                buf,
                &TextOp {
                    font_res: "F1",
                    size: 10.0,
                    x: 100.0,
                    y: 500.0,
                    show: &show,
                    color: Color::BLACK,
                    underline_width: Some(20.0),
                },
            )
        });
        assert_eq!(count(&out, "BT"), 2);
        assert_eq!(count(&out, "ET"), 2);
        assert!(out.contains("100.00 498.00 m"));
        assert!(out.contains("120.00 498.00 l"));
    }

    #[test]
    fn hex_show_for_custom_fonts() {
        let show = TextShow::Hex(vec![0x0024, 0x0025]);
        let out = emitted(|buf| {
            show_text(
                buf,
                &TextOp {
                    font_res: "CF1",
                    size: 12.0,
                    x: 0.0,
                    y: 0.0,
                    show: &show,
                    color: Color::BLACK,
                    underline_width: None,
                },
            )
        });
        assert!(out.contains("<00240025> Tj"));
    }

    #[test]
    fn image_draw_with_clip() {
        let out = emitted(|buf| {
            draw_image(buf, "Im1000", 10.0, 20.0, 50.0, 40.0, Some((10.0, 20.0, 50.0, 40.0)))
        });
        assert!(out.contains("10.00 20.00 50.00 40.00 re\nW\nn"));
        assert!(out.contains("50.00 0 0 40.00 10.00 20.00 cm"));
        assert!(out.contains("/Im1000 Do"));
    }

    #[test]
    fn checkbox_checked_draws_two_diagonals() {
        let out = emitted(|buf| checkbox(buf, 5.0, 5.0, true));
        assert_eq!(count(&out, " l\nS"), 2);
        let unchecked = emitted(|buf| checkbox(buf, 5.0, 5.0, false));
        assert_eq!(count(&unchecked, " l\nS"), 0);
    }

    #[test]
    fn watermark_rotation_and_size() {
        let out = emitted(|buf| watermark(buf, "F1", "DRAFT", 595.28, 841.89));
        assert!(out.contains("0.7071 0.7071 -0.7071 0.7071"));
        assert!(out.contains("0.85 0.85 0.85 rg"));
        // 595.28 / 8 < 80 but > 40
        assert!(out.contains("74.41 Tf"));
        assert!(out.contains("(DRAFT) Tj"));
    }
}
