//! Single-pass streaming layout
//!
//! The paginator walks the template once, top to bottom, emitting content
//! operators into the current page buffer and decrementing the Y cursor.
//! Page breaks happen between table rows; titles never break (an oversized
//! title table overflows visibly rather than silently re-flowing). Footers
//! and page numbers are stamped in a final pass once the page count is
//! known.

use crate::layout::{normalize_column_widths, Alignment, MARGIN};
use crate::pdf::buffer::PdfBuffer;
use crate::pdf::content::{self, TextOp, CHECKBOX_SIZE};
use crate::pdf::fonts::FontRegistry;
use crate::pdf::images::ImageStore;
use crate::pdf::page::PageManager;
use crate::pdf::widgets::{emit_widget, AcroForm};
use crate::template::{
    Cell, CellStyle, Color, Config, Element, Footer, ImageElement, Row, Spacer, Table, Template,
    Title,
};

/// Inset between a cell edge and its text
const CELL_PADDING: f32 = 5.0;
/// Inset between a cell edge and embedded content (images, widgets)
const CONTENT_INSET: f32 = 2.0;
/// Fallback height for images whose dimensions are unknown
const DEFAULT_IMAGE_HEIGHT: f32 = 200.0;

enum CellPhase {
    /// Backgrounds only (title-table pass 1)
    Background,
    /// Content and borders (title-table pass 2)
    Content,
    /// Everything, per cell (regular tables)
    Full,
}

pub struct Paginator<'a> {
    pub pm: &'a mut PageManager,
    pub registry: &'a mut FontRegistry,
    pub images: &'a ImageStore,
    pub acro: &'a mut AcroForm,
    pub config: &'a Config,
}

impl<'a> Paginator<'a> {
    /// Walk the whole template; everything except footers and page numbers
    pub fn run(&mut self, template: &Template) {
        self.init_page();
        if let Some(title) = &template.title {
            self.draw_title(title);
        }
        for element in template.body() {
            match element {
                Element::Table(table) => self.draw_table(&table),
                Element::Image(image) => self.draw_standalone_image(&image),
                Element::Spacer(spacer) => self.draw_spacer(&spacer),
            }
        }
        self.stamp_footers(template.footer.as_ref());
    }

    /// Border and watermark for the page the cursor currently sits on
    fn init_page(&mut self) {
        let dims = self.pm.dims;
        let (border, watermark) = (self.config.page_border, self.config.watermark.clone());
        if border {
            content::page_border(self.pm.current_content(), dims.width, dims.height);
        }
        if let Some(text) = watermark {
            let key = self.registry.resolve("Helvetica", false, false);
            let res = self.registry.resource_name(&key);
            content::watermark(self.pm.current_content(), &res, &text, dims.width, dims.height);
        }
    }

    fn break_page(&mut self) {
        self.pm.add_page();
        self.init_page();
    }

    // --- Title ---

    fn draw_title(&mut self, title: &Title) {
        if let Some(table) = &title.table {
            self.draw_title_table(table);
            return;
        }
        let Some(text) = &title.text else { return };
        let style = CellStyle::parse(&title.props);
        let key = self.registry.resolve(&style.font, style.bold, style.italic);
        self.registry.mark_used(&key, text);

        let dims = self.pm.dims;
        let usable = dims.usable_width();
        let text_width = self.registry.text_width(&key, text, style.size);
        let x = style.align.text_x(MARGIN, usable, text_width);
        let baseline = self.pm.y - style.size;

        if let Some(color) = title.background.as_deref().and_then(Color::parse_visible) {
            content::fill_rect(
                self.pm.current_content(),
                MARGIN,
                baseline - 2.0,
                usable,
                style.size + 4.0,
                color,
            );
        }

        let show = self.registry.encode_text(&key, text);
        let res = self.registry.resource_name(&key);
        content::show_text(
            self.pm.current_content(),
            &TextOp {
                font_res: &res,
                size: style.size,
                x,
                y: baseline,
                show: &show,
                color: Color::BLACK,
                underline_width: style.underline.then_some(text_width),
            },
        );

        if let Some(uri) = &title.link {
            self.link_annotation((x, baseline - 2.0, text_width, style.size + 4.0), uri);
        }

        self.pm.y -= style.size;
    }

    /// Title tables never page-break: a too-tall one overflows visibly
    fn draw_title_table(&mut self, table: &Table) {
        let widths = self.column_widths(table);
        for row in &table.rows {
            let row_height = self.row_height(table, row);
            // Pass 1 fills every background first so neighbor text that
            // overflows a cell is not painted over afterwards
            self.draw_row(row, &widths, row_height, CellPhase::Background);
            self.draw_row(row, &widths, row_height, CellPhase::Content);
            self.pm.y -= row_height;
        }
    }

    // --- Tables ---

    fn column_widths(&self, table: &Table) -> Vec<f32> {
        let usable = self.pm.dims.usable_width();
        normalize_column_widths(&table.column_widths, table.max_columns)
            .into_iter()
            .map(|w| w * usable)
            .collect()
    }

    fn row_height(&self, table: &Table, row: &Row) -> f32 {
        let base = table.row_height * row.height_multiplier.unwrap_or(1.0);
        row.cells
            .iter()
            .filter_map(|c| c.height)
            .fold(base, f32::max)
    }

    fn draw_table(&mut self, table: &Table) {
        let widths = self.column_widths(table);
        for row in &table.rows {
            let row_height = self.row_height(table, row);
            if self.pm.check_page_break(row_height) {
                self.break_page();
            }
            self.draw_row(row, &widths, row_height, CellPhase::Full);
            self.pm.y -= row_height;
        }
    }

    fn draw_row(&mut self, row: &Row, widths: &[f32], row_height: f32, phase: CellPhase) {
        let mut x = MARGIN;
        // Cells beyond the column count are truncated
        for (cell, col_width) in row.cells.iter().zip(widths.iter()) {
            let cell_width = cell.width.unwrap_or(*col_width);
            match phase {
                CellPhase::Background => self.draw_cell_background(cell, x, cell_width, row_height),
                CellPhase::Content => self.draw_cell_content(cell, x, cell_width, row_height),
                CellPhase::Full => {
                    self.draw_cell_background(cell, x, cell_width, row_height);
                    self.draw_cell_content(cell, x, cell_width, row_height);
                }
            }
            x += cell_width;
        }
    }

    fn draw_cell_background(&mut self, cell: &Cell, x: f32, width: f32, height: f32) {
        if let Some(color) = cell.background.as_deref().and_then(Color::parse_visible) {
            let bottom = self.pm.y - height;
            content::fill_rect(self.pm.current_content(), x, bottom, width, height, color);
        }
    }

    /// Content dispatch order: image, form field, checkbox, text, empty.
    /// Borders go last so they sit on top of images.
    fn draw_cell_content(&mut self, cell: &Cell, x: f32, width: f32, height: f32) {
        let bottom = self.pm.y - height;
        if let Some(image) = &cell.image {
            self.draw_cell_image(&image.data, image.name.as_deref(), x, bottom, width, height);
        } else if let Some(field) = &cell.field {
            let style = CellStyle::parse(&cell.props);
            let rect = self.field_rect(field, x, bottom, width, height);
            emit_widget(self.pm, self.registry, self.acro, field, &style, rect);
        } else if let Some(checked) = cell.checkbox {
            content::checkbox(
                self.pm.current_content(),
                x + (width - CHECKBOX_SIZE) / 2.0,
                bottom + (height - CHECKBOX_SIZE) / 2.0,
                checked,
            );
        } else if let Some(text) = &cell.text {
            self.draw_cell_text(cell, text, x, width, height);
        }
        self.draw_cell_borders(cell, x, bottom, width, height);
    }

    fn field_rect(
        &self,
        field: &crate::template::FormFieldSpec,
        x: f32,
        bottom: f32,
        width: f32,
        height: f32,
    ) -> (f32, f32, f32, f32) {
        use crate::template::FieldKind;
        match field.kind {
            FieldKind::Text => (
                x + CONTENT_INSET,
                bottom + CONTENT_INSET,
                width - 2.0 * CONTENT_INSET,
                height - 2.0 * CONTENT_INSET,
            ),
            // Button widgets are small squares centered in the cell
            FieldKind::Checkbox | FieldKind::Radio => {
                let side = (width.min(height) - 2.0 * CONTENT_INSET).min(14.0);
                (
                    x + (width - side) / 2.0,
                    bottom + (height - side) / 2.0,
                    side,
                    side,
                )
            }
        }
    }

    fn draw_cell_text(&mut self, cell: &Cell, text: &str, x: f32, width: f32, height: f32) {
        let style = CellStyle::parse(&cell.props);
        let key = self.registry.resolve(&style.font, style.bold, style.italic);
        self.registry.mark_used(&key, text);

        let text_width = self.registry.text_width(&key, text, style.size);
        let text_x = style
            .align
            .text_x(x + CELL_PADDING, width - 2.0 * CELL_PADDING, text_width);
        let text_y = self.pm.y - height / 2.0 - style.size / 2.0;
        let color = cell
            .color
            .as_deref()
            .and_then(Color::parse_visible)
            .unwrap_or(Color::BLACK);

        let show = self.registry.encode_text(&key, text);
        let res = self.registry.resource_name(&key);
        content::show_text(
            self.pm.current_content(),
            &TextOp {
                font_res: &res,
                size: style.size,
                x: text_x,
                y: text_y,
                show: &show,
                color,
                underline_width: style.underline.then_some(text_width),
            },
        );

        if let Some(uri) = &cell.link {
            self.link_annotation((text_x, text_y - 2.0, text_width, style.size + 4.0), uri);
        }
    }

    fn draw_cell_borders(&mut self, cell: &Cell, x: f32, bottom: f32, width: f32, height: f32) {
        let borders = CellStyle::parse(&cell.props).borders;
        if !borders.any() {
            return;
        }
        let top = bottom + height;
        let buf = self.pm.current_content();
        if borders.left > 0.0 {
            content::line(buf, x, bottom, x, top, borders.left, Color::BLACK);
        }
        if borders.right > 0.0 {
            content::line(buf, x + width, bottom, x + width, top, borders.right, Color::BLACK);
        }
        if borders.top > 0.0 {
            content::line(buf, x, top, x + width, top, borders.top, Color::BLACK);
        }
        if borders.bottom > 0.0 {
            content::line(buf, x, bottom, x + width, bottom, borders.bottom, Color::BLACK);
        }
    }

    fn draw_cell_image(
        &mut self,
        data: &str,
        name: Option<&str>,
        x: f32,
        bottom: f32,
        width: f32,
        height: f32,
    ) {
        let inner_w = width - 2.0 * CONTENT_INSET;
        let inner_h = height - 2.0 * CONTENT_INSET;
        match self.images.find(data) {
            Some(xobject) => {
                // Scale to fit, clip so nothing spills past the cell
                let (iw, ih) = (xobject.width.max(1) as f32, xobject.height.max(1) as f32);
                let scale = (inner_w / iw).min(inner_h / ih);
                let (w, h) = (iw * scale, ih * scale);
                let res = xobject.resource_name();
                content::draw_image(
                    self.pm.current_content(),
                    &res,
                    x + CONTENT_INSET + (inner_w - w) / 2.0,
                    bottom + CONTENT_INSET + (inner_h - h) / 2.0,
                    w,
                    h,
                    Some((x + CONTENT_INSET, bottom + CONTENT_INSET, inner_w, inner_h)),
                );
            }
            None => {
                self.image_placeholder(name.unwrap_or("image"), x + CONTENT_INSET, bottom + CONTENT_INSET, inner_w, inner_h);
            }
        }
    }

    /// Light-gray box with the image name centered, for undecodable input
    fn image_placeholder(&mut self, name: &str, x: f32, bottom: f32, width: f32, height: f32) {
        content::fill_rect(
            self.pm.current_content(),
            x,
            bottom,
            width,
            height,
            Color { r: 0.9, g: 0.9, b: 0.9, a: 1.0 },
        );
        let key = self.registry.resolve("Helvetica", false, false);
        self.registry.mark_used(&key, name);
        let size = 9.0;
        let text_width = self.registry.text_width(&key, name, size);
        let show = self.registry.encode_text(&key, name);
        let res = self.registry.resource_name(&key);
        content::show_text(
            self.pm.current_content(),
            &TextOp {
                font_res: &res,
                size,
                x: Alignment::Center.text_x(x, width, text_width),
                y: bottom + height / 2.0 - size / 2.0,
                show: &show,
                color: Color { r: 0.4, g: 0.4, b: 0.4, a: 1.0 },
                underline_width: None,
            },
        );
    }

    // --- Standalone images and spacers ---

    fn draw_standalone_image(&mut self, image: &ImageElement) {
        let usable = self.pm.dims.usable_width();
        let (height, xobject) = match self.images.find(&image.data) {
            Some(x) if !x.is_form && x.width > 0 => {
                let aspect = x.height as f32 / x.width as f32;
                (usable * aspect, Some(x.clone()))
            }
            Some(x) => (
                image.height.or(image.width).unwrap_or(DEFAULT_IMAGE_HEIGHT),
                Some(x.clone()),
            ),
            None => (image.height.unwrap_or(DEFAULT_IMAGE_HEIGHT), None),
        };

        if self.pm.check_page_break(height) {
            self.break_page();
        }
        let bottom = self.pm.y - height;
        match xobject {
            Some(x) => {
                let res = x.resource_name();
                content::draw_image(self.pm.current_content(), &res, MARGIN, bottom, usable, height, None);
            }
            None => self.image_placeholder("image", MARGIN, bottom, usable, height),
        }
        self.pm.y -= height;
    }

    fn draw_spacer(&mut self, spacer: &Spacer) {
        self.pm.y -= spacer.height;
    }

    // --- Footer pass ---

    /// Stamp footers and `Page N of M` under the bottom margin of every page
    fn stamp_footers(&mut self, footer: Option<&Footer>) {
        let total = self.pm.page_count();
        let usable = self.pm.dims.usable_width();
        let y = MARGIN / 2.0;

        for index in 0..total {
            self.pm.switch_to_page(index);

            if let Some(footer) = footer {
                if let Some(text) = &footer.text {
                    let style = CellStyle::parse(&footer.props);
                    let key = self.registry.resolve(&style.font, style.bold, style.italic);
                    self.registry.mark_used(&key, text);
                    let width = self.registry.text_width(&key, text, style.size);
                    let x = style.align.text_x(MARGIN, usable, width);
                    let show = self.registry.encode_text(&key, text);
                    let res = self.registry.resource_name(&key);
                    content::show_text(
                        self.pm.current_content(),
                        &TextOp {
                            font_res: &res,
                            size: style.size,
                            x,
                            y,
                            show: &show,
                            color: Color::BLACK,
                            underline_width: None,
                        },
                    );
                }
            }

            let label = format!("Page {} of {}", index + 1, total);
            let key = self.registry.resolve("Helvetica", false, false);
            self.registry.mark_used(&key, &label);
            let size = 9.0;
            let width = self.registry.text_width(&key, &label, size);
            let show = self.registry.encode_text(&key, &label);
            let res = self.registry.resource_name(&key);
            content::show_text(
                self.pm.current_content(),
                &TextOp {
                    font_res: &res,
                    size,
                    x: Alignment::Right.text_x(MARGIN, usable, width),
                    y,
                    show: &show,
                    color: Color::BLACK,
                    underline_width: None,
                },
            );
        }
    }

    // --- Annotations ---

    fn link_annotation(&mut self, rect: (f32, f32, f32, f32), uri: &str) {
        let (x, y, w, h) = rect;
        let mut buf = PdfBuffer::new();
        buf.push_str("<< /Type /Annot /Subtype /Link /Rect [");
        buf.push_f2(x);
        buf.push_str(" ");
        buf.push_f2(y);
        buf.push_str(" ");
        buf.push_f2(x + w);
        buf.push_str(" ");
        buf.push_f2(y + h);
        buf.push_str("] /Border [0 0 0] /A << /S /URI /URI ");
        buf.push_literal_string(uri);
        buf.push_str(" >> >>");
        let id = self.pm.add_extra_object(buf.into_bytes());
        self.pm.add_annot(id);
    }
}
