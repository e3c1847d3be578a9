//! Page geometry and alignment calculations

use crate::template::{Orientation, PageSize};

/// Page margin on all sides, in points
pub const MARGIN: f32 = 72.0;

/// Page dimensions in points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f32,
    pub height: f32,
}

impl PageDimensions {
    /// Look up a named page size and apply the orientation
    ///
    /// Landscape swaps the axes. Both dimensions are always positive.
    pub fn new(size: PageSize, orientation: Orientation) -> Self {
        let (width, height) = match size {
            PageSize::A4 => (595.28, 841.89),
            PageSize::A5 => (420.94, 595.28),
            PageSize::A3 => (841.89, 1190.55),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
        };
        match orientation {
            Orientation::Portrait => Self { width, height },
            Orientation::Landscape => Self {
                width: height,
                height: width,
            },
        }
    }

    /// Width available between the left and right margins
    pub fn usable_width(&self) -> f32 {
        self.width - 2.0 * MARGIN
    }

    /// Cursor position at the top of a fresh page
    pub fn content_top(&self) -> f32 {
        self.height - MARGIN
    }
}

/// Horizontal text alignment inside a title or cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn parse(s: &str) -> Self {
        match s {
            "center" | "centre" => Alignment::Center,
            "right" => Alignment::Right,
            _ => Alignment::Left,
        }
    }

    /// X coordinate for text of `text_width` inside `[x, x + avail]`
    pub fn text_x(&self, x: f32, avail: f32, text_width: f32) -> f32 {
        match self {
            Alignment::Left => x,
            Alignment::Center => x + (avail - text_width) / 2.0,
            Alignment::Right => x + avail - text_width,
        }
    }
}

/// Normalize column weight fractions for a table
///
/// When the supplied weights do not match the column count, or sum to
/// nothing, every column gets an equal share. Zero and negative weights
/// contribute nothing to the normalization but do not error.
pub fn normalize_column_widths(weights: &[f32], max_columns: usize) -> Vec<f32> {
    if max_columns == 0 {
        return Vec::new();
    }
    if weights.len() != max_columns {
        return vec![1.0 / max_columns as f32; max_columns];
    }
    let total: f32 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return vec![1.0 / max_columns as f32; max_columns];
    }
    weights
        .iter()
        .map(|w| if *w > 0.0 { *w / total } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_portrait_dimensions() {
        let dims = PageDimensions::new(PageSize::A4, Orientation::Portrait);
        assert!((dims.width - 595.28).abs() < 0.001);
        assert!((dims.height - 841.89).abs() < 0.001);
    }

    #[test]
    fn landscape_swaps_axes() {
        let portrait = PageDimensions::new(PageSize::Letter, Orientation::Portrait);
        let landscape = PageDimensions::new(PageSize::Letter, Orientation::Landscape);
        assert_eq!(portrait.width, landscape.height);
        assert_eq!(portrait.height, landscape.width);
    }

    #[test]
    fn alignment_positions() {
        // 100pt of text inside a 200pt box starting at x=10
        assert_eq!(Alignment::Left.text_x(10.0, 200.0, 100.0), 10.0);
        assert_eq!(Alignment::Center.text_x(10.0, 200.0, 100.0), 60.0);
        assert_eq!(Alignment::Right.text_x(10.0, 200.0, 100.0), 110.0);
    }

    #[test]
    fn column_widths_fall_back_to_uniform() {
        // Wrong length
        assert_eq!(normalize_column_widths(&[1.0], 2), vec![0.5, 0.5]);
        // All zero
        assert_eq!(normalize_column_widths(&[0.0, 0.0], 2), vec![0.5, 0.5]);
    }

    #[test]
    fn column_widths_normalize_and_ignore_negatives() {
        let w = normalize_column_widths(&[3.0, -1.0, 1.0], 3);
        assert!((w[0] - 0.75).abs() < 1e-6);
        assert_eq!(w[1], 0.0);
        assert!((w[2] - 0.25).abs() < 1e-6);
    }
}
