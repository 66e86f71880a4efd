//! Rebuilds readable text from selected glyph geometry.

use crate::glyph::Glyph;

/// A glyph starts a new line when its vertical offset from the previous glyph
/// exceeds this fraction of the previous glyph's height.
pub const LINE_BREAK_RATIO: f32 = 0.6;
/// Minimum horizontal gap (px) that can be read as a word break.
pub const MIN_SPACE_GAP: f32 = 2.0;
/// Gap, as a fraction of the previous glyph's width, read as a word break.
pub const SPACE_GAP_RATIO: f32 = 0.35;

/// Expects glyphs sorted by `(page, bbox.y, bbox.x)`.
pub fn reconstruct_text(glyphs: &[Glyph]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut previous: Option<&Glyph> = None;

    for glyph in glyphs {
        let Some(prev) = previous else {
            buffer.push(glyph.ch);
            previous = Some(glyph);
            continue;
        };

        let new_page = glyph.page != prev.page;
        let new_line = (glyph.bbox.y - prev.bbox.y).abs() > prev.bbox.height * LINE_BREAK_RATIO;

        if new_page || new_line {
            lines.push(std::mem::take(&mut buffer));
            buffer.push(glyph.ch);
        } else {
            let gap = glyph.bbox.x - (prev.bbox.x + prev.bbox.width);
            if gap > MIN_SPACE_GAP.max(prev.bbox.width * SPACE_GAP_RATIO) {
                buffer.push(' ');
            }
            buffer.push(glyph.ch);
        }
        previous = Some(glyph);
    }

    if previous.is_some() {
        lines.push(buffer);
    }
    lines.join("\n")
}
