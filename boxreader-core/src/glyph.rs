//! Per-page glyph index built from a rendered page's text layout.
//!
//! Every non-whitespace character of every text run becomes one [`Glyph`]
//! with a pixel box at the render scale. Run width is split evenly across
//! the run's characters, so proportional fonts are approximated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Point, Transform};

/// Stable key of a glyph inside one render of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlyphKey {
    pub page: u32,
    pub id: u32,
}

impl GlyphKey {
    pub fn new(page: u32, id: u32) -> Self {
        Self { page, id }
    }
}

impl fmt::Display for GlyphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.page, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Glyph {
    pub page: u32,
    pub id: u32,
    #[serde(rename = "char")]
    pub ch: char,
    pub bbox: BBox,
}

impl Glyph {
    pub fn key(&self) -> GlyphKey {
        GlyphKey::new(self.page, self.id)
    }
}

/// Unscaled page dimensions in PDF user units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// One run of text as reported by the text-extraction collaborator.
/// `width`/`height` are unscaled; `transform` maps run space to page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub transform: Transform,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextLayout {
    pub runs: Vec<TextRun>,
}

/// Page space → pixel space for one page at one scale (y axis flipped).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
    pub transform: Transform,
}

impl PageViewport {
    pub fn new(size: PageSize, scale: f32) -> Self {
        Self {
            width: size.width * scale,
            height: size.height * scale,
            scale,
            transform: Transform([scale, 0.0, 0.0, -scale, 0.0, size.height * scale]),
        }
    }
}

/// Builds the glyph sequence for `page`. Ids are assigned sequentially in run
/// iteration order and skip whitespace.
pub fn index_glyphs(page: u32, layout: &TextLayout, viewport: &PageViewport) -> Vec<Glyph> {
    let mut glyphs = Vec::new();
    let mut next_id = 0u32;

    for run in &layout.runs {
        if run.text.trim().is_empty() {
            continue;
        }
        let char_count = run.text.chars().count();
        let placed = viewport.transform.compose(&run.transform);
        let height = run.height * viewport.scale;
        let width = run.width * viewport.scale;
        let char_width = width / char_count as f32;
        let origin = placed.origin();
        let base_y = origin.y - height;

        for (offset, ch) in run.text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x = origin.x + offset as f32 * char_width;
            glyphs.push(Glyph {
                page,
                id: next_id,
                ch,
                bbox: BBox::new(
                    round_half_up(x),
                    round_half_up(base_y),
                    round_half_up(char_width),
                    round_half_up(height),
                ),
            });
            next_id += 1;
        }
    }

    glyphs
}

fn round_half_up(value: f32) -> f32 {
    (value + 0.5).floor()
}

/// Glyphs of one materialised page, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct GlyphIndex {
    page: u32,
    glyphs: Vec<Glyph>,
}

impl GlyphIndex {
    pub fn new(page: u32, mut glyphs: Vec<Glyph>) -> Self {
        glyphs.sort_by_key(|glyph| glyph.id);
        Self { page, glyphs }
    }

    pub fn build(page: u32, layout: &TextLayout, viewport: &PageViewport) -> Self {
        Self::new(page, index_glyphs(page, layout, viewport))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Glyph> {
        self.glyphs
            .binary_search_by_key(&id, |glyph| glyph.id)
            .ok()
            .map(|idx| &self.glyphs[idx])
    }

    /// The page's characters concatenated in id order.
    pub fn char_stream(&self) -> Vec<char> {
        self.glyphs.iter().map(|glyph| glyph.ch).collect()
    }

    /// First glyph whose page-local box contains `point`.
    pub fn hit_test(&self, point: Point) -> Option<&Glyph> {
        self.glyphs.iter().find(|glyph| glyph.bbox.contains(point))
    }
}
