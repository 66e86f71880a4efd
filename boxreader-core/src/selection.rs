use std::collections::{BTreeSet, HashMap};

use crate::geometry::{BBox, Point, Rect};
use crate::glyph::{Glyph, GlyphKey};
use crate::text::reconstruct_text;

/// Manhattan distance the pointer has to travel before a press becomes a drag.
pub const DRAG_THRESHOLD: f32 = 4.0;

/// Selected glyphs keyed by `(page, id)`, each holding the snapshot taken at
/// selection time.
#[derive(Debug, Clone, Default)]
pub struct SelectionModel {
    entries: HashMap<GlyphKey, Glyph>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the glyph if selected, inserts it otherwise. Returns whether the
    /// glyph is selected afterwards.
    pub fn toggle(&mut self, glyph: &Glyph) -> bool {
        let key = glyph.key();
        if self.entries.remove(&key).is_some() {
            false
        } else {
            self.entries.insert(key, *glyph);
            true
        }
    }

    /// Replaces the selection with every glyph whose box intersects `rect`.
    /// Boxes must already be in the same coordinate space as `rect`.
    pub fn select_in_rect<'a, I>(&mut self, rect: Rect, boxes: I) -> usize
    where
        I: IntoIterator<Item = (&'a Glyph, BBox)>,
    {
        self.entries.clear();
        for (glyph, placed) in boxes {
            if rect.intersects(&placed.to_rect()) {
                self.entries.insert(glyph.key(), *glyph);
            }
        }
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &GlyphKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &GlyphKey> {
        self.entries.keys()
    }

    /// Snapshots in reading order: page, then top, then left.
    pub fn sorted(&self) -> Vec<Glyph> {
        let mut glyphs: Vec<Glyph> = self.entries.values().copied().collect();
        glyphs.sort_by(|a, b| {
            a.page
                .cmp(&b.page)
                .then(a.bbox.y.total_cmp(&b.bbox.y))
                .then(a.bbox.x.total_cmp(&b.bbox.x))
        });
        glyphs
    }

    pub fn text(&self) -> String {
        reconstruct_text(&self.sorted())
    }

    /// Distinct page numbers touched by the selection, ascending.
    pub fn pages(&self) -> Vec<u32> {
        self.entries
            .keys()
            .map(|key| key.page)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `page-id` keys sorted as strings and joined with `|`.
    pub fn signature(&self) -> String {
        let mut keys: Vec<String> = self.entries.keys().map(GlyphKey::to_string).collect();
        keys.sort();
        keys.join("|")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragOutcome {
    Click(Point),
    Drag(Rect),
}

/// Tells a click apart from a rubber-band drag.
#[derive(Debug, Clone, Default)]
pub struct DragTracker {
    start: Option<Point>,
    dragging: bool,
}

impl DragTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, point: Point) {
        self.start = Some(point);
        self.dragging = false;
    }

    /// Returns the live selection rectangle once the drag threshold is crossed.
    pub fn motion(&mut self, point: Point) -> Option<Rect> {
        let start = self.start?;
        if !self.dragging && start.manhattan_distance(point) > DRAG_THRESHOLD {
            self.dragging = true;
        }
        self.dragging.then(|| Rect::from_corners(start, point))
    }

    pub fn release(&mut self, point: Point) -> Option<DragOutcome> {
        let start = self.start.take()?;
        let was_dragging = std::mem::take(&mut self.dragging);
        if was_dragging {
            Some(DragOutcome::Drag(Rect::from_corners(start, point)))
        } else {
            Some(DragOutcome::Click(start))
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn cancel(&mut self) {
        self.start = None;
        self.dragging = false;
    }
}
