//! Decides which pages are materialised (rasterised and glyph-indexed).
//!
//! In single-page mode exactly one slot exists. In scroll mode every page
//! gets a placeholder slot sized from the first page so the layout is stable
//! before anything renders; slots are materialised when they come near the
//! viewport and are kept for the rest of the session. Every reset bumps a
//! generation counter so renders started before the reset are discarded on
//! completion.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::geometry::{BBox, Point};
use crate::glyph::{Glyph, GlyphIndex, PageSize, PageViewport};
use crate::settings::ViewMode;
use crate::{RenderImage, RenderedPage};

/// Vertical space between stacked pages.
pub const PAGE_GAP: f32 = 32.0;
/// The viewport is grown by this much above and below before testing visibility.
pub const OBSERVER_MARGIN: f32 = 400.0;
/// Fraction of a slot that must fall inside the grown viewport.
pub const VISIBILITY_THRESHOLD: f32 = 0.15;
/// A page counts as current once its top is within this distance of the scroll offset.
pub const CURRENT_PAGE_TOLERANCE: f32 = 24.0;

#[derive(Debug, Clone, Copy)]
pub struct FitWidthOptions {
    pub padding: f32,
    pub min_width: f32,
    pub max_width: f32,
}

impl Default for FitWidthOptions {
    fn default() -> Self {
        Self {
            padding: 80.0,
            min_width: 320.0,
            max_width: 900.0,
        }
    }
}

/// Scale at which a page of unscaled `page_width` fills the clamped viewer width.
pub fn fit_width_scale(page_width: f32, viewer_width: f32, options: FitWidthOptions) -> f32 {
    let available = (viewer_width - options.padding).max(0.0);
    let target = available.max(options.min_width).min(options.max_width);
    if page_width <= 0.0 {
        return 1.0;
    }
    target / page_width
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Unrendered,
    Loading,
    Rendered,
}

#[derive(Debug, Clone)]
pub struct MaterializedPage {
    pub image: Arc<RenderImage>,
    pub glyphs: Arc<GlyphIndex>,
    pub viewport: PageViewport,
}

#[derive(Debug, Clone)]
pub struct PageSlot {
    pub page: u32,
    pub state: RenderState,
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
    content: Option<MaterializedPage>,
}

impl PageSlot {
    fn placeholder(page: u32, top: f32, width: f32, height: f32, viewer_width: f32) -> Self {
        Self {
            page,
            state: RenderState::Unrendered,
            top,
            left: centered_left(viewer_width, width),
            width,
            height,
            content: None,
        }
    }

    pub fn content(&self) -> Option<&MaterializedPage> {
        self.content.as_ref()
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

fn centered_left(viewer_width: f32, width: f32) -> f32 {
    ((viewer_width - width) / 2.0).max(0.0)
}

/// Work order for one page render. Only valid for the generation it was issued in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterializeTicket {
    pub page: u32,
    pub scale: f32,
    pub generation: u64,
}

/// Visible part of the scroll container, in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportWindow {
    pub top: f32,
    pub height: f32,
}

#[derive(Debug)]
pub struct PageVirtualizer {
    mode: ViewMode,
    scale: f32,
    generation: u64,
    viewer_width: f32,
    slots: Vec<PageSlot>,
    observed: BTreeSet<u32>,
}

impl Default for PageVirtualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageVirtualizer {
    pub fn new() -> Self {
        Self {
            mode: ViewMode::Single,
            scale: 1.0,
            generation: 0,
            viewer_width: 0.0,
            slots: Vec::new(),
            observed: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    /// Drops every slot and invalidates outstanding tickets.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.slots.clear();
        self.observed.clear();
    }

    /// Single-page layout holding only `page`, immediately put into loading.
    pub fn reset_single(
        &mut self,
        page: u32,
        size: PageSize,
        scale: f32,
        viewer_width: f32,
    ) -> MaterializeTicket {
        self.clear();
        self.mode = ViewMode::Single;
        self.scale = scale;
        self.viewer_width = viewer_width;
        let height = (size.height * scale).round() + PAGE_GAP;
        self.slots.push(PageSlot::placeholder(
            page,
            0.0,
            size.width * scale,
            height,
            viewer_width,
        ));
        self.begin(0)
    }

    /// Scroll layout with one placeholder per page, all under observation.
    pub fn reset_continuous(
        &mut self,
        page_count: u32,
        first_page: PageSize,
        scale: f32,
        viewer_width: f32,
    ) {
        self.clear();
        self.mode = ViewMode::Scroll;
        self.scale = scale;
        self.viewer_width = viewer_width;
        let width = first_page.width * scale;
        let height = (first_page.height * scale).round() + PAGE_GAP;
        let mut top = 0.0;
        for page in 1..=page_count {
            self.slots
                .push(PageSlot::placeholder(page, top, width, height, viewer_width));
            self.observed.insert(page);
            top += height;
        }
        debug!(
            pages = page_count,
            generation = self.generation,
            scale,
            "registered page placeholders"
        );
    }

    fn index_of(&self, page: u32) -> Option<usize> {
        self.slots.binary_search_by_key(&page, |slot| slot.page).ok()
    }

    pub fn slot(&self, page: u32) -> Option<&PageSlot> {
        self.index_of(page).map(|idx| &self.slots[idx])
    }

    pub fn state(&self, page: u32) -> Option<RenderState> {
        self.slot(page).map(|slot| slot.state)
    }

    pub fn is_observed(&self, page: u32) -> bool {
        self.observed.contains(&page)
    }

    fn begin(&mut self, idx: usize) -> MaterializeTicket {
        let slot = &mut self.slots[idx];
        slot.state = RenderState::Loading;
        self.observed.remove(&slot.page);
        MaterializeTicket {
            page: slot.page,
            scale: self.scale,
            generation: self.generation,
        }
    }

    /// Issues tickets for observed pages that now intersect the grown viewport.
    /// A page is handed out at most once per generation.
    pub fn observe(&mut self, window: ViewportWindow) -> Vec<MaterializeTicket> {
        if self.mode != ViewMode::Scroll {
            return Vec::new();
        }
        let window_top = window.top - OBSERVER_MARGIN;
        let window_bottom = window.top + window.height + OBSERVER_MARGIN;
        let window_height = window_bottom - window_top;

        let due: Vec<usize> = self
            .observed
            .iter()
            .filter_map(|page| self.index_of(*page))
            .filter(|idx| {
                let slot = &self.slots[*idx];
                let overlap = slot.bottom().min(window_bottom) - slot.top.max(window_top);
                if overlap <= 0.0 || slot.height <= 0.0 {
                    return false;
                }
                overlap / slot.height >= VISIBILITY_THRESHOLD || overlap >= window_height
            })
            .collect();

        due.into_iter().map(|idx| self.begin(idx)).collect()
    }

    /// Materialises `page` regardless of visibility. Returns `None` when the
    /// page is unknown or already loading/rendered.
    pub fn force(&mut self, page: u32) -> Option<MaterializeTicket> {
        let idx = self.index_of(page)?;
        if self.slots[idx].state != RenderState::Unrendered {
            return None;
        }
        Some(self.begin(idx))
    }

    /// Installs a finished render. Returns `false` when the ticket belongs to a
    /// superseded generation and the result was dropped.
    pub fn complete(&mut self, ticket: MaterializeTicket, rendered: RenderedPage) -> bool {
        if ticket.generation != self.generation {
            debug!(
                page = ticket.page,
                ticket_generation = ticket.generation,
                generation = self.generation,
                "discarding render from superseded layout"
            );
            return false;
        }
        let Some(idx) = self.index_of(ticket.page) else {
            return false;
        };
        if self.slots[idx].state != RenderState::Loading {
            return false;
        }

        let viewport = PageViewport::new(rendered.page_size, ticket.scale);
        let glyphs = GlyphIndex::build(ticket.page, &rendered.layout, &viewport);
        let rendered_height = rendered.image.height as f32 + PAGE_GAP;
        let rendered_width = rendered.image.width as f32;
        let viewer_width = self.viewer_width;

        let slot = &mut self.slots[idx];
        slot.height = match self.mode {
            ViewMode::Single => rendered_height,
            ViewMode::Scroll => slot.height.max(rendered_height),
        };
        slot.width = rendered_width;
        slot.left = centered_left(viewer_width, rendered_width);
        slot.state = RenderState::Rendered;
        slot.content = Some(MaterializedPage {
            image: Arc::new(rendered.image),
            glyphs: Arc::new(glyphs),
            viewport,
        });
        self.relayout_from(idx + 1);
        true
    }

    /// Returns a page whose render failed to the unrendered state so a later
    /// observation or search can retry it.
    pub fn fail(&mut self, ticket: MaterializeTicket) {
        if ticket.generation != self.generation {
            return;
        }
        if let Some(idx) = self.index_of(ticket.page) {
            let slot = &mut self.slots[idx];
            if slot.state == RenderState::Loading {
                slot.state = RenderState::Unrendered;
                if self.mode == ViewMode::Scroll {
                    self.observed.insert(slot.page);
                }
            }
        }
    }

    fn relayout_from(&mut self, start: usize) {
        if start == 0 || start > self.slots.len() {
            return;
        }
        let mut top = self.slots[start - 1].bottom();
        for slot in &mut self.slots[start..] {
            slot.top = top;
            top += slot.height;
        }
    }

    pub fn total_height(&self) -> f32 {
        self.slots.last().map(PageSlot::bottom).unwrap_or(0.0)
    }

    pub fn page_top(&self, page: u32) -> Option<f32> {
        self.slot(page).map(|slot| slot.top)
    }

    /// Last page whose top sits at or above `scroll_top` (with tolerance).
    pub fn page_at_offset(&self, scroll_top: f32) -> Option<u32> {
        let mut best = self.slots.first()?.page;
        for slot in &self.slots {
            if slot.top - CURRENT_PAGE_TOLERANCE <= scroll_top {
                best = slot.page;
            } else {
                break;
            }
        }
        Some(best)
    }

    pub fn glyph_index(&self, page: u32) -> Option<&Arc<GlyphIndex>> {
        self.slot(page)
            .and_then(|slot| slot.content.as_ref())
            .map(|content| &content.glyphs)
    }

    pub fn materialized(&self) -> impl Iterator<Item = (&PageSlot, &MaterializedPage)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.content.as_ref().map(|content| (slot, content)))
    }

    /// Every materialised glyph with its box moved into layout coordinates.
    pub fn placed_glyphs(&self) -> impl Iterator<Item = (&Glyph, BBox)> {
        self.materialized().flat_map(|(slot, content)| {
            content
                .glyphs
                .glyphs()
                .iter()
                .map(move |glyph| (glyph, glyph.bbox.translate(slot.left, slot.top)))
        })
    }

    /// Glyph under a point given in layout coordinates.
    pub fn hit_test(&self, point: Point) -> Option<&Glyph> {
        self.materialized().find_map(|(slot, content)| {
            if point.y < slot.top || point.y >= slot.bottom() {
                return None;
            }
            content
                .glyphs
                .hit_test(Point::new(point.x - slot.left, point.y - slot.top))
        })
    }
}
