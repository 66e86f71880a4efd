//! The controller that owns one open document and every piece of viewer state.
//!
//! All mutation goes through `&mut Session`; rasterisation is the only work
//! that leaves the owning task, and its results come back through
//! [`Session::materialize_pending`] where the virtualizer checks them against
//! the current layout generation.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::geometry::{Point, Rect};
use crate::glyph::{Glyph, GlyphKey, PageSize};
use crate::search::{
    normalize_query, Direction, SearchEngine, SearchHighlights, SearchSummary,
};
use crate::selection::SelectionModel;
use crate::settings::{
    MemorySettingsStore, ScaleMode, Settings, SettingsStore, ViewMode, SCALE_STEP,
};
use crate::store::{DocumentState, MemoryReadingStore, MemoryStateStore, ReadingStore, StateStore};
use crate::virtualizer::{
    fit_width_scale, FitWidthOptions, MaterializeTicket, PageVirtualizer, ViewportWindow,
};
use crate::{DocumentBackend, DocumentId, DocumentInfo, DocumentProvider, RenderRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NextPage,
    PrevPage,
    /// 1-based, clamped to the document.
    GotoPage { page: u32 },
    ZoomIn,
    ZoomOut,
    FitWidth,
    ToggleMode,
    CycleTheme,
    Resize { width: f32, height: f32 },
    Scroll { top: f32 },
    ToggleGlyph { page: u32, id: u32 },
    /// Rectangle in layout coordinates (scroll offset already applied).
    SelectRect { rect: Rect },
    ClearSelection,
    SetInstruction { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DocumentOpened(DocumentId),
    LayoutReset { generation: u64 },
    PageMaterialized { page: u32 },
    PageChanged { page: u32 },
    SelectionChanged { count: usize },
    SearchUpdated,
    SettingsChanged,
    RedrawNeeded,
}

/// Pixel size of the area pages are laid out in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerSize {
    pub width: f32,
    pub height: f32,
}

impl Default for ViewerSize {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 800.0,
        }
    }
}

#[derive(Clone)]
pub struct SessionStores {
    pub state: Arc<dyn StateStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub reading: Arc<dyn ReadingStore>,
}

impl SessionStores {
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(MemoryStateStore::new()),
            settings: Arc::new(MemorySettingsStore::new()),
            reading: Arc::new(MemoryReadingStore::new()),
        }
    }
}

struct OpenDocument {
    info: DocumentInfo,
    backend: Arc<dyn DocumentBackend>,
    first_page: PageSize,
}

pub struct Session {
    document: Option<OpenDocument>,
    settings: Settings,
    instruction: String,
    viewer: ViewerSize,
    scroll_top: f32,
    current_page: u32,
    position_dirty: bool,
    virtualizer: PageVirtualizer,
    selection: SelectionModel,
    search: SearchEngine,
    pending: VecDeque<MaterializeTicket>,
    stores: SessionStores,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Session {
    pub fn new(stores: SessionStores) -> Self {
        let settings = match stores.settings.load() {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(err) => {
                warn!(?err, "failed to load settings, using defaults");
                Settings::default()
            }
        };
        Self {
            document: None,
            instruction: String::new(),
            settings,
            viewer: ViewerSize::default(),
            scroll_top: 0.0,
            current_page: 1,
            position_dirty: false,
            virtualizer: PageVirtualizer::new(),
            selection: SelectionModel::new(),
            search: SearchEngine::new(),
            pending: VecDeque::new(),
            stores,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }

    pub fn info(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|doc| &doc.info)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn viewer(&self) -> ViewerSize {
        self.viewer
    }

    pub fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn page_count(&self) -> u32 {
        self.info().map(|info| info.page_count).unwrap_or(0)
    }

    pub fn virtualizer(&self) -> &PageVirtualizer {
        &self.virtualizer
    }

    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    pub fn search_summary(&self) -> Option<SearchSummary> {
        self.search.summary()
    }

    pub fn highlights(&self) -> SearchHighlights {
        self.search.highlights()
    }

    pub fn has_pending_renders(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Instruction for the next annotation: the edited text, else the stored default.
    pub fn instruction(&self) -> &str {
        self.settings.instruction_or_default(&self.instruction)
    }

    /// Scale pages are laid out at right now.
    pub fn effective_scale(&self) -> f32 {
        match &self.document {
            Some(doc) => self.scale_for(doc.first_page),
            None => self.settings.manual_scale,
        }
    }

    fn scale_for(&self, size: PageSize) -> f32 {
        match self.settings.scale_mode {
            ScaleMode::FitWidth => {
                fit_width_scale(size.width, self.viewer.width, FitWidthOptions::default())
            }
            ScaleMode::Manual => self.settings.manual_scale,
        }
    }

    /// Glyph under a point in layout coordinates.
    pub fn glyph_at(&self, point: Point) -> Option<&Glyph> {
        self.virtualizer.hit_test(point)
    }

    #[instrument(skip(self, provider, path), fields(path = %path.display()))]
    pub async fn open_with<P: DocumentProvider>(
        &mut self,
        provider: &P,
        path: std::path::PathBuf,
        requested_page: Option<u32>,
    ) -> Result<()> {
        let backend = provider.open(&path).await?;
        let info = backend.info().clone();
        if info.page_count == 0 {
            bail!("{} has no pages", path.display());
        }
        let first_page = backend
            .page_size(1)
            .with_context(|| format!("failed to measure first page of {}", path.display()))?;

        let path_key = info.path.to_string_lossy().to_string();
        let stored = match self.stores.state.load(&info) {
            Ok(state) => state,
            Err(err) => {
                warn!(?err, "failed to load document state");
                None
            }
        };
        let remembered = match self.stores.reading.page_for(&path_key) {
            Ok(page) => page,
            Err(err) => {
                warn!(?err, "failed to load reading position");
                None
            }
        };
        let start = requested_page
            .or(remembered)
            .or(stored.map(|state| state.last_page))
            .unwrap_or(1)
            .clamp(1, info.page_count);

        info!(pages = info.page_count, start, "opened document");
        let id = info.id;
        self.document = Some(OpenDocument {
            info,
            backend,
            first_page,
        });
        self.current_page = start;
        self.selection.clear();
        self.search.clear();
        if let Err(err) = self.stores.reading.set_last_opened(&path_key) {
            warn!(?err, "failed to record last opened document");
        }
        self.emit(SessionEvent::DocumentOpened(id));
        self.rebuild_layout()?;
        self.position_dirty = true;
        self.persist_position();
        Ok(())
    }

    pub fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::NextPage => self.go_to_page(self.current_page.saturating_add(1))?,
            Command::PrevPage => self.go_to_page(self.current_page.saturating_sub(1))?,
            Command::GotoPage { page } => self.go_to_page(page)?,
            Command::ZoomIn => self.zoom(SCALE_STEP)?,
            Command::ZoomOut => self.zoom(-SCALE_STEP)?,
            Command::FitWidth => {
                if self.settings.scale_mode != ScaleMode::FitWidth {
                    self.settings.scale_mode = ScaleMode::FitWidth;
                    self.settings_changed();
                    self.rebuild_layout()?;
                }
            }
            Command::ToggleMode => {
                self.settings.mode = self.settings.mode.toggled();
                self.settings_changed();
                self.rebuild_layout()?;
            }
            Command::CycleTheme => {
                self.settings.cycle_theme();
                self.settings_changed();
                self.emit(SessionEvent::RedrawNeeded);
            }
            Command::Resize { width, height } => {
                let next = ViewerSize {
                    width: width.max(1.0),
                    height: height.max(1.0),
                };
                if next != self.viewer {
                    self.viewer = next;
                    self.rebuild_layout()?;
                }
            }
            Command::Scroll { top } => self.scroll_to(top),
            Command::ToggleGlyph { page, id } => {
                let glyph = self
                    .virtualizer
                    .glyph_index(page)
                    .and_then(|index| index.get(id))
                    .copied();
                if let Some(glyph) = glyph {
                    self.selection.toggle(&glyph);
                    self.emit(SessionEvent::SelectionChanged {
                        count: self.selection.len(),
                    });
                }
            }
            Command::SelectRect { rect } => {
                let count = self
                    .selection
                    .select_in_rect(rect, self.virtualizer.placed_glyphs());
                debug!(count, %rect, "rect selection");
                self.emit(SessionEvent::SelectionChanged { count });
            }
            Command::ClearSelection => {
                if !self.selection.is_empty() {
                    self.selection.clear();
                    self.emit(SessionEvent::SelectionChanged { count: 0 });
                }
            }
            Command::SetInstruction { text } => {
                if !text.trim().is_empty() && text != self.settings.ai_instruction {
                    self.settings.ai_instruction = text.clone();
                    self.settings_changed();
                }
                self.instruction = text;
            }
        }
        Ok(())
    }

    fn zoom(&mut self, delta: f32) -> Result<()> {
        if self.settings.step_scale(delta) {
            self.settings_changed();
            self.rebuild_layout()?;
        }
        Ok(())
    }

    fn settings_changed(&mut self) {
        if let Err(err) = self.stores.settings.save(&self.settings) {
            warn!(?err, "failed to persist settings");
        }
        self.emit(SessionEvent::SettingsChanged);
    }

    fn go_to_page(&mut self, page: u32) -> Result<()> {
        let count = self.page_count();
        if count == 0 {
            return Ok(());
        }
        let target = page.clamp(1, count);
        if target == self.current_page {
            return Ok(());
        }
        match self.settings.mode {
            ViewMode::Single => {
                self.current_page = target;
                self.selection.clear();
                self.search.clear();
                self.rebuild_layout()?;
            }
            ViewMode::Scroll => {
                let top = self.virtualizer.page_top(target).unwrap_or(0.0);
                self.scroll_to(top);
                self.current_page = target;
            }
        }
        self.position_dirty = true;
        self.emit(SessionEvent::PageChanged { page: target });
        self.persist_position();
        Ok(())
    }

    fn max_scroll(&self) -> f32 {
        (self.virtualizer.total_height() - self.viewer.height).max(0.0)
    }

    /// Moves the viewport and queues any pages that came into range.
    fn scroll_to(&mut self, top: f32) {
        let clamped = top.clamp(0.0, self.max_scroll());
        if (clamped - self.scroll_top).abs() > f32::EPSILON {
            self.scroll_top = clamped;
            self.emit(SessionEvent::RedrawNeeded);
        }
        self.observe();
    }

    fn observe(&mut self) {
        let window = ViewportWindow {
            top: self.scroll_top,
            height: self.viewer.height,
        };
        let tickets = self.virtualizer.observe(window);
        if !tickets.is_empty() {
            debug!(pages = ?tickets.iter().map(|t| t.page).collect::<Vec<_>>(), "pages entered view");
        }
        self.pending.extend(tickets);
    }

    /// Re-derives the current page from the scroll offset in scroll mode.
    /// Returns whether it changed.
    pub fn sync_current_page(&mut self) -> bool {
        if self.settings.mode != ViewMode::Scroll {
            return false;
        }
        let Some(page) = self.virtualizer.page_at_offset(self.scroll_top) else {
            return false;
        };
        if page == self.current_page {
            return false;
        }
        self.current_page = page;
        self.position_dirty = true;
        self.emit(SessionEvent::PageChanged { page });
        true
    }

    /// Writes the current page to the document state and reading positions
    /// if it changed since the last write. Failures are logged only.
    pub fn persist_position(&mut self) {
        if !self.position_dirty {
            return;
        }
        let Some(doc) = &self.document else {
            return;
        };
        let state = DocumentState {
            last_page: self.current_page,
        };
        if let Err(err) = self.stores.state.save(&doc.info, &state) {
            warn!(?err, page = self.current_page, "failed to persist document state");
        }
        let path_key = doc.info.path.to_string_lossy();
        if let Err(err) = self.stores.reading.set_page(&path_key, self.current_page) {
            warn!(?err, page = self.current_page, "failed to persist reading position");
        }
        self.position_dirty = false;
    }

    /// Tears the layout down and recreates it for the current mode, scale and
    /// viewer size. Search highlights do not survive a rebuild.
    fn rebuild_layout(&mut self) -> Result<()> {
        let Some(doc) = &self.document else {
            return Ok(());
        };
        let page_count = doc.info.page_count;
        let first_page = doc.first_page;
        let backend = Arc::clone(&doc.backend);

        self.pending.clear();
        self.search.clear();
        match self.settings.mode {
            ViewMode::Single => {
                let size = backend.page_size(self.current_page)?;
                let scale = self.scale_for(size);
                let ticket =
                    self.virtualizer
                        .reset_single(self.current_page, size, scale, self.viewer.width);
                self.pending.push_back(ticket);
                self.scroll_top = 0.0;
            }
            ViewMode::Scroll => {
                let scale = self.scale_for(first_page);
                self.virtualizer
                    .reset_continuous(page_count, first_page, scale, self.viewer.width);
                self.scroll_top = self
                    .virtualizer
                    .page_top(self.current_page)
                    .unwrap_or(0.0)
                    .min(self.max_scroll());
                self.observe();
            }
        }
        let generation = self.virtualizer.generation();
        debug!(generation, mode = %self.settings.mode, "layout rebuilt");
        self.emit(SessionEvent::LayoutReset { generation });
        Ok(())
    }

    /// Renders every queued page. Failures return the page to the unrendered
    /// state and are logged; results from a superseded layout are dropped.
    #[instrument(skip(self))]
    pub async fn materialize_pending(&mut self) -> Result<usize> {
        let Some(doc) = &self.document else {
            self.pending.clear();
            return Ok(0);
        };
        let backend = Arc::clone(&doc.backend);
        let mut materialized = 0;

        while let Some(ticket) = self.pending.pop_front() {
            let request = RenderRequest {
                page: ticket.page,
                scale: ticket.scale,
            };
            let worker = Arc::clone(&backend);
            let outcome = tokio::task::spawn_blocking(move || worker.render_page(request))
                .await
                .context("render task panicked")?;
            match outcome {
                Ok(rendered) => {
                    if self.virtualizer.complete(ticket, rendered) {
                        materialized += 1;
                        self.emit(SessionEvent::PageMaterialized { page: ticket.page });
                    }
                }
                Err(err) => {
                    warn!(?err, page = ticket.page, "failed to render page");
                    self.virtualizer.fail(ticket);
                }
            }
        }
        if materialized > 0 {
            // taller renders may have moved later pages into view
            self.observe();
            self.emit(SessionEvent::RedrawNeeded);
        }
        Ok(materialized)
    }

    /// Materialises `page` even when it is outside the viewport.
    pub async fn ensure_materialized(&mut self, page: u32) -> Result<bool> {
        if self.virtualizer.glyph_index(page).is_some() {
            return Ok(true);
        }
        if let Some(ticket) = self.virtualizer.force(page) {
            self.pending.push_back(ticket);
        }
        self.materialize_pending().await?;
        Ok(self.virtualizer.glyph_index(page).is_some())
    }

    /// Runs a search on the current page. Recomputes when the query or page
    /// changed, then activates the first match or moves cyclically.
    /// An empty query clears the search.
    #[instrument(skip(self))]
    pub async fn search(
        &mut self,
        query: &str,
        direction: Direction,
    ) -> Result<Option<SearchSummary>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            self.search.clear();
            self.emit(SessionEvent::SearchUpdated);
            return Ok(None);
        }

        let page = self.current_page;
        if self.search.needs_recompute(&normalized, page) {
            if !self.ensure_materialized(page).await? {
                warn!(page, "search target page could not be materialised");
                self.search.clear();
                self.emit(SessionEvent::SearchUpdated);
                return Ok(None);
            }
            let Some(index) = self.virtualizer.glyph_index(page).cloned() else {
                return Ok(None);
            };
            let total = self.search.recompute(&normalized, &index);
            debug!(page, total, "search recomputed");
        }

        self.search.navigate(direction);
        if let Some(anchor) = self.search.highlights().anchor {
            self.reveal(anchor);
        }
        self.emit(SessionEvent::SearchUpdated);
        Ok(self.search.summary())
    }

    /// Scrolls so the glyph sits in the upper third of the viewport.
    fn reveal(&mut self, key: GlyphKey) {
        if self.settings.mode != ViewMode::Scroll {
            return;
        }
        let Some(slot) = self.virtualizer.slot(key.page) else {
            return;
        };
        let glyph_y = self
            .virtualizer
            .glyph_index(key.page)
            .and_then(|index| index.get(key.id))
            .map(|glyph| glyph.bbox.y)
            .unwrap_or(0.0);
        let top = slot.top + glyph_y - self.viewer.height / 3.0;
        self.scroll_to(top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::store::FileReadingStore;
    use crate::testing::FakeProvider;
    use crate::virtualizer::RenderState;

    async fn open(stores: SessionStores, pages: u32) -> Session {
        let mut session = Session::new(stores);
        session
            .open_with(
                &FakeProvider { page_count: pages },
                PathBuf::from("/tmp/boxreader-sample.pdf"),
                None,
            )
            .await
            .unwrap();
        session.materialize_pending().await.unwrap();
        session
    }

    #[tokio::test]
    async fn single_mode_navigation_replaces_the_page() {
        let mut session = open(SessionStores::in_memory(), 10).await;
        assert_eq!(session.current_page(), 1);
        assert_eq!(session.virtualizer().state(1), Some(RenderState::Rendered));

        session.apply(Command::NextPage).unwrap();
        session.materialize_pending().await.unwrap();
        assert_eq!(session.current_page(), 2);
        assert_eq!(session.virtualizer().slots().len(), 1);
        assert_eq!(session.virtualizer().state(2), Some(RenderState::Rendered));

        session.apply(Command::GotoPage { page: 99 }).unwrap();
        assert_eq!(session.current_page(), 10);
        session.apply(Command::GotoPage { page: 0 }).unwrap();
        assert_eq!(session.current_page(), 1);
        session.apply(Command::PrevPage).unwrap();
        assert_eq!(session.current_page(), 1);
    }

    #[tokio::test]
    async fn page_changes_are_persisted_and_restored() {
        let stores = SessionStores::in_memory();
        let mut session = open(stores.clone(), 10).await;
        session.apply(Command::GotoPage { page: 7 }).unwrap();

        let reopened = open(stores.clone(), 10).await;
        assert_eq!(reopened.current_page(), 7);

        let mut requested = Session::new(stores);
        requested
            .open_with(
                &FakeProvider { page_count: 10 },
                PathBuf::from("/tmp/boxreader-sample.pdf"),
                Some(3),
            )
            .await
            .unwrap();
        assert_eq!(requested.current_page(), 3);
    }

    #[tokio::test]
    async fn reading_positions_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut stores = SessionStores::in_memory();
        stores.reading = Arc::new(FileReadingStore::new(dir.path()));
        let mut session = open(stores.clone(), 5).await;
        session.apply(Command::GotoPage { page: 4 }).unwrap();

        let path = session.info().unwrap().path.to_string_lossy().to_string();
        assert_eq!(stores.reading.page_for(&path).unwrap(), Some(4));
        assert_eq!(stores.reading.last_opened().unwrap(), Some(path));
    }

    #[tokio::test]
    async fn scroll_mode_materialises_lazily_and_tracks_current_page() {
        let mut session = Session::new(SessionStores::in_memory());
        session.apply(Command::ToggleMode).unwrap();
        session
            .open_with(
                &FakeProvider { page_count: 40 },
                PathBuf::from("/tmp/boxreader-scroll.pdf"),
                None,
            )
            .await
            .unwrap();
        session.materialize_pending().await.unwrap();

        let rendered = session.virtualizer().materialized().count();
        assert!(rendered >= 1 && rendered < 40);
        assert_eq!(session.virtualizer().state(40), Some(RenderState::Unrendered));

        let top = session.virtualizer().page_top(20).unwrap();
        session.apply(Command::Scroll { top }).unwrap();
        session.materialize_pending().await.unwrap();
        assert_eq!(session.virtualizer().state(20), Some(RenderState::Rendered));
        assert!(session.sync_current_page());
        assert_eq!(session.current_page(), 20);
        assert!(!session.sync_current_page());
    }

    #[tokio::test]
    async fn scale_changes_rebuild_the_layout() {
        let mut session = open(SessionStores::in_memory(), 3).await;
        let before = session.virtualizer().generation();
        let fit = session.effective_scale();
        let manual = session.settings().manual_scale;

        session.apply(Command::ZoomIn).unwrap();
        assert_eq!(session.settings().scale_mode, ScaleMode::Manual);
        assert!((session.effective_scale() - (manual + SCALE_STEP)).abs() < 1e-4);
        assert!(session.virtualizer().generation() > before);

        session.apply(Command::FitWidth).unwrap();
        assert!((session.effective_scale() - fit).abs() < 1e-4);
    }

    #[tokio::test]
    async fn click_and_drag_selection() {
        let mut session = open(SessionStores::in_memory(), 2).await;
        let (first, placed) = {
            let (glyph, placed) = session.virtualizer().placed_glyphs().next().unwrap();
            (*glyph, placed)
        };
        let hit = session
            .glyph_at(Point::new(placed.x + 1.0, placed.y + 1.0))
            .copied()
            .unwrap();
        assert_eq!(hit.key(), first.key());

        session
            .apply(Command::ToggleGlyph {
                page: first.page,
                id: first.id,
            })
            .unwrap();
        assert_eq!(session.selection().len(), 1);

        let all = Rect::new(0.0, 0.0, 5000.0, 5000.0);
        session.apply(Command::SelectRect { rect: all }).unwrap();
        assert_eq!(session.selection().text(), "page 1 alpha beta");

        session.apply(Command::ClearSelection).unwrap();
        assert!(session.selection().is_empty());
    }

    #[tokio::test]
    async fn search_cycles_and_clears() {
        let mut session = open(SessionStores::in_memory(), 2).await;
        let summary = session
            .search("a", Direction::Forward)
            .await
            .unwrap()
            .unwrap();
        // "page1alphabeta" holds four a's
        assert_eq!(summary.total, 4);
        assert_eq!(summary.current_index, Some(0));

        let back = session
            .search("a", Direction::Backward)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.current_index, Some(3));
        assert_eq!(session.highlights().matched.len(), 4);

        assert!(session
            .search("  ", Direction::Forward)
            .await
            .unwrap()
            .is_none());
        assert!(session.highlights().is_empty());
    }

    #[tokio::test]
    async fn search_in_scroll_mode_forces_the_target_page() {
        let mut session = Session::new(SessionStores::in_memory());
        session.apply(Command::ToggleMode).unwrap();
        session
            .open_with(
                &FakeProvider { page_count: 30 },
                PathBuf::from("/tmp/boxreader-search.pdf"),
                Some(25),
            )
            .await
            .unwrap();
        assert_eq!(session.virtualizer().state(25), Some(RenderState::Loading));
        let summary = session
            .search("beta", Direction::Forward)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.page, 25);
        assert_eq!(summary.total, 1);
        assert_eq!(session.virtualizer().state(25), Some(RenderState::Rendered));
    }

    #[tokio::test]
    async fn instruction_edits_become_the_stored_default() {
        let stores = SessionStores::in_memory();
        let mut session = open(stores.clone(), 1).await;
        session
            .apply(Command::SetInstruction {
                text: "Summarise".to_string(),
            })
            .unwrap();
        assert_eq!(session.instruction(), "Summarise");
        session
            .apply(Command::SetInstruction {
                text: " ".to_string(),
            })
            .unwrap();
        assert_eq!(session.instruction(), "Summarise");
        let saved = stores.settings.load().unwrap().unwrap();
        assert_eq!(saved.ai_instruction, "Summarise");
    }

    #[tokio::test]
    async fn events_are_recorded() {
        let session = open(SessionStores::in_memory(), 2).await;
        let events = session.events();
        let events = events.lock();
        assert!(matches!(events.first(), Some(SessionEvent::DocumentOpened(_))));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::PageMaterialized { page: 1 })));
    }
}
