//! Interactive terminal viewer: one loop owns the session and the screen.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use boxreader_ai::{
    load_or_default, AiConfig, AnnotateError, AnnotationPipeline, JsonAiConfigStore,
    PassthroughFormatter, PipelineEvent, PipelineState, UreqTransport, STATUS_STALE,
};
use boxreader_core::{
    Command, Direction, DragOutcome, DragTracker, Point, Rect, Session, SessionEvent, ViewMode,
};
use boxreader_core::debounce::Debouncer;
use boxreader_tty::{
    compose_frame, write_status_line, CellGeometry, DrawParams, EventMapper, FrameOverlay,
    FrameStyle, FrameWindow, KittyRenderer, UiEvent,
};
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Layout pixels moved per scroll line.
const SCROLL_STEP: f32 = 48.0;
const RESIZE_QUIET: Duration = Duration::from_millis(300);
const SCROLL_QUIET: Duration = Duration::from_millis(120);
const SAVE_QUIET: Duration = Duration::from_millis(350);
const IDLE_POLL: Duration = Duration::from_millis(100);
const STREAM_POLL: Duration = Duration::from_millis(16);
const PANEL_MAX_ROWS: u16 = 10;

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
    }
}

enum LoopAction {
    Continue,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TerminalLayout {
    columns: u16,
    rows: u16,
    cells: CellGeometry,
}

impl TerminalLayout {
    fn query() -> Result<Self> {
        match terminal::window_size() {
            Ok(size) => Ok(Self::new(size.columns, size.rows, size.width, size.height)),
            Err(err) => {
                debug!(?err, "window pixel size unavailable");
                let (columns, rows) = terminal::size()?;
                Ok(Self::new(columns, rows, 0, 0))
            }
        }
    }

    fn new(columns: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(2),
            cells: CellGeometry::from_window(columns, rows, pixel_width, pixel_height),
        }
    }

    /// Rows above the status line.
    fn image_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    fn viewer_pixels(&self) -> (u32, u32) {
        self.cells
            .pixels_for(u32::from(self.columns), u32::from(self.image_rows()))
    }

    fn panel_rows(&self) -> u16 {
        (self.image_rows() / 3).clamp(1, PANEL_MAX_ROWS)
    }
}

/// What the bottom panel shows about the latest annotation run.
#[derive(Debug, Default)]
struct AnnotationPanel {
    status: Option<String>,
    is_error: bool,
    content: String,
    version: u64,
    state: Option<PipelineState>,
}

impl AnnotationPanel {
    fn is_visible(&self) -> bool {
        self.status.is_some() || !self.content.is_empty()
    }

    fn has_result(&self) -> bool {
        !self.content.is_empty()
    }

    fn begin(&mut self) {
        self.content.clear();
        self.version = 0;
    }

    fn set_status(&mut self, message: impl Into<String>, is_error: bool) {
        self.status = Some(message.into());
        self.is_error = is_error;
    }

    fn reject(&mut self, err: &AnnotateError) {
        self.set_status(err.to_string(), true);
    }

    /// Applies one pipeline event. Returns `true` once the run has finished.
    fn apply(&mut self, event: PipelineEvent) -> bool {
        match event {
            PipelineEvent::State(state) => self.state = Some(state),
            PipelineEvent::Status { message, is_error } => self.set_status(message, is_error),
            PipelineEvent::Output { version, content } => {
                if version >= self.version {
                    self.version = version;
                    self.content = content;
                }
            }
            PipelineEvent::Finished(outcome) => {
                info!(?outcome, "annotation finished");
                self.state = Some(PipelineState::Idle);
                return true;
            }
        }
        false
    }

    /// Replaces a non-error status with the stale notice when the result
    /// no longer matches the selection.
    fn flag_if_stale(&mut self, stale: bool) {
        if stale && self.has_result() && !self.is_error {
            self.set_status(STATUS_STALE, false);
        }
    }

    /// Status line first, then the tail of the wrapped output.
    fn lines(&self, columns: u16, max_rows: u16) -> Vec<String> {
        if !self.is_visible() || max_rows == 0 {
            return Vec::new();
        }
        let width = usize::from(columns.max(1));
        let mut lines = vec![truncate(self.status.as_deref().unwrap_or("AI"), width)];
        let body = wrap_text(&self.content, width);
        let room = usize::from(max_rows).saturating_sub(1);
        let skip = body.len().saturating_sub(room);
        lines.extend(body.into_iter().skip(skip));
        lines
    }
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Hard-wraps every line of `text` at `width` characters.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}

fn format_status(session: &Session) -> String {
    let Some(info) = session.info() else {
        return "no document".to_string();
    };
    let zoom_percent = session.effective_scale() * 100.0;
    let zoom_display = if zoom_percent.is_finite() {
        format!("{:.0}%", zoom_percent)
    } else {
        "—".to_string()
    };
    let settings = session.settings();

    let mut status = format!(
        "{} — page {}/{} — {} — {} — {}",
        info.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("<unknown>"),
        session.current_page(),
        info.page_count,
        zoom_display,
        settings.mode,
        settings.theme
    );

    let selected = session.selection().len();
    if selected > 0 {
        status.push_str(&format!(" — {} selected", selected));
    }

    if let Some(summary) = session.search_summary() {
        status.push_str(" — /");
        status.push_str(&summary.query);
        if summary.total == 0 {
            status.push_str(" (no matches)");
        } else if let Some(index) = summary.current_index {
            status.push_str(&format!(" ({}/{})", index + 1, summary.total));
        } else {
            status.push_str(&format!(" (0/{})", summary.total));
        }
    }

    status
}

fn combine_status(base: String, extra: Option<&str>) -> String {
    match extra.filter(|s| !s.is_empty()) {
        Some(extra) => format!("{base} | {extra}"),
        None => base,
    }
}

struct Debouncers {
    resize: Debouncer,
    scroll: Debouncer,
    save: Debouncer,
}

impl Debouncers {
    fn new() -> Self {
        Self {
            resize: Debouncer::new(RESIZE_QUIET),
            scroll: Debouncer::new(SCROLL_QUIET),
            save: Debouncer::new(SAVE_QUIET),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [&self.resize, &self.scroll, &self.save]
            .into_iter()
            .filter_map(Debouncer::next_deadline)
            .min()
    }
}

fn poll_timeout(now: Instant, deadline: Option<Instant>, streaming: bool) -> Duration {
    let base = if streaming { STREAM_POLL } else { IDLE_POLL };
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(now).min(base),
        None => base,
    }
}

struct Viewer {
    session: Session,
    renderer: KittyRenderer<Stdout>,
    mapper: EventMapper,
    layout: TerminalLayout,
    ai_store: JsonAiConfigStore,
    ai_config: AiConfig,
    pipeline: AnnotationPipeline,
    pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
    pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    panel: AnnotationPanel,
    drag: DragTracker,
    drag_rect: Option<Rect>,
    last_query: String,
    notice: Option<String>,
    clipboard: Option<arboard::Clipboard>,
    debouncers: Debouncers,
    frame_dirty: bool,
    text_dirty: bool,
    needs_clear: bool,
    drawn_panel_rows: u16,
}

pub async fn run(session: Session, ai_store: JsonAiConfigStore) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide, EnableMouseCapture)?;

    let mut viewer = Viewer::new(session, ai_store, KittyRenderer::new(stdout))?;
    viewer.fit_to_terminal()?;
    let result = viewer.event_loop().await;
    viewer.shutdown();
    result
}

impl Viewer {
    fn new(
        session: Session,
        ai_store: JsonAiConfigStore,
        renderer: KittyRenderer<Stdout>,
    ) -> Result<Self> {
        let ai_config = load_or_default(&ai_store);
        let pipeline = AnnotationPipeline::new(
            Arc::new(UreqTransport::new()),
            Arc::new(PassthroughFormatter),
        );
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session,
            renderer,
            mapper: EventMapper::new(),
            layout: TerminalLayout::query()?,
            ai_store,
            ai_config,
            pipeline,
            pipeline_tx,
            pipeline_rx,
            panel: AnnotationPanel::default(),
            drag: DragTracker::new(),
            drag_rect: None,
            last_query: String::new(),
            notice: None,
            clipboard: None,
            debouncers: Debouncers::new(),
            frame_dirty: true,
            text_dirty: true,
            needs_clear: true,
            drawn_panel_rows: 0,
        })
    }

    /// Lays the document out for the current terminal size.
    fn fit_to_terminal(&mut self) -> Result<()> {
        self.layout = TerminalLayout::query()?;
        let (width, height) = self.layout.viewer_pixels();
        self.session.apply(Command::Resize {
            width: width as f32,
            height: height as f32,
        })?;
        self.needs_clear = true;
        self.frame_dirty = true;
        Ok(())
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            self.drain_pipeline();
            self.fire_debouncers(Instant::now())?;
            if self.session.has_pending_renders() {
                self.materialize().await;
            }
            self.process_session_events();
            self.redraw()?;

            let timeout = poll_timeout(
                Instant::now(),
                self.debouncers.next_deadline(),
                self.pipeline.is_running(),
            );
            if event::poll(timeout)? {
                let ui_event = self.mapper.map_event(event::read()?);
                if let LoopAction::Quit = self.handle(ui_event).await? {
                    break;
                }
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.session.sync_current_page();
        self.session.persist_position();
        if let Err(err) = self
            .renderer
            .delete_images()
            .and_then(|_| self.renderer.clear_all())
        {
            warn!(?err, "failed to clear the screen on exit");
        }
    }

    async fn materialize(&mut self) {
        match self.session.materialize_pending().await {
            Ok(count) => debug!(count, "pages materialised"),
            Err(err) => warn!(?err, "page materialisation failed"),
        }
    }

    fn drain_pipeline(&mut self) {
        while let Ok(event) = self.pipeline_rx.try_recv() {
            if self.panel.apply(event) {
                // the selection may have moved while the run was streaming
                let signature = self.session.selection().signature();
                self.panel.flag_if_stale(self.pipeline.is_stale(&signature));
            }
            self.text_dirty = true;
        }
    }

    fn fire_debouncers(&mut self, now: Instant) -> Result<()> {
        if self.debouncers.resize.due(now).is_some() {
            self.fit_to_terminal()?;
        }
        if self.debouncers.scroll.due(now).is_some() && self.session.sync_current_page() {
            self.debouncers.save.trigger(now);
        }
        if self.debouncers.save.due(now).is_some() {
            self.session.persist_position();
        }
        Ok(())
    }

    /// Turns what the session reported since the last pass into redraws and
    /// the stale-result notice.
    fn process_session_events(&mut self) {
        let events: Vec<SessionEvent> = std::mem::take(&mut *self.session.events().lock());
        if events.is_empty() {
            return;
        }
        self.frame_dirty = true;
        let selection_changed = events
            .iter()
            .any(|event| matches!(event, SessionEvent::SelectionChanged { .. }));
        // a running pipeline re-checks once it finishes
        if selection_changed && !self.pipeline.is_running() {
            let signature = self.session.selection().signature();
            self.panel.flag_if_stale(self.pipeline.is_stale(&signature));
        }
    }

    async fn handle(&mut self, event: UiEvent) -> Result<LoopAction> {
        self.text_dirty = true;
        match event {
            UiEvent::Command(command) => {
                if matches!(command, Command::ClearSelection) {
                    self.drag.cancel();
                    self.drag_rect = None;
                }
                self.notice = None;
                self.session.apply(command)?;
                self.frame_dirty = true;
            }
            UiEvent::Scroll { lines } => {
                self.scroll_by(lines)?;
                self.frame_dirty = true;
            }
            UiEvent::BeginSearch | UiEvent::BeginInstruction | UiEvent::InputCancel => {}
            UiEvent::SearchQueryChanged { .. } => {}
            UiEvent::SearchSubmit { query } => {
                self.last_query = query;
                self.run_search(Direction::Forward).await?;
            }
            UiEvent::SearchNext => self.run_search(Direction::Forward).await?,
            UiEvent::SearchPrev => self.run_search(Direction::Backward).await?,
            UiEvent::InstructionSubmit { text } => {
                self.notice = Some(if text.trim().is_empty() {
                    "Using the default instruction.".to_string()
                } else {
                    "Instruction updated.".to_string()
                });
                self.session.apply(Command::SetInstruction { text })?;
            }
            UiEvent::Annotate => self.start_annotation(),
            UiEvent::CopySelection => self.copy_selection(),
            UiEvent::Press { column, row } => {
                if let Some(point) = self.layout_point(column, row) {
                    self.drag.press(point);
                }
            }
            UiEvent::Drag { column, row } => {
                if let Some(point) = self.layout_point(column, row) {
                    if let Some(rect) = self.drag.motion(point) {
                        self.drag_rect = Some(rect);
                        self.frame_dirty = true;
                    }
                }
            }
            UiEvent::Release { column, row } => self.release(column, row)?,
            UiEvent::Resize { columns, rows } => {
                debug!(columns, rows, "terminal resized");
                self.debouncers.resize.trigger(Instant::now());
            }
            UiEvent::Quit => return Ok(LoopAction::Quit),
            UiEvent::None => {}
        }
        Ok(LoopAction::Continue)
    }

    fn layout_point(&self, column: u16, row: u16) -> Option<Point> {
        if row >= self.layout.image_rows() {
            return None;
        }
        Some(
            self.layout
                .cells
                .to_layout(column, row, self.session.scroll_top()),
        )
    }

    fn release(&mut self, column: u16, row: u16) -> Result<()> {
        let row = row.min(self.layout.image_rows().saturating_sub(1));
        let point = self
            .layout
            .cells
            .to_layout(column, row, self.session.scroll_top());
        if self.drag_rect.take().is_some() {
            self.frame_dirty = true;
        }
        match self.drag.release(point) {
            Some(DragOutcome::Click(point)) => {
                let hit = self.session.glyph_at(point).map(|glyph| glyph.key());
                if let Some(key) = hit {
                    self.session.apply(Command::ToggleGlyph {
                        page: key.page,
                        id: key.id,
                    })?;
                }
            }
            Some(DragOutcome::Drag(rect)) => {
                self.session.apply(Command::SelectRect { rect })?;
            }
            None => {}
        }
        Ok(())
    }

    /// Scroll mode moves the viewport. Single-page mode scrolls inside a
    /// page taller than the screen and turns the page at its edges.
    fn scroll_by(&mut self, lines: i32) -> Result<()> {
        let before = self.session.scroll_top();
        let top = before + lines as f32 * SCROLL_STEP;
        self.session.apply(Command::Scroll { top })?;
        match self.session.settings().mode {
            ViewMode::Scroll => {
                self.debouncers.scroll.trigger(Instant::now());
            }
            ViewMode::Single => {
                if (self.session.scroll_top() - before).abs() < f32::EPSILON {
                    let command = if lines > 0 {
                        Command::NextPage
                    } else {
                        Command::PrevPage
                    };
                    self.session.apply(command)?;
                }
            }
        }
        Ok(())
    }

    async fn run_search(&mut self, direction: Direction) -> Result<()> {
        if self.last_query.trim().is_empty() {
            self.session.search("", direction).await?;
            self.notice = Some("No search query.".to_string());
            return Ok(());
        }
        let query = self.last_query.clone();
        if let Some(summary) = self.session.search(&query, direction).await? {
            debug!(total = summary.total, page = summary.page, "search navigated");
        }
        self.notice = None;
        self.frame_dirty = true;
        if self.session.settings().mode == ViewMode::Scroll {
            self.debouncers.scroll.trigger(Instant::now());
        }
        Ok(())
    }

    fn start_annotation(&mut self) {
        self.ai_config = load_or_default(&self.ai_store);
        let prepared = self.pipeline.prepare(
            &self.ai_config,
            self.session.selection(),
            self.session.instruction(),
        );
        match prepared {
            Ok(prepared) => {
                self.panel.begin();
                let pipeline = self.pipeline.clone();
                let events = self.pipeline_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = pipeline.run(prepared, events).await {
                        warn!(%err, "annotation run was not started");
                    }
                });
            }
            Err(err) => {
                if err.is_rejection() {
                    debug!(%err, "annotation request rejected");
                } else {
                    warn!(%err, "annotation request could not be prepared");
                }
                self.panel.reject(&err);
            }
        }
        self.frame_dirty = true;
    }

    fn copy_selection(&mut self) {
        let text = self.session.selection().text();
        if text.is_empty() {
            self.notice = Some("Nothing selected.".to_string());
            return;
        }
        // X11 clipboards only serve the text while the owner is alive
        let copied = match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.set_text(text.clone()),
            None => arboard::Clipboard::new().and_then(|mut clipboard| {
                clipboard.set_text(text.clone())?;
                self.clipboard = Some(clipboard);
                Ok(())
            }),
        };
        self.notice = Some(match copied {
            Ok(()) => format!("Copied {} characters.", text.chars().count()),
            Err(err) => {
                warn!(?err, "failed to copy selection to the clipboard");
                "Clipboard unavailable.".to_string()
            }
        });
    }

    fn redraw(&mut self) -> Result<()> {
        if !self.frame_dirty && !self.text_dirty {
            return Ok(());
        }
        self.renderer.begin_sync_update()?;
        if self.needs_clear {
            self.renderer.clear_all()?;
            self.needs_clear = false;
            self.drawn_panel_rows = 0;
        }
        if self.frame_dirty {
            self.draw_frame()?;
        }
        self.draw_panel()?;
        self.draw_status()?;
        self.renderer.end_sync_update()?;
        self.frame_dirty = false;
        self.text_dirty = false;
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<()> {
        let (width, height) = self.layout.viewer_pixels();
        let window = FrameWindow {
            top: self.session.scroll_top(),
            width,
            height,
        };
        let highlights = self.session.highlights();
        let overlay = FrameOverlay {
            selection: self.session.selection(),
            highlights: &highlights,
            drag: self.drag_rect,
        };
        let style = FrameStyle {
            theme: self.session.settings().theme,
            show_boxes: self.ai_config.show_boxes,
        };
        let frame = compose_frame(self.session.virtualizer(), window, &overlay, style);

        crossterm::execute!(self.renderer.writer(), cursor::MoveTo(0, 0))?;
        self.renderer.draw(
            &frame,
            DrawParams::clamped(
                u32::from(self.layout.columns),
                u32::from(self.layout.image_rows()),
            ),
        )?;
        Ok(())
    }

    fn draw_panel(&mut self) -> Result<()> {
        let image_rows = self.layout.image_rows();
        let lines = self.panel.lines(self.layout.columns, self.layout.panel_rows());
        let count = lines.len() as u16;
        let writer = self.renderer.writer();

        for offset in count..self.drawn_panel_rows {
            let row = image_rows.saturating_sub(offset + 1);
            crossterm::queue!(writer, cursor::MoveTo(0, row), Clear(ClearType::CurrentLine))?;
        }

        let first_row = image_rows.saturating_sub(count);
        for (idx, line) in lines.iter().enumerate() {
            let row = first_row + idx as u16;
            crossterm::queue!(writer, cursor::MoveTo(0, row), Clear(ClearType::CurrentLine))?;
            if idx == 0 && self.panel.is_error {
                crossterm::queue!(
                    writer,
                    SetForegroundColor(Color::Red),
                    SetAttribute(Attribute::Reverse),
                    Print(line),
                    SetAttribute(Attribute::Reset),
                    ResetColor
                )?;
            } else {
                crossterm::queue!(
                    writer,
                    SetAttribute(Attribute::Reverse),
                    Print(line),
                    SetAttribute(Attribute::Reset)
                )?;
            }
        }
        writer.flush()?;
        self.drawn_panel_rows = count;
        Ok(())
    }

    fn draw_status(&mut self) -> Result<()> {
        let pending = self.mapper.pending_input();
        let extra = pending.as_deref().or(self.notice.as_deref());
        let status = combine_status(format_status(&self.session), extra);
        let status = truncate(&status, usize::from(self.layout.columns));
        let status_row = self.layout.rows.saturating_sub(1);
        let theme = self.session.settings().theme;
        let writer = self.renderer.writer();
        crossterm::execute!(
            writer,
            cursor::MoveTo(0, status_row),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(writer, &status, theme)?;
        Ok(())
    }
}
