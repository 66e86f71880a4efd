pub mod compose;

use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use boxreader_core::{Command, Point, RenderImage, Theme};
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};

pub use compose::{compose_frame, placeholder_tint, FrameOverlay, FrameStyle, FrameWindow};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` and places it at the cursor, replacing the previous
    /// frame (same image and placement id).
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every image this renderer placed.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Terminal cell size in pixels, used to map mouse cells to layout points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    pub cell_width: f32,
    pub cell_height: f32,
}

impl CellGeometry {
    const FALLBACK_WIDTH: f32 = 8.0;
    const FALLBACK_HEIGHT: f32 = 16.0;

    /// Derives the cell size from the window size report. Terminals that do
    /// not report pixel sizes get a conventional 8x16 cell.
    pub fn from_window(columns: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        if columns == 0 || rows == 0 || pixel_width == 0 || pixel_height == 0 {
            return Self {
                cell_width: Self::FALLBACK_WIDTH,
                cell_height: Self::FALLBACK_HEIGHT,
            };
        }
        Self {
            cell_width: pixel_width as f32 / columns as f32,
            cell_height: pixel_height as f32 / rows as f32,
        }
    }

    pub fn pixels_for(&self, columns: u32, rows: u32) -> (u32, u32) {
        (
            (columns as f32 * self.cell_width).round().max(1.0) as u32,
            (rows as f32 * self.cell_height).round().max(1.0) as u32,
        )
    }

    /// Centre of a cell in layout coordinates for a viewport scrolled to `scroll_top`.
    pub fn to_layout(&self, column: u16, row: u16, scroll_top: f32) -> Point {
        Point::new(
            (column as f32 + 0.5) * self.cell_width,
            (row as f32 + 0.5) * self.cell_height + scroll_top,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState, KeyModifiers};

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RenderImage {
            width: 1,
            height: 1,
            pixels: vec![255, 0, 0, 255],
        };

        renderer.draw(&image, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.writer;
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
    }

    #[test]
    fn cell_geometry_maps_cells_to_layout_points() {
        let cells = CellGeometry::from_window(100, 50, 800, 800);
        assert_eq!(cells.cell_width, 8.0);
        assert_eq!(cells.cell_height, 16.0);
        assert_eq!(cells.pixels_for(10, 2), (80, 32));
        assert_eq!(cells.to_layout(0, 1, 100.0), Point::new(4.0, 124.0));

        let fallback = CellGeometry::from_window(80, 24, 0, 0);
        assert_eq!(fallback.cell_height, 16.0);
    }

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn mouse_event(kind: MouseEventKind, column: u16, row: u16) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn event_mapper_uses_numeric_prefix_for_scroll_lines() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('1'))),
            UiEvent::None
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('2'))),
            UiEvent::None
        ));

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            UiEvent::Scroll { lines } => assert_eq!(lines, 12),
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event(KeyCode::Up)) {
            UiEvent::Scroll { lines } => assert_eq!(lines, -1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_prefix_selects_goto_target() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('7')));
        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::GotoPage { page }) => assert_eq!(page, 7),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::GotoPage { page }) => assert_eq!(page, u32::MAX),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event(KeyCode::Char('g'))) {
            UiEvent::Command(Command::GotoPage { page }) => assert_eq!(page, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_drops_prefix_on_other_command() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('4'))),
            UiEvent::None
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('q'))),
            UiEvent::Quit
        ));

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            UiEvent::Scroll { lines } => assert_eq!(lines, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_maps_view_shortcuts() {
        let mut mapper = EventMapper::new();
        let cases = [
            (KeyCode::PageDown, Command::NextPage),
            (KeyCode::Right, Command::NextPage),
            (KeyCode::PageUp, Command::PrevPage),
            (KeyCode::Left, Command::PrevPage),
            (KeyCode::Char('+'), Command::ZoomIn),
            (KeyCode::Char('-'), Command::ZoomOut),
            (KeyCode::Char('f'), Command::FitWidth),
            (KeyCode::Char('m'), Command::ToggleMode),
            (KeyCode::Char('t'), Command::CycleTheme),
            (KeyCode::Esc, Command::ClearSelection),
        ];
        for (code, expected) in cases {
            match mapper.map_event(key_event(code)) {
                UiEvent::Command(command) => assert_eq!(command, expected),
                other => panic!("unexpected event for {:?}: {:?}", code, other),
            }
        }
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('a'))),
            UiEvent::Annotate
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('y'))),
            UiEvent::CopySelection
        ));
        assert!(matches!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('c'),
                KeyModifiers::CONTROL
            )),
            UiEvent::Quit
        ));
    }

    #[test]
    fn event_mapper_maps_n_and_uppercase_n_to_search_navigation() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('n'))),
            UiEvent::SearchNext
        ));
        assert!(matches!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('N'),
                KeyModifiers::SHIFT,
            )),
            UiEvent::SearchPrev
        ));
    }

    #[test]
    fn event_mapper_slash_enters_search_mode_and_collects_input() {
        let mut mapper = EventMapper::new();

        match mapper.map_event(key_event(KeyCode::Char('/'))) {
            UiEvent::BeginSearch => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        match mapper.map_event(key_event(KeyCode::Char('f'))) {
            UiEvent::SearchQueryChanged { ref query } => assert_eq!(query, "f"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(mapper.pending_input().as_deref(), Some("/f"));

        match mapper.map_event(key_event(KeyCode::Backspace)) {
            UiEvent::SearchQueryChanged { ref query } => assert!(query.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event(KeyCode::Char('g'))) {
            UiEvent::SearchQueryChanged { ref query } => assert_eq!(query, "g"),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event(KeyCode::Enter)) {
            UiEvent::SearchSubmit { ref query } => assert_eq!(query, "g"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(mapper.pending_input().is_none());
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn event_mapper_collects_instruction_text() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('i'))),
            UiEvent::BeginInstruction
        ));
        for c in "Sum it".chars() {
            mapper.map_event(key_event(KeyCode::Char(c)));
        }
        assert_eq!(mapper.pending_input().as_deref(), Some("instruction: Sum it"));
        match mapper.map_event(key_event(KeyCode::Enter)) {
            UiEvent::InstructionSubmit { ref text } => assert_eq!(text, "Sum it"),
            other => panic!("unexpected event: {:?}", other),
        }

        mapper.map_event(key_event(KeyCode::Char('i')));
        mapper.map_event(key_event(KeyCode::Char('x')));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::InputCancel
        ));
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn event_mapper_maps_mouse_buttons_and_wheel() {
        let mut mapper = EventMapper::new();
        match mapper.map_event(mouse_event(MouseEventKind::Down(MouseButton::Left), 3, 4)) {
            UiEvent::Press { column, row } => assert_eq!((column, row), (3, 4)),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            mapper.map_event(mouse_event(MouseEventKind::Drag(MouseButton::Left), 5, 6)),
            UiEvent::Drag { column: 5, row: 6 }
        ));
        assert!(matches!(
            mapper.map_event(mouse_event(MouseEventKind::Up(MouseButton::Left), 5, 6)),
            UiEvent::Release { column: 5, row: 6 }
        ));
        match mapper.map_event(mouse_event(MouseEventKind::ScrollDown, 0, 0)) {
            UiEvent::Scroll { lines } => assert_eq!(lines, EventMapper::WHEEL_LINES),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            mapper.map_event(mouse_event(MouseEventKind::Down(MouseButton::Right), 0, 0)),
            UiEvent::None
        ));
    }

    #[test]
    fn event_mapper_switching_modes_clears_pending_state() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('1')));
        assert_eq!(mapper.pending_input().as_deref(), Some("1"));

        mapper.set_mode(InputMode::Search);
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));
        mapper.set_mode(InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn resize_events_pass_through() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(Event::Resize(120, 40)),
            UiEvent::Resize {
                columns: 120,
                rows: 40
            }
        ));
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    /// Positive moves down the document.
    Scroll { lines: i32 },
    BeginSearch,
    SearchQueryChanged { query: String },
    SearchSubmit { query: String },
    SearchNext,
    SearchPrev,
    BeginInstruction,
    InstructionSubmit { text: String },
    InputCancel,
    Annotate,
    CopySelection,
    Press { column: u16, row: u16 },
    Drag { column: u16, row: u16 },
    Release { column: u16, row: u16 },
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
    Instruction,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<u32>,
    pending_digits: String,
    mode: InputMode,
    input_buffer: String,
}

impl EventMapper {
    const WHEEL_LINES: i32 = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.input_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Search | InputMode::Instruction => self.map_key_input(key),
            },
            _ => UiEvent::None,
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let MouseEvent {
            kind, column, row, ..
        } = mouse;
        match kind {
            MouseEventKind::Down(MouseButton::Left) => UiEvent::Press { column, row },
            MouseEventKind::Drag(MouseButton::Left) => UiEvent::Drag { column, row },
            MouseEventKind::Up(MouseButton::Left) => UiEvent::Release { column, row },
            MouseEventKind::ScrollDown => UiEvent::Scroll {
                lines: Self::WHEEL_LINES,
            },
            MouseEventKind::ScrollUp => UiEvent::Scroll {
                lines: -Self::WHEEL_LINES,
            },
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                UiEvent::Scroll {
                    lines: self.take_count() as i32,
                }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                UiEvent::Scroll {
                    lines: -(self.take_count() as i32),
                }
            }
            (KeyCode::PageDown, _) | (KeyCode::Right, _) => self.command(Command::NextPage),
            (KeyCode::PageUp, _) | (KeyCode::Left, _) => self.command(Command::PrevPage),
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.pending_count.take().unwrap_or(1);
                self.command(Command::GotoPage { page })
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                let page = self.pending_count.take().unwrap_or(u32::MAX);
                self.command(Command::GotoPage { page })
            }
            (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => self.command(Command::ZoomIn),
            (KeyCode::Char('-'), _) => self.command(Command::ZoomOut),
            (KeyCode::Char('f'), KeyModifiers::NONE) => self.command(Command::FitWidth),
            (KeyCode::Char('m'), KeyModifiers::NONE) => self.command(Command::ToggleMode),
            (KeyCode::Char('t'), KeyModifiers::NONE) => self.command(Command::CycleTheme),
            (KeyCode::Esc, _) => self.command(Command::ClearSelection),
            (KeyCode::Char('/'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Search);
                UiEvent::BeginSearch
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::SearchNext
            }
            (KeyCode::Char('N'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                self.reset_count();
                UiEvent::SearchPrev
            }
            (KeyCode::Char('i'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Instruction);
                UiEvent::BeginInstruction
            }
            (KeyCode::Char('a'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Annotate
            }
            (KeyCode::Char('y'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::CopySelection
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_input(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        let searching = self.mode == InputMode::Search;
        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::InputCancel
            }
            (KeyCode::Enter, _) => {
                let text = std::mem::take(&mut self.input_buffer);
                self.set_mode(InputMode::Normal);
                if searching {
                    UiEvent::SearchSubmit { query: text }
                } else {
                    UiEvent::InstructionSubmit { text }
                }
            }
            (KeyCode::Backspace, _) => {
                self.input_buffer.pop();
                self.input_changed(searching)
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.input_buffer.push(c);
                self.input_changed(searching)
            }
            _ => UiEvent::None,
        }
    }

    fn input_changed(&self, searching: bool) -> UiEvent {
        if searching {
            UiEvent::SearchQueryChanged {
                query: self.input_buffer.clone(),
            }
        } else {
            UiEvent::None
        }
    }

    fn command(&mut self, command: Command) -> UiEvent {
        self.reset_count();
        UiEvent::Command(command)
    }

    fn push_digit(&mut self, digit: u32) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> u32 {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Search => Some(format!("/{}", self.input_buffer)),
            InputMode::Instruction => Some(format!("instruction: {}", self.input_buffer)),
            InputMode::Normal if self.pending_digits.is_empty() => None,
            InputMode::Normal => Some(self.pending_digits.clone()),
        }
    }
}

/// Status bar colours; the theme is reflected here and in placeholder tint only.
pub fn status_colors(theme: Theme) -> (Color, Color) {
    match theme {
        Theme::Sepia => (
            Color::Rgb {
                r: 91,
                g: 70,
                b: 54,
            },
            Color::Rgb {
                r: 244,
                g: 236,
                b: 216,
            },
        ),
        Theme::Light => (Color::Black, Color::White),
        Theme::Dark => (Color::Grey, Color::Rgb { r: 30, g: 30, b: 30 }),
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str, theme: Theme) -> io::Result<()> {
    let (fg, bg) = status_colors(theme);
    crossterm::queue!(
        writer,
        SetForegroundColor(fg),
        SetBackgroundColor(bg),
        Print(label),
        ResetColor
    )?;
    writer.flush()
}
