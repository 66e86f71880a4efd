//! Coalescing, versioned re-rendering of the streamed answer.

use anyhow::Result;
use tracing::warn;

/// Shown instead of an empty answer.
pub const EMPTY_OUTPUT: &str = "—";

/// Turns the accumulated markdown into displayable text.
pub trait Formatter: Send + Sync {
    fn format(&self, markdown: &str) -> Result<String>;
}

/// Shows the markdown verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFormatter;

impl Formatter for PassthroughFormatter {
    fn format(&self, markdown: &str) -> Result<String> {
        Ok(markdown.to_string())
    }
}

/// Formats a snapshot, falling back to the raw text when the formatter fails.
pub fn render_snapshot(formatter: &dyn Formatter, snapshot: &str) -> String {
    if snapshot.trim().is_empty() {
        return EMPTY_OUTPUT.to_string();
    }
    match formatter.format(snapshot) {
        Ok(formatted) if !formatted.is_empty() => formatted,
        Ok(_) => snapshot.to_string(),
        Err(err) => {
            warn!(?err, "formatter failed, showing raw text");
            snapshot.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub version: u64,
    pub snapshot: String,
}

/// At most one render runs at a time; requests made meanwhile collapse into
/// a single pending snapshot. Every request takes a new version, and only a
/// render carrying the latest version may reach the screen.
#[derive(Debug, Default)]
pub struct RenderScheduler {
    version: u64,
    in_flight: bool,
    pending: Option<String>,
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the job to start now, or `None` when it was queued behind the
    /// render in flight.
    pub fn request(&mut self, snapshot: String) -> Option<RenderJob> {
        self.version += 1;
        if self.in_flight {
            self.pending = Some(snapshot);
            return None;
        }
        self.in_flight = true;
        Some(RenderJob {
            version: self.version,
            snapshot,
        })
    }

    /// Marks the running render finished and starts the queued one, if any.
    pub fn finish(&mut self) -> Option<RenderJob> {
        self.in_flight = false;
        let pending = self.pending.take()?;
        self.request(pending)
    }

    pub fn accepts(&self, version: u64) -> bool {
        version == self.version
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }
}
