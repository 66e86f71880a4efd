pub mod debounce;
pub mod geometry;
pub mod glyph;
pub mod search;
pub mod selection;
pub mod session;
pub mod settings;
pub mod store;
pub mod text;
pub mod virtualizer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use geometry::{BBox, Point, Rect, Transform};
pub use glyph::{Glyph, GlyphIndex, GlyphKey, PageSize, PageViewport, TextLayout, TextRun};
pub use search::{Direction, SearchHighlights, SearchSummary};
pub use selection::{DragOutcome, DragTracker, SelectionModel};
pub use session::{Command, Session, SessionEvent, SessionStores, ViewerSize};
pub use settings::{ScaleMode, Settings, Theme, ViewMode};
pub use virtualizer::{PageVirtualizer, RenderState};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f6d0a52-8c1e-5b7a-9e44-1d2f60b8a9c3").expect("valid namespace UUID")
});

/// Stable id derived from the canonical path, so state survives restarts.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, resolved.to_string_lossy().as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: u32,
    pub metadata: DocumentMetadata,
}

/// Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page: u32,
    pub scale: f32,
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// What the render collaborator hands back for one page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: RenderImage,
    pub layout: TextLayout,
    pub page_size: PageSize,
}

pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    /// Unscaled size of a 1-based page.
    fn page_size(&self, page: u32) -> Result<PageSize>;
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    use anyhow::bail;

    pub const PAGE: PageSize = PageSize {
        width: 600.0,
        height: 800.0,
    };

    /// Every page holds one line reading `page <n> alpha beta`.
    pub struct FakeBackend {
        pub info: DocumentInfo,
    }

    impl DocumentBackend for FakeBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn page_size(&self, page: u32) -> Result<PageSize> {
            if page == 0 || page > self.info.page_count {
                bail!("page {} out of range", page);
            }
            Ok(PAGE)
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
            let size = self.page_size(request.page)?;
            let width = (size.width * request.scale).round() as u32;
            let height = (size.height * request.scale).round() as u32;
            let text = format!("page {} alpha beta", request.page);
            let run_width = text.chars().count() as f32 * 10.0;
            Ok(RenderedPage {
                image: RenderImage {
                    width,
                    height,
                    pixels: vec![0; (width * height * 4) as usize],
                },
                layout: TextLayout {
                    runs: vec![TextRun {
                        text,
                        transform: Transform::translation(50.0, 700.0),
                        width: run_width,
                        height: 12.0,
                    }],
                },
                page_size: size,
            })
        }
    }

    pub struct FakeProvider {
        pub page_count: u32,
    }

    #[async_trait::async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
            let info = DocumentInfo {
                id: document_id_for_path(path),
                path: path.to_path_buf(),
                page_count: self.page_count,
                metadata: DocumentMetadata::default(),
            };
            Ok(Arc::new(FakeBackend { info }))
        }
    }
}
