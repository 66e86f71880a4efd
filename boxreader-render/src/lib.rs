use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use boxreader_core::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    PageSize, RenderImage, RenderRequest, RenderedPage, TextLayout, TextRun, Transform,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// Runtime override for the location of the pdfium shared library.
pub const PDFIUM_PATH_ENV: &str = "BOXREADER_PDFIUM_LIBRARY_PATH";

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        Ok(Arc::new(PdfiumDocument::new(
            Arc::clone(&self.pdfium),
            absolute,
            info,
        )))
    }
}

struct PdfiumDocument {
    document: Mutex<Option<PdfDocument<'static>>>,
    cache: Mutex<Option<RenderCacheEntry>>,
    path: PathBuf,
    info: DocumentInfo,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page: u32,
    scale: f32,
    rendered: RenderedPage,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            document: Mutex::new(None),
            cache: Mutex::new(None),
            path,
            info,
            pdfium,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It is
        // stored in `self.document`, which is declared before `pdfium` and so is
        // dropped first; the bindings outlive every use of the cached document.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(anyhow!("document {:?} is not loaded", self.path)),
        }
    }

    fn page<'a>(&self, document: &'a PdfDocument<'static>, page: u32) -> Result<PdfPage<'a>> {
        let index = page
            .checked_sub(1)
            .and_then(|index| PdfPageIndex::try_from(index).ok())
            .ok_or_else(|| anyhow!("page {} is out of supported range", page))?;
        document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))
    }

    fn render_internal(
        &self,
        document: &PdfDocument<'static>,
        request: &RenderRequest,
    ) -> Result<RenderedPage> {
        let page = self.page(document, request.page)?;
        let page_size = PageSize {
            width: page.width().value,
            height: page.height().value,
        };

        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page))?;
        let pixels = bitmap.as_image().to_rgba8().into_raw();
        let image = RenderImage {
            width: u32::try_from(bitmap.width()).unwrap_or_default(),
            height: u32::try_from(bitmap.height()).unwrap_or_default(),
            pixels,
        };

        let layout = match page.text() {
            Ok(text) => TextLayout {
                runs: text
                    .segments()
                    .iter()
                    .filter_map(|segment| {
                        let bounds = segment.bounds();
                        segment_run(
                            segment.text(),
                            bounds.left().value,
                            bounds.bottom().value,
                            bounds.right().value,
                            bounds.top().value,
                        )
                    })
                    .collect(),
            },
            Err(err) => {
                warn!(
                    ?err,
                    page = request.page,
                    path = %self.path.display(),
                    "failed to extract text layout"
                );
                TextLayout::default()
            }
        };
        debug!(page = request.page, runs = layout.runs.len(), "page rendered");

        Ok(RenderedPage {
            image,
            layout,
            page_size,
        })
    }
}

/// Text run for one segment given its bounds in page space (origin bottom-left).
fn segment_run(text: String, left: f32, bottom: f32, right: f32, top: f32) -> Option<TextRun> {
    let width = right - left;
    let height = top - bottom;
    if text.is_empty() || width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(TextRun {
        text,
        transform: Transform::translation(left, bottom),
        width,
        height,
    })
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page: u32) -> Result<PageSize> {
        self.with_document(|document| {
            let page = self.page(document, page)?;
            Ok(PageSize {
                width: page.width().value,
                height: page.height().value,
            })
        })
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page == request.page && (entry.scale - request.scale).abs() < f32::EPSILON
                {
                    return Ok(entry.rendered.clone());
                }
            }
        }

        let rendered = self.with_document(|document| self.render_internal(document, &request))?;

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            page: request.page,
            scale: request.scale,
            rendered: rendered.clone(),
        });

        Ok(rendered)
    }
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = u32::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());

    Ok(DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata { title, author },
    })
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(PDFIUM_PATH_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}={}: {}", PDFIUM_PATH_ENV, path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_PATH_ENV,
                errors.join(", ")
            ))
        }
    }
}
