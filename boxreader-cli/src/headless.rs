//! Non-interactive subcommands working on a single page.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use boxreader_ai::render::EMPTY_OUTPUT;
use boxreader_ai::{
    AiConfig, AnnotationPipeline, PassthroughFormatter, PipelineEvent, RunOutcome, UreqTransport,
};
use boxreader_core::{Command, Direction, GlyphIndex, Rect, Session};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::Tool;

pub async fn run(tool: Tool, session: &mut Session, config: &AiConfig) -> Result<()> {
    let index = materialize_current(session).await?;
    let mut out = io::stdout().lock();
    match tool {
        Tool::Glyphs => print_glyphs(&index, session.effective_scale(), &mut out),
        Tool::Search { query } => print_matches(session, &index, &query, &mut out).await,
        Tool::Select { rect } => {
            select_rect(session, rect)?;
            writeln!(out, "{}", session.selection().text())?;
            Ok(())
        }
        Tool::Ask { rect, instruction } => {
            select_rect(session, rect)?;
            if let Some(text) = instruction {
                session.apply(Command::SetInstruction { text })?;
            }
            drop(out);
            ask(session, config).await
        }
    }
}

async fn materialize_current(session: &mut Session) -> Result<Arc<GlyphIndex>> {
    let page = session.current_page();
    if !session.ensure_materialized(page).await? {
        bail!("page {} could not be rendered", page);
    }
    session
        .virtualizer()
        .glyph_index(page)
        .cloned()
        .ok_or_else(|| anyhow!("page {} has no glyph index", page))
}

fn print_glyphs(index: &GlyphIndex, scale: f32, out: &mut impl Write) -> Result<()> {
    let dump = json!({
        "page": index.page(),
        "scale": scale,
        "glyphs": index.glyphs(),
    });
    serde_json::to_writer_pretty(&mut *out, &dump)?;
    writeln!(out)?;
    Ok(())
}

/// Walks through every match once, printing the glyph ids of each.
async fn print_matches(
    session: &mut Session,
    index: &GlyphIndex,
    query: &str,
    out: &mut impl Write,
) -> Result<()> {
    let Some(summary) = session.search(query, Direction::Forward).await? else {
        writeln!(out, "empty query")?;
        return Ok(());
    };
    if summary.total == 0 {
        writeln!(out, "no matches for {:?} on page {}", summary.query, summary.page)?;
        return Ok(());
    }
    writeln!(
        out,
        "{} matches for {:?} on page {}",
        summary.total, summary.query, summary.page
    )?;
    for step in 0..summary.total {
        if step > 0 {
            session.search(query, Direction::Forward).await?;
        }
        let mut ids: Vec<u32> = session.highlights().active.iter().map(|key| key.id).collect();
        ids.sort_unstable();
        let text: String = ids
            .iter()
            .filter_map(|id| index.get(*id).map(|glyph| glyph.ch))
            .collect();
        let (first, last) = match (ids.first(), ids.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => continue,
        };
        writeln!(out, "{}: glyphs {}-{} {:?}", step + 1, first, last, text)?;
    }
    Ok(())
}

/// Selects the glyphs inside `rect`, given in pixels of the rendered page.
fn select_rect(session: &mut Session, rect: Rect) -> Result<usize> {
    let page = session.current_page();
    let slot = session
        .virtualizer()
        .slot(page)
        .with_context(|| format!("page {} is not laid out", page))?;
    let rect = rect.translate(slot.left, slot.top);
    session.apply(Command::SelectRect { rect })?;
    Ok(session.selection().len())
}

async fn ask(session: &Session, config: &AiConfig) -> Result<()> {
    let pipeline = AnnotationPipeline::new(
        Arc::new(UreqTransport::new()),
        Arc::new(PassthroughFormatter),
    );
    let prepared = pipeline.prepare(config, session.selection(), session.instruction())?;
    info!(count = prepared.request.meta.count, "asking about selection");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = pipeline.clone();
    let task = tokio::spawn(async move { worker.run(prepared, tx).await });

    let mut printer = StreamPrinter::default();
    let mut stdout = io::stdout();
    let mut outcome = None;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Status { message, is_error } => {
                if is_error {
                    eprintln!("error: {message}");
                } else {
                    eprintln!("{message}");
                }
            }
            PipelineEvent::Output { content, .. } => {
                printer.show(&content, &mut stdout)?;
            }
            PipelineEvent::Finished(finished) => outcome = Some(finished),
            PipelineEvent::State(_) => {}
        }
    }
    writeln!(stdout)?;
    task.await.context("annotation task panicked")??;

    match outcome {
        Some(RunOutcome::Completed) => Ok(()),
        Some(RunOutcome::Rejected { status }) => Err(anyhow!("request failed: {status}")),
        Some(RunOutcome::Failed) | None => Err(anyhow!("annotation request failed")),
    }
}

/// Turns successive full snapshots into incremental terminal output.
#[derive(Debug, Default)]
struct StreamPrinter {
    printed: String,
}

impl StreamPrinter {
    fn show(&mut self, content: &str, out: &mut impl Write) -> io::Result<()> {
        if content == EMPTY_OUTPUT && self.printed.is_empty() {
            return Ok(());
        }
        match content.strip_prefix(self.printed.as_str()) {
            Some(suffix) => out.write_all(suffix.as_bytes())?,
            None => {
                // the formatter rewrote earlier output, start over on a new line
                writeln!(out)?;
                out.write_all(content.as_bytes())?;
            }
        }
        out.flush()?;
        self.printed = content.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use boxreader_core::{
        document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
        PageSize, RenderImage, RenderRequest, RenderedPage, SessionStores, TextLayout, TextRun,
        Transform,
    };

    struct OnePageBackend {
        info: DocumentInfo,
    }

    const PAGE: PageSize = PageSize {
        width: 200.0,
        height: 100.0,
    };

    impl DocumentBackend for OnePageBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn page_size(&self, _page: u32) -> Result<PageSize> {
            Ok(PAGE)
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
            let width = (PAGE.width * request.scale).round() as u32;
            let height = (PAGE.height * request.scale).round() as u32;
            Ok(RenderedPage {
                image: RenderImage {
                    width,
                    height,
                    pixels: vec![255; (width * height * 4) as usize],
                },
                layout: TextLayout {
                    runs: vec![TextRun {
                        text: "abab".to_string(),
                        transform: Transform::translation(0.0, 50.0),
                        width: 40.0,
                        height: 10.0,
                    }],
                },
                page_size: PAGE,
            })
        }
    }

    struct OnePageProvider;

    #[async_trait]
    impl DocumentProvider for OnePageProvider {
        async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
            Ok(Arc::new(OnePageBackend {
                info: DocumentInfo {
                    id: document_id_for_path(path),
                    path: path.to_path_buf(),
                    page_count: 1,
                    metadata: DocumentMetadata::default(),
                },
            }))
        }
    }

    async fn open_session() -> Session {
        let mut session = Session::new(SessionStores::in_memory());
        session
            .apply(Command::Resize {
                width: 200.0,
                height: 400.0,
            })
            .unwrap();
        session
            .open_with(&OnePageProvider, PathBuf::from("/tmp/one.pdf"), None)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn search_lists_every_match_once() {
        let mut session = open_session().await;
        let index = materialize_current(&mut session).await.unwrap();
        let mut out = Vec::new();
        print_matches(&mut session, &index, "a b", &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "2 matches for \"ab\" on page 1");
        assert_eq!(lines[1], "1: glyphs 0-1 \"ab\"");
        assert_eq!(lines[2], "2: glyphs 2-3 \"ab\"");
    }

    #[tokio::test]
    async fn glyph_dump_is_json() {
        let mut session = open_session().await;
        let index = materialize_current(&mut session).await.unwrap();
        let mut out = Vec::new();
        print_glyphs(&index, session.effective_scale(), &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["page"], json!(1));
        assert_eq!(value["glyphs"].as_array().unwrap().len(), 4);
        assert_eq!(value["glyphs"][1]["char"], json!("b"));
    }

    #[tokio::test]
    async fn rect_is_relative_to_the_page() {
        let mut session = open_session().await;
        materialize_current(&mut session).await.unwrap();
        let scale = session.effective_scale();
        // first two glyphs of the run, in page pixels
        let rect = Rect::new(0.0, 0.0, 19.0 * scale, 100.0 * scale);
        assert_eq!(select_rect(&mut session, rect).unwrap(), 2);
        assert_eq!(session.selection().text(), "ab");
    }

    #[test]
    fn printer_emits_only_new_text() {
        let mut printer = StreamPrinter::default();
        let mut out = Vec::new();
        printer.show(EMPTY_OUTPUT, &mut out).unwrap();
        printer.show("Hel", &mut out).unwrap();
        printer.show("Hello", &mut out).unwrap();
        printer.show("Bye", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\nBye");
    }
}
