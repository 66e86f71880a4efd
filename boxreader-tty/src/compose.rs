//! Builds the pixels for one terminal frame: pages and placeholders of the
//! visible window plus the glyph, selection and search overlays.

use boxreader_core::virtualizer::PAGE_GAP;
use boxreader_core::{
    BBox, GlyphKey, PageVirtualizer, Rect, RenderImage, SearchHighlights, SelectionModel, Theme,
};
use image::{imageops, ImageBuffer, Rgba, RgbaImage};

const BACKGROUND: [u8; 3] = [48, 48, 48];
const GLYPH_BOX: [u8; 3] = [0, 120, 215];
const SELECTED: [u8; 3] = [0, 160, 255];
const MATCHED: [u8; 3] = [255, 200, 0];
const ACTIVE_MATCH: [u8; 3] = [255, 120, 0];
const DRAG: [u8; 3] = [0, 120, 215];

/// Part of the layout shown in the frame, in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameWindow {
    pub top: f32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameStyle {
    pub theme: Theme,
    pub show_boxes: bool,
}

pub struct FrameOverlay<'a> {
    pub selection: &'a SelectionModel,
    pub highlights: &'a SearchHighlights,
    pub drag: Option<Rect>,
}

pub fn placeholder_tint(theme: Theme) -> [u8; 3] {
    match theme {
        Theme::Sepia => [244, 236, 216],
        Theme::Light => [236, 236, 236],
        Theme::Dark => [72, 72, 76],
    }
}

pub fn compose_frame(
    virtualizer: &PageVirtualizer,
    window: FrameWindow,
    overlay: &FrameOverlay<'_>,
    style: FrameStyle,
) -> RenderImage {
    let width = window.width.max(1);
    let height = window.height.max(1);
    let mut frame = RgbaImage::from_pixel(
        width,
        height,
        Rgba([BACKGROUND[0], BACKGROUND[1], BACKGROUND[2], 255]),
    );
    let window_bottom = window.top + height as f32;

    for slot in virtualizer.slots() {
        if slot.bottom() <= window.top || slot.top >= window_bottom {
            continue;
        }
        let x = slot.left.round() as i64;
        let y = (slot.top - window.top).round() as i64;
        match slot.content() {
            Some(content) => {
                let image = &content.image;
                let page: Option<ImageBuffer<Rgba<u8>, &[u8]>> =
                    ImageBuffer::from_raw(image.width, image.height, image.pixels.as_slice());
                if let Some(page) = page {
                    imageops::replace(&mut frame, &page, x, y);
                }
            }
            None => {
                let area = Rect::new(
                    slot.left,
                    slot.top - window.top,
                    slot.left + slot.width,
                    slot.top - window.top + (slot.height - PAGE_GAP).max(0.0),
                );
                fill_rect(&mut frame, area, placeholder_tint(style.theme), 1.0);
            }
        }
    }

    for (glyph, placed) in virtualizer.placed_glyphs() {
        if placed.bottom() <= window.top || placed.y >= window_bottom {
            continue;
        }
        let area = shift(placed, window.top);
        let key = glyph.key();
        if style.show_boxes {
            stroke_rect(&mut frame, area, GLYPH_BOX, 0.5);
        }
        if overlay.selection.contains(&key) {
            fill_rect(&mut frame, area, SELECTED, 0.35);
        }
        if let Some(color) = search_color(overlay.highlights, &key) {
            fill_rect(&mut frame, area, color.0, color.1);
        }
    }

    if let Some(drag) = overlay.drag {
        let area = drag.translate(0.0, -window.top);
        fill_rect(&mut frame, area, DRAG, 0.15);
        stroke_rect(&mut frame, area, DRAG, 0.9);
    }

    RenderImage {
        width,
        height,
        pixels: frame.into_raw(),
    }
}

fn search_color(highlights: &SearchHighlights, key: &GlyphKey) -> Option<([u8; 3], f32)> {
    if highlights.active.contains(key) {
        Some((ACTIVE_MATCH, 0.45))
    } else if highlights.matched.contains(key) {
        Some((MATCHED, 0.3))
    } else {
        None
    }
}

fn shift(bbox: BBox, top: f32) -> Rect {
    bbox.translate(0.0, -top).to_rect()
}

/// Integer pixel bounds clipped to the frame, or `None` when nothing is visible.
fn clip(frame: &RgbaImage, rect: Rect) -> Option<(u32, u32, u32, u32)> {
    let x0 = rect.left.floor().max(0.0) as u32;
    let y0 = rect.top.floor().max(0.0) as u32;
    let x1 = (rect.right.ceil().max(0.0) as u32).min(frame.width());
    let y1 = (rect.bottom.ceil().max(0.0) as u32).min(frame.height());
    if x0 >= x1 || y0 >= y1 {
        None
    } else {
        Some((x0, y0, x1, y1))
    }
}

fn fill_rect(frame: &mut RgbaImage, rect: Rect, color: [u8; 3], alpha: f32) {
    let Some((x0, y0, x1, y1)) = clip(frame, rect) else {
        return;
    };
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(frame.get_pixel_mut(x, y), color, alpha);
        }
    }
}

fn stroke_rect(frame: &mut RgbaImage, rect: Rect, color: [u8; 3], alpha: f32) {
    let Some((x0, y0, x1, y1)) = clip(frame, rect) else {
        return;
    };
    for x in x0..x1 {
        blend_pixel(frame.get_pixel_mut(x, y0), color, alpha);
        if y1 - 1 > y0 {
            blend_pixel(frame.get_pixel_mut(x, y1 - 1), color, alpha);
        }
    }
    for y in (y0 + 1)..y1.saturating_sub(1) {
        blend_pixel(frame.get_pixel_mut(x0, y), color, alpha);
        if x1 - 1 > x0 {
            blend_pixel(frame.get_pixel_mut(x1 - 1, y), color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.0.iter_mut().zip(color) {
        *channel = ((*channel as f32 * inv) + (target as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
    pixel.0[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxreader_core::virtualizer::ViewportWindow;
    use boxreader_core::{PageSize, RenderedPage, TextLayout, TextRun, Transform};
    use std::collections::HashSet;

    fn pixel(image: &RenderImage, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * image.width + x) * 4) as usize;
        let mut out = [0u8; 4];
        out.copy_from_slice(&image.pixels[idx..idx + 4]);
        out
    }

    fn white_page(width: u32, height: u32) -> RenderedPage {
        RenderedPage {
            image: RenderImage {
                width,
                height,
                pixels: vec![255; (width * height * 4) as usize],
            },
            layout: TextLayout {
                runs: vec![TextRun {
                    text: "ab".to_string(),
                    transform: Transform::translation(10.0, 80.0),
                    width: 20.0,
                    height: 10.0,
                }],
            },
            page_size: PageSize {
                width: width as f32,
                height: height as f32,
            },
        }
    }

    fn style() -> FrameStyle {
        FrameStyle {
            theme: Theme::Sepia,
            show_boxes: false,
        }
    }

    #[test]
    fn placeholders_use_theme_tint_and_pages_are_blitted() {
        let size = PageSize {
            width: 100.0,
            height: 100.0,
        };
        let mut virtualizer = PageVirtualizer::new();
        virtualizer.reset_continuous(3, size, 1.0, 100.0);
        let tickets = virtualizer.observe(ViewportWindow {
            top: 0.0,
            height: 50.0,
        });
        let first = tickets[0];
        assert!(virtualizer.complete(first, white_page(100, 100)));

        let selection = SelectionModel::new();
        let highlights = SearchHighlights::default();
        let overlay = FrameOverlay {
            selection: &selection,
            highlights: &highlights,
            drag: None,
        };
        let window = FrameWindow {
            top: 0.0,
            width: 100,
            height: 300,
        };
        let frame = compose_frame(&virtualizer, window, &overlay, style());

        assert_eq!(pixel(&frame, 50, 50), [255, 255, 255, 255]);
        // gap between page one and the placeholder of page two
        assert_eq!(pixel(&frame, 50, 110), [48, 48, 48, 255]);
        let tint = placeholder_tint(Theme::Sepia);
        assert_eq!(pixel(&frame, 50, 140), [tint[0], tint[1], tint[2], 255]);
    }

    #[test]
    fn selected_and_active_glyphs_are_tinted() {
        let size = PageSize {
            width: 100.0,
            height: 100.0,
        };
        let mut virtualizer = PageVirtualizer::new();
        let ticket = virtualizer.reset_single(1, size, 1.0, 100.0);
        assert!(virtualizer.complete(ticket, white_page(100, 100)));

        let glyphs = virtualizer.glyph_index(1).unwrap().clone();
        let mut selection = SelectionModel::new();
        selection.toggle(&glyphs.glyphs()[0]);
        let second = glyphs.glyphs()[1].key();
        let highlights = SearchHighlights {
            matched: HashSet::from([second]),
            active: HashSet::from([second]),
            anchor: Some(second),
        };
        let overlay = FrameOverlay {
            selection: &selection,
            highlights: &highlights,
            drag: None,
        };
        let window = FrameWindow {
            top: 0.0,
            width: 100,
            height: 100,
        };
        let frame = compose_frame(&virtualizer, window, &overlay, style());

        let first_box = glyphs.glyphs()[0].bbox;
        let second_box = glyphs.glyphs()[1].bbox;
        let selected = pixel(&frame, first_box.x as u32 + 2, first_box.y as u32 + 2);
        let active = pixel(&frame, second_box.x as u32 + 2, second_box.y as u32 + 2);
        assert_ne!(selected, [255, 255, 255, 255]);
        assert_ne!(active, [255, 255, 255, 255]);
        assert_ne!(selected, active);
        assert_eq!(pixel(&frame, 90, 5), [255, 255, 255, 255]);
    }

    #[test]
    fn overlays_outside_the_frame_are_clipped() {
        let virtualizer = PageVirtualizer::new();
        let selection = SelectionModel::new();
        let highlights = SearchHighlights::default();
        let overlay = FrameOverlay {
            selection: &selection,
            highlights: &highlights,
            drag: Some(Rect::new(-50.0, -50.0, 500.0, 5.0)),
        };
        let window = FrameWindow {
            top: 0.0,
            width: 20,
            height: 20,
        };
        let frame = compose_frame(&virtualizer, window, &overlay, style());
        assert_eq!(frame.pixels.len(), 20 * 20 * 4);
        assert_ne!(pixel(&frame, 10, 2), [48, 48, 48, 255]);
        assert_eq!(pixel(&frame, 10, 10), [48, 48, 48, 255]);
    }
}
