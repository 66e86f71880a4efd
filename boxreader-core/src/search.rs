//! Substring search over a page's glyph stream with cyclic navigation.

use std::collections::HashSet;

use crate::glyph::{GlyphIndex, GlyphKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    pub start: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn step(self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Strips all whitespace; glyph streams never contain any.
pub fn normalize_query(query: &str) -> String {
    query.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Sequential scan that resumes `max(1, query.len())` past each match start.
pub fn find_matches(stream: &[char], query: &[char]) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    if query.is_empty() || query.len() > stream.len() {
        return matches;
    }
    let step = query.len().max(1);
    let mut cursor = 0;
    while cursor + query.len() <= stream.len() {
        match stream[cursor..]
            .windows(query.len())
            .position(|window| window == query)
        {
            Some(offset) => {
                let start = cursor + offset;
                matches.push(SearchMatch {
                    start,
                    length: query.len(),
                });
                cursor = start + step;
            }
            None => break,
        }
    }
    matches
}

#[derive(Debug, Clone)]
struct SearchSession {
    query: String,
    page: u32,
    matches: Vec<SearchMatch>,
    /// Glyph ids of the page in stream order; match offsets index into this.
    glyph_ids: Vec<u32>,
    current: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub query: String,
    pub page: u32,
    pub total: usize,
    pub current_index: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHighlights {
    pub matched: HashSet<GlyphKey>,
    pub active: HashSet<GlyphKey>,
    /// First glyph of the active match; the viewer scrolls it into view.
    pub anchor: Option<GlyphKey>,
}

impl SearchHighlights {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Idle when no session exists, query-active otherwise.
#[derive(Debug, Clone, Default)]
pub struct SearchEngine {
    session: Option<SearchSession>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn clear(&mut self) {
        self.session = None;
    }

    /// Whether the cached matches cannot serve `query` on `page`.
    pub fn needs_recompute(&self, query: &str, page: u32) -> bool {
        match &self.session {
            Some(session) => session.query != query || session.page != page,
            None => true,
        }
    }

    /// Rebuilds the match list for a normalised, non-empty `query`.
    pub fn recompute(&mut self, query: &str, index: &GlyphIndex) -> usize {
        let stream = index.char_stream();
        let needle: Vec<char> = query.chars().collect();
        let matches = find_matches(&stream, &needle);
        let total = matches.len();
        self.session = Some(SearchSession {
            query: query.to_string(),
            page: index.page(),
            matches,
            glyph_ids: index.glyphs().iter().map(|glyph| glyph.id).collect(),
            current: None,
        });
        total
    }

    /// Activates the first match, or moves cyclically from the active one.
    /// No-op without matches.
    pub fn navigate(&mut self, direction: Direction) -> Option<usize> {
        let session = self.session.as_mut()?;
        if session.matches.is_empty() {
            return None;
        }
        let len = session.matches.len() as isize;
        let next = match session.current {
            None => 0,
            Some(current) => (current as isize + direction.step()).rem_euclid(len) as usize,
        };
        session.current = Some(next);
        Some(next)
    }

    pub fn matches(&self) -> &[SearchMatch] {
        self.session
            .as_ref()
            .map(|session| session.matches.as_slice())
            .unwrap_or(&[])
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.as_ref().and_then(|session| session.current)
    }

    pub fn summary(&self) -> Option<SearchSummary> {
        self.session.as_ref().map(|session| SearchSummary {
            query: session.query.clone(),
            page: session.page,
            total: session.matches.len(),
            current_index: session.current,
        })
    }

    pub fn highlights(&self) -> SearchHighlights {
        let Some(session) = &self.session else {
            return SearchHighlights::default();
        };
        let keys_for = |found: &SearchMatch| {
            session.glyph_ids[found.start..found.start + found.length]
                .iter()
                .map(|id| GlyphKey::new(session.page, *id))
                .collect::<Vec<_>>()
        };

        let mut highlights = SearchHighlights::default();
        for found in &session.matches {
            highlights.matched.extend(keys_for(found));
        }
        if let Some(active) = session.current.and_then(|idx| session.matches.get(idx)) {
            let keys = keys_for(active);
            highlights.anchor = keys.first().copied();
            highlights.active.extend(keys);
        }
        highlights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::glyph::Glyph;

    fn chars(value: &str) -> Vec<char> {
        value.chars().collect()
    }

    fn index_for(page: u32, text: &str) -> GlyphIndex {
        let glyphs = text
            .chars()
            .enumerate()
            .map(|(idx, ch)| Glyph {
                page,
                id: idx as u32,
                ch,
                bbox: BBox::new(idx as f32 * 10.0, 0.0, 10.0, 12.0),
            })
            .collect();
        GlyphIndex::new(page, glyphs)
    }

    #[test]
    fn matches_use_non_overlapping_scan() {
        let found = find_matches(&chars("xababx"), &chars("ab"));
        let starts: Vec<usize> = found.iter().map(|m| m.start).collect();
        assert_eq!(starts, vec![1, 3]);

        let overlapping = find_matches(&chars("aaaa"), &chars("aa"));
        let starts: Vec<usize> = overlapping.iter().map(|m| m.start).collect();
        assert_eq!(starts, vec![0, 2]);
    }

    #[test]
    fn single_character_queries_find_every_occurrence() {
        let found = find_matches(&chars("banana"), &chars("a"));
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn empty_or_oversized_queries_find_nothing() {
        assert!(find_matches(&chars("abc"), &[]).is_empty());
        assert!(find_matches(&chars("ab"), &chars("abc")).is_empty());
    }

    #[test]
    fn normalize_removes_all_whitespace() {
        assert_eq!(normalize_query("  hel lo\t wor\nld "), "helloworld");
    }

    #[test]
    fn navigation_wraps_cyclically() {
        let mut engine = SearchEngine::new();
        engine.recompute("ab", &index_for(1, "xababx"));
        assert_eq!(engine.navigate(Direction::Forward), Some(0));
        assert_eq!(engine.navigate(Direction::Forward), Some(1));
        assert_eq!(engine.navigate(Direction::Forward), Some(0));
        assert_eq!(engine.navigate(Direction::Backward), Some(1));
    }

    #[test]
    fn navigation_without_matches_is_a_no_op() {
        let mut engine = SearchEngine::new();
        assert_eq!(engine.navigate(Direction::Forward), None);
        engine.recompute("zz", &index_for(1, "abc"));
        assert!(engine.is_active());
        assert_eq!(engine.navigate(Direction::Forward), None);
        assert_eq!(engine.current_index(), None);
    }

    #[test]
    fn cache_is_invalidated_by_query_or_page() {
        let mut engine = SearchEngine::new();
        assert!(engine.needs_recompute("ab", 1));
        engine.recompute("ab", &index_for(1, "ab"));
        assert!(!engine.needs_recompute("ab", 1));
        assert!(engine.needs_recompute("ab", 2));
        assert!(engine.needs_recompute("abc", 1));
        engine.clear();
        assert!(!engine.is_active());
    }

    #[test]
    fn highlights_map_offsets_to_glyph_keys() {
        let mut engine = SearchEngine::new();
        engine.recompute("ab", &index_for(4, "xababx"));
        let idle = engine.highlights();
        assert_eq!(idle.matched.len(), 4);
        assert!(idle.active.is_empty());

        engine.navigate(Direction::Forward);
        engine.navigate(Direction::Forward);
        let highlights = engine.highlights();
        assert_eq!(highlights.anchor, Some(GlyphKey::new(4, 3)));
        assert!(highlights.active.contains(&GlyphKey::new(4, 4)));
        assert_eq!(highlights.active.len(), 2);

        let summary = engine.summary().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.current_index, Some(1));
    }
}
