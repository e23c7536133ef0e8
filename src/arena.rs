//! The page-local glyph arena.
//!
//! Paragraphs and formula groups exclusively own their glyphs but never need
//! to move or mutate them after insertion, so a flat arena indexed by a
//! typed small integer (spec §9, "a simple arena of glyphs indexed by small
//! integers suffices") is enough: no cycles, no shared mutation, the same
//! shape `dume::texture` uses for `TextureId`/`TextureSetId`.

use slotmap::SlotMap;

use crate::geometry::Matrix;

slotmap::new_key_type! {
    /// A glyph's index into the page's [`GlyphArena`].
    pub struct GlyphId;
}

/// A placed character, produced by the parser and never mutated afterwards
/// (spec §3).
#[derive(Debug, Clone)]
pub struct Glyph {
    /// The font's original code point for this glyph.
    pub cid: u32,
    /// Decoded text, or `None` if the font could not decode it (spec §7:
    /// substituted with a fallback placeholder by the caller before the
    /// glyph enters the arena — see `classify::UNDECODABLE_PLACEHOLDER`).
    pub unicode: String,
    pub font_ref: String,
    pub font_size: f32,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub advance: f32,
    pub matrix: Matrix,
    pub height: f32,
    pub width: f32,
}

/// A preserved vector line (spec §3). Lines with `line_width >= 5.0` are
/// rule/background art and are filtered by every consumer before reaching
/// the emitter.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub p0: (f32, f32),
    pub p1: (f32, f32),
    pub line_width: f32,
}

impl Line {
    /// Spec §3: "Lines with width >= 5.0 are filtered".
    pub fn is_kept(&self) -> bool {
        self.line_width < 5.0
    }
}

/// Owns every glyph placed on a page; paragraphs and formula groups
/// reference glyphs by [`GlyphId`] rather than owning them directly.
#[derive(Debug, Default)]
pub struct GlyphArena {
    glyphs: SlotMap<GlyphId, Glyph>,
}

impl GlyphArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, glyph: Glyph) -> GlyphId {
        self.glyphs.insert(glyph)
    }

    pub fn get(&self, id: GlyphId) -> &Glyph {
        &self.glyphs[id]
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}
