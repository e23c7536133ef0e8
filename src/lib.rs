//! A page-level, layout-preserving translation engine.
//!
//! Glyphs placed by a PDF parser are segmented into paragraphs, inline
//! formulas, and vertical (CJK-style) runs; paragraph text is dispatched
//! through a pluggable translator backend with bounded concurrency; the
//! translated strings are re-laid out into the original bounding boxes and
//! re-emitted as a content stream preserving page geometry.

mod arena;
mod classify;
mod config;
mod dispatch;
mod emit;
mod engine;
mod error;
mod fontmap;
mod geometry;
mod labelmap;
mod layout;
mod paragraph;
mod thread_pool;

pub use arena::{Glyph, GlyphArena, GlyphId, Line};
pub use classify::{classify_page, undecodable_placeholder, ClassifyConfig, PageItem, PageSegments};
pub use config::{default_line_height, EngineConfig};
pub use dispatch::{bypasses_backend, translate_all};
pub use emit::emit_page;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use fontmap::{
    Encoding, FontChoice, FontMap, FontMapEntry, IdentityTranslator, Translator, TranslatorRegistry,
    UnicodeFallbackFont,
};
pub use geometry::{Matrix, Point};
pub use labelmap::LabelMap;
pub use layout::{layout_paragraph, DrawOp};
pub use paragraph::{
    FormulaGroup, FormulaId, FormulaStore, Paragraph, ParagraphId, ParagraphStore, VerticalAnchor, VerticalParagraph,
};
pub use thread_pool::{BasicThreadPool, ThreadPool};
