//! Inbound contracts the engine consumes but never implements itself:
//! the translator backend and the fontmap (spec §6). Concrete translator
//! backends and real font files are external collaborators — this module
//! only defines the traits the re-layout engine (C4) and emitter (C5) call
//! through, plus a tiny built-in registry so the crate is self-contained
//! for tests.

use std::collections::HashMap;

use ahash::AHashMap;

use crate::error::EngineError;

/// How a fontmap entry's characters are hex-encoded in a `TJ` array
/// (spec §4.5): CID-indexed fonts get 4 hex digits of the raw code point,
/// everything else gets 2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    Cid,
    SingleByte,
}

/// One entry of the fontmap: a font the re-layout engine may place
/// characters in (spec §6, "Fontmap contract").
pub trait FontMapEntry: Send + Sync {
    /// Advance width of `ch` at `size`, in user-space units.
    fn advance(&self, ch: char, size: f32) -> f32;
    /// Decode `code` back to a character, or `None` if this font can't.
    /// Used by font selection to test whether `tiro` round-trips a glyph.
    fn to_unichr(&self, code: u32) -> Option<char>;
    fn encoding(&self) -> Encoding;
}

/// The Unicode fallback font (`noto_name` in spec §6), consulted when no
/// fontmap entry — including `tiro` — can render a character.
pub trait UnicodeFallbackFont: Send + Sync {
    /// Glyph index for `code`, or `0` (notdef) if the font lacks it
    /// (spec §7, "Font missing a glyph").
    fn has_glyph(&self, code: u32) -> u32;
    /// Per-character advance widths at `size`; spec keeps the original's
    /// array-valued signature, callers use the first entry.
    fn char_lengths(&self, ch: char, size: f32) -> Vec<f32>;
}

/// The full fontmap the re-layout engine and emitter draw from: the Latin
/// fallback (`tiro`), the set of fonts referenced by glyph `font_ref`s, and
/// the Unicode fallback.
pub struct FontMap {
    pub tiro_name: String,
    pub noto_name: String,
    entries: AHashMap<String, Box<dyn FontMapEntry>>,
    noto: Box<dyn UnicodeFallbackFont>,
}

impl FontMap {
    pub fn new(
        tiro_name: impl Into<String>,
        tiro: Box<dyn FontMapEntry>,
        noto_name: impl Into<String>,
        noto: Box<dyn UnicodeFallbackFont>,
    ) -> Self {
        let tiro_name = tiro_name.into();
        let mut entries: AHashMap<String, Box<dyn FontMapEntry>> = AHashMap::default();
        entries.insert(tiro_name.clone(), tiro);
        Self {
            tiro_name,
            noto_name: noto_name.into(),
            entries,
            noto,
        }
    }

    /// Registers an additional fontmap entry, keyed by the font id glyphs
    /// reference through their `font_ref`.
    pub fn insert(&mut self, font_ref: impl Into<String>, entry: Box<dyn FontMapEntry>) {
        self.entries.insert(font_ref.into(), entry);
    }

    pub fn get(&self, font_ref: &str) -> Option<&dyn FontMapEntry> {
        self.entries.get(font_ref).map(|b| b.as_ref())
    }

    pub fn tiro(&self) -> &dyn FontMapEntry {
        self.entries[&self.tiro_name].as_ref()
    }

    pub fn noto(&self) -> &dyn UnicodeFallbackFont {
        self.noto.as_ref()
    }

    /// Font selection for a plain character (spec §4.4): `tiro` if it can
    /// decode `ch` by round-tripping, else the Unicode fallback.
    pub fn select_for_char(&self, ch: char) -> FontChoice<'_> {
        if self.tiro().to_unichr(ch as u32) == Some(ch) {
            FontChoice::Entry(&self.tiro_name)
        } else {
            FontChoice::Noto
        }
    }
}

/// Which font a character was placed in, returned by
/// [`FontMap::select_for_char`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontChoice<'a> {
    Entry(&'a str),
    Noto,
}

/// The translator backend contract (spec §6): `translate(text) ->
/// anyhow::Result<String>`, safe under concurrent calls from the
/// dispatcher's worker pool.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> anyhow::Result<String>;
    fn name(&self) -> &str;
}

/// A translator that returns its input unchanged; used in tests for the
/// "idempotent pass-through" property (spec §8 item 2) and as the
/// `service = "identity"` registry entry.
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, text: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "identity"
    }
}

type TranslatorFactory = Box<dyn Fn() -> Box<dyn Translator> + Send + Sync>;

/// A registry of translator constructors keyed by the prefix of
/// `service.split(':', 1)[0]` (spec §6). Concrete network-backed
/// translators register themselves here from outside this crate; only the
/// identity translator is built in.
#[derive(Default)]
pub struct TranslatorRegistry {
    factories: HashMap<String, TranslatorFactory>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register("identity", || Box::new(IdentityTranslator));
        registry
    }

    pub fn register(
        &mut self,
        service: impl Into<String>,
        factory: impl Fn() -> Box<dyn Translator> + Send + Sync + 'static,
    ) {
        self.factories.insert(service.into(), Box::new(factory));
    }

    /// Builds the translator for `service`, splitting on the first `:` per
    /// spec §6. Unknown service names are the one fatal, construction-time
    /// error the engine raises (spec §7).
    pub fn build(&self, service: &str) -> Result<Box<dyn Translator>, EngineError> {
        let prefix = service.split(':').next().unwrap_or(service);
        self.factories
            .get(prefix)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnsupportedTranslator(service.to_string()))
    }
}
