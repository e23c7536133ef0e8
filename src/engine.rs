//! `Engine`, the public entry point wiring C1→C5 into a single
//! `translate_page` call (spec §6/§9).

use std::sync::Arc;

use regex::Regex;

use crate::classify::{self, ClassifyConfig, PageItem};
use crate::config::{default_line_height, EngineConfig};
use crate::dispatch;
use crate::error::Result;
use crate::fontmap::{FontMap, Translator, TranslatorRegistry};
use crate::labelmap::LabelMap;
use crate::layout;
use crate::emit;
use crate::thread_pool::BasicThreadPool;

/// Owns the config, fontmap, translator, and worker pool for one
/// embedding session. Fonts and the label map are read-only and shared
/// freely across the dispatcher's workers (spec §5); `Engine` itself holds
/// no per-page mutable state between calls.
pub struct Engine {
    config: EngineConfig,
    fontmap: FontMap,
    translator: Arc<dyn Translator>,
    pool: BasicThreadPool,
    vfont_regex: Option<Regex>,
    vchar_regex: Option<Regex>,
}

impl Engine {
    /// Builds the engine. The only raising condition is construction-time
    /// (spec §7): an unsupported `service` prefix, or a malformed
    /// `vfont`/`vchar` regex.
    pub fn new(config: EngineConfig, fontmap: FontMap, registry: &TranslatorRegistry) -> Result<Self> {
        let translator: Arc<dyn Translator> = Arc::from(registry.build(&config.service)?);
        let vfont_regex = config.vfont_regex()?;
        let vchar_regex = config.vchar_regex()?;
        let pool = BasicThreadPool::new(config.resolved_threads());
        Ok(Self {
            config,
            fontmap,
            translator,
            pool,
            vfont_regex,
            vchar_regex,
        })
    }

    /// Runs one page through the full C1→C5 pipeline: classify glyphs into
    /// paragraphs and formula groups, dispatch paragraph templates through
    /// the translator, re-layout the translated strings into the original
    /// bounding boxes, and emit the final content stream.
    pub fn translate_page(
        &self,
        items: impl IntoIterator<Item = PageItem>,
        label_map: &LabelMap,
        page_width: f32,
    ) -> Vec<u8> {
        let classify_cfg = ClassifyConfig {
            vfont_regex: self.vfont_regex.as_ref(),
            vchar_regex: self.vchar_regex.as_ref(),
            page_width,
        };
        let segments = classify::classify_page(items, label_map, &classify_cfg);

        let templates: Vec<String> = segments.paragraphs.iter().map(|(_, p)| p.text_template.clone()).collect();
        let translated = dispatch::translate_all(&self.pool, Arc::clone(&self.translator), templates);

        let line_height = default_line_height(&self.config.lang_out);
        let mut ops = Vec::new();
        let mut warned_malformed_placeholder = false;
        for ((_, paragraph), translated) in segments.paragraphs.iter().zip(translated.iter()) {
            ops.extend(layout::layout_paragraph_inner(
                paragraph,
                translated,
                &segments.formulas,
                &segments.arena,
                &self.fontmap,
                line_height,
                &mut warned_malformed_placeholder,
            ));
        }

        emit::emit_page(&ops, &segments.page_lines, &self.fontmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Glyph;
    use crate::config::EngineConfig;
    use crate::geometry::Matrix;
    use crate::fontmap::{Encoding, FontMapEntry, UnicodeFallbackFont};
    use std::collections::HashMap;

    struct AsciiFont;
    impl FontMapEntry for AsciiFont {
        fn advance(&self, _ch: char, size: f32) -> f32 {
            0.5 * size
        }
        fn to_unichr(&self, code: u32) -> Option<char> {
            char::from_u32(code).filter(|c| c.is_ascii())
        }
        fn encoding(&self) -> Encoding {
            Encoding::SingleByte
        }
    }

    struct StubNoto;
    impl UnicodeFallbackFont for StubNoto {
        fn has_glyph(&self, code: u32) -> u32 {
            if code == 0 {
                0
            } else {
                code
            }
        }
        fn char_lengths(&self, _ch: char, size: f32) -> Vec<f32> {
            vec![0.6 * size]
        }
    }

    fn fontmap() -> FontMap {
        FontMap::new("tiro", Box::new(AsciiFont), "noto", Box::new(StubNoto))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            vfont: None,
            vchar: None,
            thread: 2,
            lang_in: "en".into(),
            lang_out: "en".into(),
            service: "identity".into(),
            prompt: None,
            envs: HashMap::new(),
            ignore_cache: false,
        }
    }

    #[test]
    fn empty_page_round_trips_to_bt_et() {
        let engine = Engine::new(config(), fontmap(), &TranslatorRegistry::new()).unwrap();
        let label_map = LabelMap::uniform(10, 10, 1);
        let out = engine.translate_page(std::iter::empty(), &label_map, 100.0);
        assert_eq!(String::from_utf8(out).unwrap(), "BT ET ");
    }

    #[test]
    fn single_paragraph_pass_through_with_identity_translator() {
        let engine = Engine::new(config(), fontmap(), &TranslatorRegistry::new()).unwrap();
        let label_map = LabelMap::uniform(200, 200, 1);
        let items = vec![
            PageItem::Glyph(glyph("A", 0.0, 5.0, 10.0, 20.0, 10.0)),
            PageItem::Glyph(glyph("B", 5.0, 10.0, 10.0, 20.0, 10.0)),
            PageItem::Glyph(glyph("C", 10.0, 15.0, 10.0, 20.0, 10.0)),
        ];
        let out = engine.translate_page(items, &label_map, 200.0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("BT "));
        assert!(text.contains("Tm"));
        assert!(text.contains("<414243>"));
    }

    fn glyph(text: &str, x0: f32, x1: f32, y0: f32, y1: f32, size: f32) -> Glyph {
        Glyph {
            cid: 0,
            unicode: text.to_string(),
            font_ref: "Helvetica".to_string(),
            font_size: size,
            x0,
            y0,
            x1,
            y1,
            advance: x1 - x0,
            matrix: Matrix::new(1.0, 0.0, 0.0, 1.0, x0, y0),
            height: y1 - y0,
            width: x1 - x0,
        }
    }
}
