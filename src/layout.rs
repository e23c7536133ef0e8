//! The re-layout engine (C4, spec §4.4): turns a translated paragraph
//! string back into placement operators inside the paragraph's original
//! bounding box.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_general_category::{get_general_category, GeneralCategory as GC};

use crate::arena::GlyphArena;
use crate::fontmap::{FontChoice, FontMap};
use crate::paragraph::{FormulaId, FormulaStore, Paragraph};

/// A fully resolved placement operator, ready for [`crate::emit`].
#[derive(Debug, Clone)]
pub enum DrawOp {
    Text {
        font: String,
        size: f32,
        x: f32,
        y: f32,
        text: String,
    },
    VerticalText {
        font: String,
        size: f32,
        x: f32,
        y: f32,
        text: String,
        direction: i8,
    },
    Line {
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
        line_width: f32,
    },
}

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*v([\d\s]+)\}").expect("static regex is valid"));

enum Token {
    Placeholder(usize),
    Char(char),
}

/// Splits a translated string into characters and `{vN}` placeholders,
/// tolerating whitespace inside the digit run (spec §4.4).
fn tokenize(s: &str) -> Vec<Token> {
    let mut matches: Vec<(usize, usize, usize)> = PLACEHOLDER_RE
        .captures_iter(s)
        .map(|c| {
            let m = c.get(0).expect("whole match always present");
            let digits: String = c[1].chars().filter(|ch| !ch.is_whitespace()).collect();
            let n = digits.parse::<usize>().unwrap_or(usize::MAX);
            (m.start(), m.end(), n)
        })
        .collect();
    matches.sort_by_key(|m| m.0);

    let char_indices: Vec<(usize, char)> = s.char_indices().collect();
    let mut tokens = Vec::new();
    let mut ci = 0;
    let mut mi = 0;
    while ci < char_indices.len() {
        let (byte_pos, ch) = char_indices[ci];
        if mi < matches.len() && matches[mi].0 == byte_pos {
            tokens.push(Token::Placeholder(matches[mi].2));
            let end = matches[mi].1;
            while ci < char_indices.len() && char_indices[ci].0 < end {
                ci += 1;
            }
            mi += 1;
            continue;
        }
        tokens.push(Token::Char(ch));
        ci += 1;
    }
    tokens
}

fn resolved_font_name(choice: FontChoice<'_>, fontmap: &FontMap) -> String {
    match choice {
        FontChoice::Entry(name) => name.to_string(),
        FontChoice::Noto => fontmap.noto_name.clone(),
    }
}

fn char_advance(choice: FontChoice<'_>, ch: char, size: f32, fontmap: &FontMap) -> f32 {
    match choice {
        FontChoice::Entry(_) => fontmap.tiro().advance(ch, size),
        FontChoice::Noto => fontmap
            .noto()
            .char_lengths(ch, size)
            .first()
            .copied()
            .unwrap_or(0.0),
    }
}

/// Is `ch` a combining modifier (Lm/Mn/Sk) — spec §4.4's rule for
/// subtracting a formula's trailing modifier width from its advance.
fn is_combining_modifier(ch: char) -> bool {
    matches!(
        get_general_category(ch),
        GC::ModifierLetter | GC::NonspacingMark | GC::ModifierSymbol
    )
}

/// Intermediate text/line op queued during the horizontal walk, carrying
/// its line index and pre-shrink vertical offset; resolved to a final `y`
/// only once the paragraph's line-height is known.
enum Queued {
    Text {
        lidx: u32,
        font: String,
        size: f32,
        x: f32,
        dy: f32,
        text: String,
    },
    Line {
        lidx: u32,
        x: f32,
        dy: f32,
        dx: f32,
        dy_len: f32,
        line_width: f32,
    },
}

fn resolve_line_height(default_line_height: f32, max_lidx: u32, size: f32, paragraph_height: f32) -> f32 {
    let mut line_height = default_line_height;
    while (max_lidx as f32 + 1.0) * size * line_height > paragraph_height && line_height >= 1.0 {
        line_height -= 0.05;
    }
    line_height
}

/// Re-emits `translated` into placement operators inside `paragraph`'s
/// original bounding box, picking fonts, wrapping, and shrinking line
/// height as needed.
pub fn layout_paragraph(
    paragraph: &Paragraph,
    translated: &str,
    formulas: &FormulaStore,
    arena: &GlyphArena,
    fontmap: &FontMap,
    default_line_height: f32,
) -> Vec<DrawOp> {
    layout_paragraph_inner(paragraph, translated, formulas, arena, fontmap, default_line_height, &mut false)
}

/// As [`layout_paragraph`], but takes the page-level "already warned about a
/// malformed placeholder" flag so the engine logs that condition once per
/// page rather than once per occurrence (spec §7, §9 "Malformed placeholder
/// from backend").
pub fn layout_paragraph_inner(
    paragraph: &Paragraph,
    translated: &str,
    formulas: &FormulaStore,
    arena: &GlyphArena,
    fontmap: &FontMap,
    default_line_height: f32,
    warned_malformed_placeholder: &mut bool,
) -> Vec<DrawOp> {
    if paragraph.is_vertical() {
        return layout_vertical(paragraph, translated, fontmap);
    }

    let anchor_y = paragraph.anchor.1;
    let mut x = paragraph.anchor.0;
    let mut lidx: u32 = 0;
    let mut tx = x;
    let mut cstk = String::new();
    let mut fcur: Option<String> = None;
    let mut fcur_size: f32 = paragraph.size;
    let mut queued: Vec<Queued> = Vec::new();

    let flush = |cstk: &mut String, queued: &mut Vec<Queued>, tx: f32, lidx: u32, fcur: &Option<String>, size: f32| {
        if !cstk.is_empty() {
            queued.push(Queued::Text {
                lidx,
                font: fcur.clone().unwrap_or_else(|| fontmap.tiro_name.clone()),
                size,
                x: tx,
                dy: 0.0,
                text: std::mem::take(cstk),
            });
        }
    };

    for token in tokenize(translated) {
        match token {
            Token::Placeholder(n) => {
                let group = match formulas_get(formulas, n) {
                    Some(g) => g,
                    None => {
                        // malformed placeholder index: skip silently (spec §7), but
                        // warn once per page so a misbehaving backend is visible.
                        if !*warned_malformed_placeholder {
                            log::warn!("paragraph references missing formula group {{v{n}}}; dropping placeholder");
                            *warned_malformed_placeholder = true;
                        }
                        continue;
                    }
                };
                if group.glyphs.is_empty() {
                    continue;
                }
                let adv_raw = group.width(arena);
                let last_glyph = arena.get(*group.glyphs.last().unwrap());
                let modifier = if last_glyph
                    .unicode
                    .chars()
                    .next()
                    .map(is_combining_modifier)
                    .unwrap_or(false)
                {
                    last_glyph.width
                } else {
                    0.0
                };

                // A placeholder always forces a flush.
                flush(&mut cstk, &mut queued, tx, lidx, &fcur, fcur_size);
                let overrun = x + adv_raw > paragraph.x1 + 0.1 * paragraph.size;
                if overrun && paragraph.brk {
                    x = paragraph.x0;
                    lidx += 1;
                }

                let origin = arena.get(group.glyphs[0]);
                let origin_x0 = origin.x0;
                let origin_y0 = origin.y0;
                for &gid in &group.glyphs {
                    let g = arena.get(gid);
                    // Re-emit by CID, not decoded text (spec §3, §4.5): the
                    // original re-encodes `chr(vch.cid)`, so an undecodable or
                    // subsetted formula glyph still round-trips to its own
                    // glyph index rather than whatever `unicode` decoded to.
                    let text = char::from_u32(g.cid).map(String::from).unwrap_or_default();
                    queued.push(Queued::Text {
                        lidx,
                        font: g.font_ref.clone(),
                        size: g.font_size,
                        x: x + (g.x0 - origin_x0),
                        dy: group.y_fix + (g.y0 - origin_y0),
                        text,
                    });
                }
                for line in &group.lines {
                    if !line.is_kept() {
                        continue;
                    }
                    queued.push(Queued::Line {
                        lidx,
                        x: x + (line.p0.0 - origin_x0),
                        dy: group.y_fix + (line.p0.1 - origin_y0),
                        dx: line.p1.0 - line.p0.0,
                        dy_len: line.p1.1 - line.p0.1,
                        line_width: line.line_width,
                    });
                }

                fcur = None;
                let adv = adv_raw - modifier;
                x += adv;
            }
            Token::Char(ch) => {
                let choice = fontmap.select_for_char(ch);
                let font_name = resolved_font_name(choice, fontmap);
                let adv = char_advance(choice, ch, paragraph.size, fontmap);

                let font_changed = fcur.as_deref() != Some(font_name.as_str());
                let overrun = x + adv > paragraph.x1 + 0.1 * paragraph.size;
                let should_flush = font_changed || overrun;
                if should_flush {
                    flush(&mut cstk, &mut queued, tx, lidx, &fcur, fcur_size);
                }
                if overrun && paragraph.brk {
                    x = paragraph.x0;
                    lidx += 1;
                }

                if cstk.is_empty() {
                    tx = x;
                }
                let dropped_leading_space = x == paragraph.x0 && ch == ' ';
                if dropped_leading_space {
                    // drop the leading space left by a forced line wrap; the
                    // cursor does not advance for it either (converter.py).
                } else {
                    cstk.push(ch);
                }

                fcur = Some(font_name);
                fcur_size = paragraph.size;
                x += if dropped_leading_space { 0.0 } else { adv };
            }
        }
    }
    flush(&mut cstk, &mut queued, tx, lidx, &fcur, fcur_size);

    let max_lidx = queued.iter().map(queued_lidx).max().unwrap_or(0);
    let line_height = resolve_line_height(default_line_height, max_lidx, paragraph.size, paragraph.height());

    queued
        .into_iter()
        .map(|q| resolve_queued(q, anchor_y, paragraph.size, line_height))
        .collect()
}

fn queued_lidx(q: &Queued) -> u32 {
    match q {
        Queued::Text { lidx, .. } => *lidx,
        Queued::Line { lidx, .. } => *lidx,
    }
}

fn resolve_queued(q: Queued, anchor_y: f32, paragraph_size: f32, line_height: f32) -> DrawOp {
    match q {
        Queued::Text { lidx, font, size, x, dy, text } => DrawOp::Text {
            font,
            size,
            x,
            y: anchor_y + dy - lidx as f32 * paragraph_size * line_height,
            text,
        },
        Queued::Line { lidx, x, dy, dx, dy_len, line_width } => DrawOp::Line {
            x,
            y: anchor_y + dy - lidx as f32 * paragraph_size * line_height,
            dx,
            dy: dy_len,
            line_width,
        },
    }
}

fn formulas_get(formulas: &FormulaStore, n: usize) -> Option<&crate::paragraph::FormulaGroup> {
    if n < formulas.len() {
        Some(formulas.get(FormulaId(n)))
    } else {
        None
    }
}

fn layout_vertical(paragraph: &Paragraph, translated: &str, fontmap: &FontMap) -> Vec<DrawOp> {
    let vp = paragraph
        .vertical
        .as_ref()
        .expect("layout_vertical only called for vertical paragraphs");
    let mut ops = Vec::new();
    let mut pos_idx = 0usize;
    let mut last_anchor = paragraph.anchor;

    for token in tokenize(translated) {
        let ch = match token {
            Token::Placeholder(_) => continue, // vertical formulae are out of scope; dropped
            Token::Char(ch) => ch,
        };
        if ch == '\n' {
            continue;
        }

        let (x, y) = if pos_idx < vp.positions.len() {
            let p = vp.positions[pos_idx];
            pos_idx += 1;
            p
        } else {
            (last_anchor.0, last_anchor.1 + vp.direction as f32 * vp.spacing)
        };
        last_anchor = (x, y);

        let choice = fontmap.select_for_char(ch);
        let font = resolved_font_name(choice, fontmap);
        ops.push(DrawOp::VerticalText {
            font,
            size: paragraph.size,
            x,
            y,
            text: ch.to_string(),
            direction: vp.direction,
        });
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Glyph, GlyphArena};
    use crate::fontmap::{Encoding, FontMapEntry, UnicodeFallbackFont};
    use crate::geometry::Matrix;
    use crate::paragraph::{FormulaGroup, FormulaStore, Paragraph, VerticalParagraph};

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

    #[test]
    fn plain_paragraph_emits_single_text_run() {
        let mut para = Paragraph::from_first_glyph(0.0, 100.0, 110.0, 10.0);
        para.x0 = 0.0;
        para.x1 = 1000.0;
        para.y0 = 100.0;
        para.y1 = 110.0;
        let formulas = FormulaStore::new();
        let arena = GlyphArena::new();
        let ops = layout_paragraph(&para, "ABC", &formulas, &arena, &fontmap(), 1.2);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            DrawOp::Text { text, x, y, .. } => {
                assert_eq!(text, "ABC");
                assert_eq!(*x, 0.0);
                assert_eq!(*y, 100.0);
            }
            _ => panic!("expected a Text op"),
        }
    }

    #[test]
    fn placeholder_splices_formula_glyphs_between_text_runs() {
        let mut para = Paragraph::from_first_glyph(0.0, 100.0, 110.0, 10.0);
        para.x0 = 0.0;
        para.x1 = 1000.0;
        para.y0 = 100.0;
        para.y1 = 110.0;
        para.formulas.push(FormulaId(0));

        let mut arena = GlyphArena::new();
        let g1 = arena.insert(glyph("\u{3b1}", 20.0, 25.0, 100.0, 110.0, 10.0, "CMMI10"));
        let g2 = arena.insert(glyph("\u{3b2}", 25.0, 30.0, 100.0, 110.0, 10.0, "CMMI10"));
        let mut formulas = FormulaStore::new();
        formulas.push(FormulaGroup {
            glyphs: vec![g1, g2],
            lines: vec![],
            y_fix: 2.0,
        });

        let ops = layout_paragraph(&para, "x {v0} y", &formulas, &arena, &fontmap(), 1.2);
        let texts: Vec<&str> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["x ", "\u{3b1}", "\u{3b2}", " y"]);
    }

    fn glyph(text: &str, x0: f32, x1: f32, y0: f32, y1: f32, size: f32, font: &str) -> Glyph {
        Glyph {
            cid: text.chars().next().map(|c| c as u32).unwrap_or(0),
            unicode: text.to_string(),
            font_ref: font.to_string(),
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

    #[test]
    fn vertical_paragraph_uses_captured_positions_in_order() {
        let mut para = Paragraph::from_first_glyph(10.0, 50.0, 60.0, 10.0);
        para.x0 = 10.0;
        para.x1 = 20.0;
        para.y0 = 30.0;
        para.y1 = 60.0;
        para.vertical = Some(VerticalParagraph {
            direction: -1,
            positions: vec![(10.0, 50.0), (10.0, 40.0), (10.0, 30.0)],
            spacing: 10.0,
        });

        let formulas = FormulaStore::new();
        let arena = GlyphArena::new();
        let ops = layout_paragraph(&para, "\u{4e00}\u{4e8c}\u{4e09}", &formulas, &arena, &fontmap(), 1.2);
        assert_eq!(ops.len(), 3);
        for (op, expected) in ops.iter().zip(&[(10.0, 50.0), (10.0, 40.0), (10.0, 30.0)]) {
            match op {
                DrawOp::VerticalText { x, y, direction, .. } => {
                    assert_eq!((*x, *y), *expected);
                    assert_eq!(*direction, -1);
                }
                _ => panic!("expected vertical text op"),
            }
        }
    }

    #[test]
    fn line_height_shrinks_until_it_fits() {
        let lh = resolve_line_height(1.4, 1, 10.0, 25.0);
        assert!(lh < 1.4);
        assert!((2.0f32) * 10.0 * lh <= 25.0 + 1e-3);
    }
}
