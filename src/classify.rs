//! The glyph classifier (C1, spec §4.1) and the paragraph/formula
//! assembler bookkeeping that is its other half (C2, spec §4.2). These two
//! stay one state machine, the way `TextBlob::compute_runs`/`build_runs`
//! keep BiDi-level merging and script-run merging together in one pass.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::arena::{Glyph, GlyphArena, GlyphId, Line};
use crate::labelmap::LabelMap;
use crate::paragraph::{FormulaGroup, FormulaStore, Paragraph, ParagraphId, ParagraphStore, VerticalParagraph};

/// One item from the parser's page stream (spec §6, "Parser contract").
pub enum PageItem {
    Glyph(Glyph),
    Line(Line),
    Figure,
}

/// Text substituted for a glyph the font's encoding couldn't decode (spec
/// §7 "undecodable glyph"; format confirmed against
/// `examples/original_source/pdf2zh/converter.py`'s `vflag`, which tests
/// for a leading `"(cid:"` — the only way that test means anything is if
/// this is what an undecodable glyph's text actually looks like).
pub fn undecodable_placeholder(cid: u32) -> String {
    format!("(cid:{cid})")
}

/// A glyph jump in `x0` beyond this, inside the vertical-glyph buffer,
/// flushes the buffer before continuing (spec §4.1 item 1).
const VERTICAL_X_THRESHOLD: f32 = 2.0;

/// Sub/superscript size ratio (spec §4.1 item 3; flagged in spec §9 as a
/// heuristic, not a derived typographic constant — kept configurable here
/// only in the sense that it's a named constant, not hardcoded inline).
const SUBSCRIPT_SIZE_RATIO: f32 = 0.79;

static BUILTIN_FORMULA_FAMILY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(CM[^R]|MS.M|XY|MT|BL|RM|EU|LA|RS|LINE|LCIRCLE|TeX-|rsfs|txsy|wasy|stmary|.*Mono|.*Code|.*Ital|.*Sym|.*Math)")
        .expect("static regex is valid")
});

/// Strips a leading `PREFIX+` font-subsetting tag, keeping the trailing
/// segment (spec §4.1 item 4; confirmed against
/// `examples/original_source/pdf2zh/converter.py`'s `font.split("+")[-1]`).
fn strip_subset_prefix(fontname: &str) -> &str {
    fontname.rsplit('+').next().unwrap_or(fontname)
}

fn is_formula_category(c: char) -> bool {
    use unicode_general_category::{get_general_category, GeneralCategory as GC};
    matches!(
        get_general_category(c),
        GC::ModifierLetter
            | GC::NonspacingMark
            | GC::ModifierSymbol
            | GC::MathSymbol
            | GC::LineSeparator
            | GC::ParagraphSeparator
            | GC::SpaceSeparator
    ) || (0x370..0x400).contains(&(c as u32))
}

/// `vflag(fontname, text)` from spec §4.1 item 4: does this glyph's font or
/// character identify it as formula/mathematical typography?
fn vflag(fontname: &str, text: &str, vfont_regex: Option<&Regex>, vchar_regex: Option<&Regex>) -> bool {
    if text.starts_with("(cid:") {
        return true;
    }
    let stripped = strip_subset_prefix(fontname);
    let font_is_formula = match vfont_regex {
        Some(re) => re.is_match(stripped),
        None => BUILTIN_FORMULA_FAMILY.is_match(stripped),
    };
    if font_is_formula {
        return true;
    }
    match vchar_regex {
        Some(re) => re.is_match(text),
        None => {
            if text.is_empty() || text == " " {
                false
            } else {
                text.chars().next().map(is_formula_category).unwrap_or(false)
            }
        }
    }
}

/// Per-glyph snapshot of the previously processed glyph ("xt" in the
/// original), used for gap/wrap/right-neighbour comparisons.
#[derive(Debug, Clone, Copy)]
struct LastGlyph {
    x0: f32,
    y0: f32,
    x1: f32,
}

/// Everything the classifier/assembler produces for one page.
pub struct PageSegments {
    pub arena: GlyphArena,
    pub paragraphs: ParagraphStore,
    pub formulas: FormulaStore,
    /// Lines not attached to any formula group, in source order.
    pub page_lines: Vec<Line>,
}

/// Configuration the classifier needs beyond the label map.
pub struct ClassifyConfig<'a> {
    pub vfont_regex: Option<&'a Regex>,
    pub vchar_regex: Option<&'a Regex>,
    /// Page width, used to derive `vmax = page_width / 4` (spec §4.1).
    pub page_width: f32,
}

struct Classifier<'a> {
    label_map: &'a LabelMap,
    vfont_regex: Option<&'a Regex>,
    vchar_regex: Option<&'a Regex>,
    vmax: f32,

    arena: GlyphArena,
    paragraphs: ParagraphStore,
    formulas: FormulaStore,
    page_lines: Vec<Line>,

    last_glyph: Option<LastGlyph>,
    last_class: i32,
    bracket_depth: i32,
    vstk: Vec<GlyphId>,
    vlstk: Vec<Line>,
    vfix: f32,
    current_paragraph: Option<ParagraphId>,
    vertical_buffer: Vec<GlyphId>,
}

impl<'a> Classifier<'a> {
    fn new(label_map: &'a LabelMap, cfg: &ClassifyConfig<'a>) -> Self {
        Self {
            label_map,
            vfont_regex: cfg.vfont_regex,
            vchar_regex: cfg.vchar_regex,
            vmax: cfg.page_width / 4.0,
            arena: GlyphArena::new(),
            paragraphs: ParagraphStore::new(),
            formulas: FormulaStore::new(),
            page_lines: Vec::new(),
            last_glyph: None,
            last_class: -1,
            bracket_depth: 0,
            vstk: Vec::new(),
            vlstk: Vec::new(),
            vfix: 0.0,
            current_paragraph: None,
            vertical_buffer: Vec::new(),
        }
    }

    fn run(mut self, items: impl IntoIterator<Item = PageItem>) -> PageSegments {
        for item in items {
            match item {
                PageItem::Glyph(glyph) => self.handle_glyph(glyph),
                PageItem::Line(line) => {
                    self.flush_vertical();
                    self.handle_line(line);
                }
                PageItem::Figure => {
                    self.flush_vertical();
                }
            }
        }
        self.flush_vertical();
        self.close_formula_at_end_of_page();

        PageSegments {
            arena: self.arena,
            paragraphs: self.paragraphs,
            formulas: self.formulas,
            page_lines: self.page_lines,
        }
    }

    fn handle_glyph(&mut self, glyph: Glyph) {
        let is_vertical = glyph.matrix.is_vertical();
        let x0 = glyph.x0;
        let gid = self.arena.insert(glyph);

        if is_vertical {
            if let Some(&last) = self.vertical_buffer.last() {
                if (x0 - self.arena.get(last).x0).abs() > VERTICAL_X_THRESHOLD {
                    self.flush_vertical();
                }
            }
            self.vertical_buffer.push(gid);
            return;
        }

        self.flush_vertical();
        self.classify_and_place(gid);
    }

    fn classify_and_place(&mut self, gid: GlyphId) {
        let g = self.arena.get(gid).clone();
        let raw_cls = self.label_map.class_at(g.x0, g.y0);
        let is_bullet = g.unicode == "\u{2022}";
        let non_body = !is_bullet && raw_cls == 0;

        let mut cur_v = non_body;
        if !cur_v && raw_cls == self.last_class {
            if let Some(cp_id) = self.current_paragraph {
                let cp = self.paragraphs.get(cp_id);
                if cp.text_template.trim().chars().count() > 1 && g.font_size < cp.size * SUBSCRIPT_SIZE_RATIO {
                    cur_v = true;
                }
            }
        }
        if !cur_v && vflag(&g.font_ref, &g.unicode, self.vfont_regex, self.vchar_regex) {
            cur_v = true;
        }
        if !cur_v {
            if !self.vstk.is_empty() && g.unicode == "(" {
                cur_v = true;
                self.bracket_depth += 1;
            }
            if self.bracket_depth > 0 && g.unicode == ")" {
                cur_v = true;
                self.bracket_depth -= 1;
            }
        }

        let should_close = !cur_v
            || raw_cls != self.last_class
            || {
                let cp = self.paragraphs.get(
                    self.current_paragraph
                        .expect("a paragraph must exist once raw_cls can equal last_class"),
                );
                !cp.text_template.is_empty()
                    && (g.x0 - self.last_glyph.expect("paired with current_paragraph").x0).abs() > self.vmax
            };

        if should_close && !self.vstk.is_empty() {
            self.close_formula(raw_cls, cur_v, &g);
        }

        if self.vstk.is_empty() {
            if raw_cls == self.last_class {
                let cp_id = self.current_paragraph.expect("continuing paragraph must exist");
                let last = self.last_glyph.expect("paired with current_paragraph");
                if g.x0 > last.x1 + 1.0 {
                    self.paragraphs.get_mut(cp_id).text_template.push(' ');
                } else if g.x1 < last.x0 {
                    let p = self.paragraphs.get_mut(cp_id);
                    p.text_template.push(' ');
                    p.brk = true;
                }
            } else {
                let para = Paragraph::from_first_glyph(g.x0, g.y0, g.y1, g.font_size);
                let pid = self.paragraphs.push(para);
                log::trace!("new paragraph {pid:?} opened at ({}, {}), class {raw_cls}", g.x0, g.y0);
                self.current_paragraph = Some(pid);
            }
        }

        let cp_id = self.current_paragraph.expect("paragraph exists by this point");
        if !cur_v {
            let trimmed_len = self.paragraphs.get(cp_id).text_template.trim().chars().count();
            let cp = self.paragraphs.get_mut(cp_id);
            if (g.font_size > cp.size || trimmed_len == 1) && g.unicode != " " {
                cp.anchor.1 -= g.font_size - cp.size;
                cp.size = g.font_size;
            }
            cp.text_template.push_str(&g.unicode);
            cp.glyphs.push(gid);
        } else {
            if self.vstk.is_empty() && raw_cls == self.last_class {
                if let Some(last) = self.last_glyph {
                    if g.x0 > last.x0 {
                        self.vfix = g.y0 - last.y0;
                    }
                }
            }
            self.vstk.push(gid);
        }

        self.paragraphs.get_mut(cp_id).expand_bbox(g.x0, g.y0, g.x1, g.y1);
        self.last_glyph = Some(LastGlyph {
            x0: g.x0,
            y0: g.y0,
            x1: g.x1,
        });
        self.last_class = raw_cls;
    }

    /// Closes the in-progress formula, recording it into `self.formulas`
    /// and appending its `{vN}` placeholder to the current paragraph
    /// (spec §4.1 "Closing a formula", §4.2 `y_fix` on exit).
    fn close_formula(&mut self, raw_cls: i32, cur_v: bool, entering_glyph: &Glyph) {
        if !cur_v && raw_cls == self.last_class {
            let max_x0 = self
                .vstk
                .iter()
                .map(|id| self.arena.get(*id).x0)
                .fold(f32::MIN, f32::max);
            if entering_glyph.x0 > max_x0 {
                self.vfix = self.arena.get(self.vstk[0]).y0 - entering_glyph.y0;
            }
        }

        let cp_id = self
            .current_paragraph
            .expect("a formula can only be open inside a paragraph");
        if self.paragraphs.get(cp_id).text_template.is_empty() {
            self.last_class = -1;
        }
        let n = self.formulas.len();
        self.paragraphs
            .get_mut(cp_id)
            .text_template
            .push_str(&format!("{{v{n}}}"));
        let group = FormulaGroup {
            glyphs: std::mem::take(&mut self.vstk),
            lines: std::mem::take(&mut self.vlstk),
            y_fix: self.vfix,
        };
        let fid = self.formulas.push(group);
        log::trace!("closed formula {fid:?} in paragraph {cp_id:?}, y_fix={}", self.vfix);
        self.paragraphs.get_mut(cp_id).formulas.push(fid);
        self.vfix = 0.0;
    }

    fn close_formula_at_end_of_page(&mut self) {
        if self.vstk.is_empty() {
            return;
        }
        let cp_id = self
            .current_paragraph
            .expect("a formula can only be open inside a paragraph");
        let n = self.formulas.len();
        self.paragraphs
            .get_mut(cp_id)
            .text_template
            .push_str(&format!("{{v{n}}}"));
        let group = FormulaGroup {
            glyphs: std::mem::take(&mut self.vstk),
            lines: std::mem::take(&mut self.vlstk),
            y_fix: self.vfix,
        };
        let fid = self.formulas.push(group);
        self.paragraphs.get_mut(cp_id).formulas.push(fid);
    }

    fn handle_line(&mut self, line: Line) {
        let x0 = line.p0.0.min(line.p1.0);
        let y0 = line.p0.1.min(line.p1.1);
        let raw_cls = self.label_map.class_at(x0, y0);
        if !self.vstk.is_empty() && raw_cls == self.last_class {
            self.vlstk.push(line);
        } else {
            self.page_lines.push(line);
        }
    }

    fn flush_vertical(&mut self) {
        if self.vertical_buffer.is_empty() {
            return;
        }
        let mut sorted = self.vertical_buffer.clone();
        sorted.sort_by(|&a, &b| {
            let ga = self.arena.get(a);
            let gb = self.arena.get(b);
            (-ga.y0)
                .partial_cmp(&-gb.y0)
                .unwrap()
                .then(ga.x0.partial_cmp(&gb.x0).unwrap())
        });

        // Matrix direction is read from the buffer in original insertion
        // order, not the `(-y0, x0)` sort below (converter.py reads
        // `vertical_chars[0]`, before its own sort).
        let first = self.arena.get(self.vertical_buffer[0]);
        let mut matrix_dir = first.matrix.component(1);
        if matrix_dir.abs() < 1e-6 {
            matrix_dir = first.matrix.component(2);
        }

        let (text_chars, direction): (Vec<GlyphId>, i8) = if matrix_dir > 0.0 {
            (sorted.into_iter().rev().collect(), 1)
        } else {
            (sorted, -1)
        };

        let text: String = text_chars.iter().map(|id| self.arena.get(*id).unicode.as_str()).collect();
        if text.trim().is_empty() {
            self.vertical_buffer.clear();
            return;
        }

        let (mut x0, mut x1, mut y0, mut y1, mut size) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN, f32::MIN);
        for &id in &self.vertical_buffer {
            let g = self.arena.get(id);
            x0 = x0.min(g.x0);
            x1 = x1.max(g.x1);
            y0 = y0.min(g.y0);
            y1 = y1.max(g.y1);
            size = size.max(g.font_size);
        }

        let positions: Vec<(f32, f32)> = text_chars.iter().map(|id| {
            let g = self.arena.get(*id);
            (g.x0, g.y0)
        }).collect();

        let spacing = if text_chars.len() > 1 {
            let mut diffs: Vec<f32> = text_chars
                .windows(2)
                .map(|w| (self.arena.get(w[1]).y0 - self.arena.get(w[0]).y0).abs())
                .collect();
            median(&mut diffs)
        } else {
            self.arena.get(text_chars[0]).height
        };

        let anchor_glyph = self.arena.get(text_chars[0]);
        let mut para = Paragraph::from_first_glyph(anchor_glyph.x0, anchor_glyph.y0, y1, size);
        para.x0 = x0;
        para.x1 = x1;
        para.y0 = y0;
        para.y1 = y1;
        para.text_template = text.trim().to_string();
        para.glyphs = text_chars.clone();
        para.vertical = Some(VerticalParagraph {
            direction,
            positions,
            spacing,
        });

        self.paragraphs.push(para);
        self.vertical_buffer.clear();
    }
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Runs the classifier/assembler over one page's item stream.
pub fn classify_page(
    items: impl IntoIterator<Item = PageItem>,
    label_map: &LabelMap,
    cfg: &ClassifyConfig,
) -> PageSegments {
    Classifier::new(label_map, cfg).run(items)
}
