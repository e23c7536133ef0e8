//! The content-stream emitter (C5, spec §4.5): turns resolved [`DrawOp`]s
//! and the page's global line list into the final `BT … ET` byte stream.

use crate::arena::Line;
use crate::fontmap::{Encoding, FontMap};
use crate::layout::DrawOp;

fn hex_encode(text: &str, font_name: &str, fontmap: &FontMap) -> String {
    if font_name == fontmap.noto_name {
        text.chars()
            .map(|c| format!("{:04x}", fontmap.noto().has_glyph(c as u32)))
            .collect()
    } else if let Some(entry) = fontmap.get(font_name) {
        match entry.encoding() {
            Encoding::Cid => text.chars().map(|c| format!("{:04x}", c as u32)).collect(),
            Encoding::SingleByte => text.chars().map(|c| format!("{:02x}", c as u32)).collect(),
        }
    } else {
        text.chars().map(|c| format!("{:02x}", c as u32)).collect()
    }
}

fn render_line(x: f32, y: f32, dx: f32, dy: f32, line_width: f32) -> String {
    format!("ET q 1 0 0 1 {x} {y} cm [] 0 d 0 J {line_width} w 0 0 m {dx} {dy} l S Q BT ")
}

fn render_op(op: &DrawOp, fontmap: &FontMap) -> String {
    match op {
        DrawOp::Text { font, size, x, y, text } => {
            let hex = hex_encode(text, font, fontmap);
            format!("/{font} {size} Tf 1 0 0 1 {x} {y} Tm [<{hex}>] TJ ")
        }
        DrawOp::VerticalText {
            font,
            size,
            x,
            y,
            text,
            direction,
        } => {
            let hex = hex_encode(text, font, fontmap);
            if *direction >= 0 {
                format!("/{font} {size} Tf 0 1 -1 0 {x} {y} Tm [<{hex}>] TJ ")
            } else {
                format!("/{font} {size} Tf 0 -1 1 0 {x} {y} Tm [<{hex}>] TJ ")
            }
        }
        DrawOp::Line { x, y, dx, dy, line_width } => render_line(*x, *y, *dx, *dy, *line_width),
    }
}

/// Emits a page's placement operators plus its global (non-formula) lines
/// into a single `BT … ET` byte stream. `page_lines` is filtered by
/// [`Line::is_kept`] the same way formula-group lines already were in C4.
pub fn emit_page(ops: &[DrawOp], page_lines: &[Line], fontmap: &FontMap) -> Vec<u8> {
    let mut out = String::from("BT ");
    for op in ops {
        out.push_str(&render_op(op, fontmap));
    }
    for line in page_lines {
        if !line.is_kept() {
            continue;
        }
        out.push_str(&render_line(
            line.p0.0,
            line.p0.1,
            line.p1.0 - line.p0.0,
            line.p1.1 - line.p0.1,
            line.line_width,
        ));
    }
    out.push_str("ET ");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fontmap::{FontMapEntry, UnicodeFallbackFont};

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
    fn empty_page_is_bt_et() {
        let bytes = emit_page(&[], &[], &fontmap());
        assert_eq!(String::from_utf8(bytes).unwrap(), "BT ET ");
    }

    #[test]
    fn text_op_contains_hex_and_tm() {
        let ops = vec![DrawOp::Text {
            font: "tiro".to_string(),
            size: 10.0,
            x: 0.0,
            y: 100.0,
            text: "AB".to_string(),
        }];
        let out = String::from_utf8(emit_page(&ops, &[], &fontmap())).unwrap();
        assert!(out.contains("Tm"));
        assert!(out.contains("TJ"));
        assert!(out.contains("<4142>")); // 'A'=0x41, 'B'=0x42, 2-hex single-byte encoding
    }

    #[test]
    fn noto_text_uses_four_hex_digits_via_has_glyph() {
        let ops = vec![DrawOp::Text {
            font: "noto".to_string(),
            size: 10.0,
            x: 0.0,
            y: 0.0,
            text: "\u{4e2d}".to_string(),
        }];
        let out = String::from_utf8(emit_page(&ops, &[], &fontmap())).unwrap();
        let expected = format!("<{:04x}>", '\u{4e2d}' as u32);
        assert!(out.contains(&expected));
    }

    #[test]
    fn wide_lines_are_filtered_narrow_lines_are_kept() {
        let lines = vec![
            Line { p0: (0.0, 0.0), p1: (10.0, 0.0), line_width: 6.0 },
            Line { p0: (0.0, 0.0), p1: (10.0, 0.0), line_width: 1.0 },
        ];
        let out = String::from_utf8(emit_page(&[], &lines, &fontmap())).unwrap();
        assert_eq!(out.matches(" l S Q").count(), 1);
    }
}
