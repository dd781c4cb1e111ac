//! Minimal PDF writer for the fixed bulletin layout.
//!
//! Emits PDF 1.4 with the built-in Helvetica Type1 fonts and
//! WinAnsi-encoded text. Only the operators the bulletin needs are
//! exposed: text runs, filled/stroked rectangles, and line segments.
//! Output is fully deterministic for identical input.

/// A4 portrait in points.
pub const PAGE_WIDTH: f64 = 595.28;
pub const PAGE_HEIGHT: f64 = 841.89;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Helvetica,
    HelveticaBold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Helvetica => "F1",
            Font::HelveticaBold => "F2",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Font::Helvetica => "Helvetica",
            Font::HelveticaBold => "Helvetica-Bold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Color {
        Color {
            r: r as f64 / 255.0,
            g: g as f64 / 255.0,
            b: b as f64 / 255.0,
        }
    }
}

/// Approximate advance width of a string in points. Helvetica metrics
/// are bucketed by glyph class; good enough to center and right-align
/// labels in a fixed layout.
pub fn text_width(s: &str, font: Font, size: f64) -> f64 {
    let bold_bump = match font {
        Font::Helvetica => 0.0,
        Font::HelveticaBold => 0.03,
    };
    let mut em = 0.0_f64;
    for c in s.chars() {
        let w = match c {
            'i' | 'j' | 'l' | '\'' | '|' | '.' | ',' | ':' | ';' | '!' => 0.28,
            'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '-' | ' ' | '/' => 0.35,
            'm' | 'w' | 'M' | 'W' | '@' => 0.89,
            'A'..='Z' | '%' => 0.70,
            '0'..='9' => 0.556,
            _ => 0.52,
        };
        em += w + bold_bump;
    }
    em * size
}

#[derive(Default)]
pub struct Page {
    ops: Vec<u8>,
}

impl Page {
    fn op(&mut self, s: &str) {
        self.ops.extend_from_slice(s.as_bytes());
        self.ops.push(b'\n');
    }

    /// Place a single-line text run with its baseline at (x, y).
    pub fn text(&mut self, x: f64, y: f64, font: Font, size: f64, color: Color, s: &str) {
        self.op(&format!("{:.3} {:.3} {:.3} rg", color.r, color.g, color.b));
        self.op("BT");
        self.op(&format!("/{} {:.2} Tf", font.resource_name(), size));
        self.op(&format!("{:.2} {:.2} Td", x, y));
        self.ops.push(b'(');
        self.ops.extend_from_slice(&encode_win_ansi(s));
        self.ops.extend_from_slice(b") Tj\n");
        self.op("ET");
    }

    pub fn text_centered(
        &mut self,
        center_x: f64,
        y: f64,
        font: Font,
        size: f64,
        color: Color,
        s: &str,
    ) {
        let x = center_x - text_width(s, font, size) / 2.0;
        self.text(x, y, font, size, color, s);
    }

    pub fn text_right(&mut self, right_x: f64, y: f64, font: Font, size: f64, color: Color, s: &str) {
        let x = right_x - text_width(s, font, size);
        self.text(x, y, font, size, color, s);
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) {
        self.op(&format!("{:.3} {:.3} {:.3} rg", color.r, color.g, color.b));
        self.op(&format!("{:.2} {:.2} {:.2} {:.2} re f", x, y, w, h));
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color, line_width: f64) {
        self.op(&format!("{:.3} {:.3} {:.3} RG", color.r, color.g, color.b));
        self.op(&format!("{:.2} w", line_width));
        self.op(&format!("{:.2} {:.2} {:.2} {:.2} re S", x, y, w, h));
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: Color, line_width: f64) {
        self.op(&format!("{:.3} {:.3} {:.3} RG", color.r, color.g, color.b));
        self.op(&format!("{:.2} w", line_width));
        self.op(&format!("{:.2} {:.2} m {:.2} {:.2} l S", x1, y1, x2, y2));
    }
}

#[derive(Default)]
pub struct Document {
    pages: Vec<Page>,
}

impl Document {
    pub fn new() -> Document {
        Document::default()
    }

    pub fn new_page(&mut self) -> &mut Page {
        self.pages.push(Page::default());
        self.pages.last_mut().unwrap()
    }

    /// The page currently being written; opens the first page if none
    /// exists yet.
    pub fn current_page(&mut self) -> &mut Page {
        if self.pages.is_empty() {
            self.pages.push(Page::default());
        }
        self.pages.last_mut().unwrap()
    }

    #[allow(dead_code)]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serialize the document: header, body objects, xref, trailer.
    pub fn finish(self) -> Vec<u8> {
        // Object layout: 1 catalog, 2 page tree, 3/4 fonts, then an
        // alternating (page, content) pair per page.
        let page_count = self.pages.len().max(1);
        let pages = if self.pages.is_empty() {
            vec![Page::default()]
        } else {
            self.pages
        };

        let object_count = 4 + 2 * page_count;
        let mut out: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = Vec::with_capacity(object_count);

        out.extend_from_slice(b"%PDF-1.4\n");

        let begin_obj = |out: &mut Vec<u8>, offsets: &mut Vec<usize>, num: usize| {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
        };
        let end_obj = |out: &mut Vec<u8>| out.extend_from_slice(b"endobj\n");

        begin_obj(&mut out, &mut offsets, 1);
        out.extend_from_slice(b"<< /Type /Catalog /Pages 2 0 R >>\n");
        end_obj(&mut out);

        let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 5 + 2 * i)).collect();
        begin_obj(&mut out, &mut offsets, 2);
        out.extend_from_slice(
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>\n",
                kids.join(" "),
                page_count
            )
            .as_bytes(),
        );
        end_obj(&mut out);

        for (num, font) in [(3, Font::Helvetica), (4, Font::HelveticaBold)] {
            begin_obj(&mut out, &mut offsets, num);
            out.extend_from_slice(
                format!(
                    "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>\n",
                    font.base_font()
                )
                .as_bytes(),
            );
            end_obj(&mut out);
        }

        for (i, page) in pages.into_iter().enumerate() {
            let page_num = 5 + 2 * i;
            let content_num = page_num + 1;

            begin_obj(&mut out, &mut offsets, page_num);
            out.extend_from_slice(
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
                     /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>\n",
                    PAGE_WIDTH, PAGE_HEIGHT, content_num
                )
                .as_bytes(),
            );
            end_obj(&mut out);

            begin_obj(&mut out, &mut offsets, content_num);
            out.extend_from_slice(format!("<< /Length {} >>\nstream\n", page.ops.len()).as_bytes());
            out.extend_from_slice(&page.ops);
            out.extend_from_slice(b"endstream\nendobj\n");
        }

        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", object_count + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for off in &offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                object_count + 1,
                xref_offset
            )
            .as_bytes(),
        );

        out
    }
}

/// WinAnsi (cp1252) encoding with string-literal escaping. Characters
/// outside the encodable range degrade to '?'.
fn encode_win_ansi(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let byte = match c {
            '\\' => {
                out.extend_from_slice(b"\\\\");
                continue;
            }
            '(' => {
                out.extend_from_slice(b"\\(");
                continue;
            }
            ')' => {
                out.extend_from_slice(b"\\)");
                continue;
            }
            ' '..='~' => c as u8,
            '\u{00A0}'..='\u{00FF}' => c as u32 as u8,
            '\u{2013}' => 0x96, // en dash
            '\u{2014}' => 0x97, // em dash
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            _ => b'?',
        };
        out.push(byte);
    }
    out
}
