//! Minimal deterministic PDF writer for plain text reports.
//!
//! Produces PDF 1.4 with one Helvetica font, A4 pages and a fixed number of
//! lines per page. No timestamps or document IDs are embedded, so identical
//! input always yields identical bytes.

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN: u32 = 50;
const FONT_SIZE: u32 = 10;
const LEADING: u32 = 14;
pub const LINES_PER_PAGE: usize = 52;
pub const MAX_LINE_CHARS: usize = 100;

#[derive(Debug, Default, Clone)]
pub struct TextDocument {
    lines: Vec<String>,
}

impl TextDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line; overly long lines are cut with `...`.
    pub fn line(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        let line = if text.chars().count() > MAX_LINE_CHARS {
            let cut: String = text.chars().take(MAX_LINE_CHARS - 3).collect();
            format!("{cut}...")
        } else {
            text
        };
        self.lines.push(line);
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    pub fn page_count(&self) -> usize {
        self.lines.len().div_ceil(LINES_PER_PAGE).max(1)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let pages: Vec<&[String]> = if self.lines.is_empty() {
            vec![&self.lines[..]]
        } else {
            self.lines.chunks(LINES_PER_PAGE).collect()
        };

        // 1 catalog, 2 page tree, 3 font, then (page, contents) pairs.
        let mut objects: Vec<Vec<u8>> = Vec::with_capacity(3 + pages.len() * 2);
        objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());

        let kids = (0..pages.len())
            .map(|i| format!("{} 0 R", 4 + i * 2))
            .collect::<Vec<_>>()
            .join(" ");
        objects.push(format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, pages.len()).into_bytes());
        objects.push(
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_vec(),
        );

        for (i, page_lines) in pages.iter().enumerate() {
            let contents_id = 5 + i * 2;
            objects.push(
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                     /Resources << /Font << /F1 3 0 R >> >> /Contents {contents_id} 0 R >>"
                )
                .into_bytes(),
            );

            let stream = content_stream(page_lines);
            let mut contents = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
            contents.extend_from_slice(&stream);
            contents.extend_from_slice(b"\nendstream");
            objects.push(contents);
        }

        let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = out.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in &offsets {
            xref.push_str(&format!("{offset:010} 00000 n \n"));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        ));
        out.extend_from_slice(xref.as_bytes());
        out
    }
}

fn content_stream(lines: &[String]) -> Vec<u8> {
    let top = PAGE_HEIGHT - MARGIN;
    let mut stream = format!("BT\n/F1 {FONT_SIZE} Tf\n{LEADING} TL\n{MARGIN} {top} Td\n").into_bytes();
    for line in lines {
        stream.push(b'(');
        stream.extend(encode_text(line));
        stream.extend_from_slice(b") Tj T*\n");
    }
    stream.extend_from_slice(b"ET");
    stream
}

/// WinAnsi-ish encoding of a string literal body: Latin-1 characters pass
/// through, everything else becomes `?`.
fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            c if (c as u32) < 0x20 => out.push(b' '),
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[test]
    fn test_document_structure_and_xref_offsets() {
        let mut doc = TextDocument::new();
        doc.line("Accessibility report").blank().line("Seed: (demo)");
        let bytes = doc.to_bytes();

        assert!(bytes.starts_with(b"%PDF-1.4\n"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        assert!(find(&bytes, b"(Seed: \\(demo\\)) Tj").is_some());

        // Every xref entry must point at its object header.
        let xref_at = find(&bytes, b"xref\n").unwrap();
        let table = String::from_utf8_lossy(&bytes[xref_at..]).to_string();
        let offsets: Vec<usize> = table
            .lines()
            .filter(|l| l.ends_with(" n "))
            .map(|l| l[..10].parse().unwrap())
            .collect();
        assert_eq!(offsets.len(), 5);
        for (i, offset) in offsets.iter().enumerate() {
            let header = format!("{} 0 obj", i + 1);
            assert!(bytes[*offset..].starts_with(header.as_bytes()));
        }
    }

    #[test]
    fn test_output_is_deterministic() {
        let mut doc = TextDocument::new();
        for i in 0..120 {
            doc.line(format!("page {i}"));
        }
        assert_eq!(doc.to_bytes(), doc.to_bytes());
        assert_eq!(doc.page_count(), 3);
    }

    #[test]
    fn test_long_lines_are_cut() {
        let mut doc = TextDocument::new();
        doc.line("x".repeat(300));
        assert_eq!(doc.lines[0].chars().count(), MAX_LINE_CHARS);
        assert!(doc.lines[0].ends_with("..."));
    }

    #[test]
    fn test_encode_text_latin1_and_fallback() {
        assert_eq!(encode_text("Gijón"), b"Gij\xf3n".to_vec());
        assert_eq!(encode_text("\u{2713}"), b"?".to_vec());
    }
}
