//! Scripts as ordered lines.
//!
//! A [`ScriptDocument`] keeps every line together with its original line
//! terminator, so `to_text` reproduces the input byte for byte. On top of
//! the raw lines it records where the metadata block sits and where the
//! percent-format cell markers (`# %%`, `# %% [markdown]`, `# %% [raw]`) are.

use crate::notebook::CellKind;
use crate::pep723::{self, MetadataBlock, ParseError};
use regex::Regex;
use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

pub const CELL_MARKER: &str = "# %%";

// PEP 263 source encoding declaration.
static ENCODING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t\x0c]*#.*?coding[:=][ \t]*[-_.a-zA-Z0-9]+").expect("valid encoding pattern")
});

/// A cell boundary found in a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMarker {
    pub line: usize,
    pub kind: CellKind,
}

/// Read a `# %%` marker line. Anything after the marker is a title and
/// optional `[markdown]`, `[md]` or `[raw]` tag.
pub fn parse_cell_marker(line: &str) -> Option<CellKind> {
    let line = line.trim_end_matches(['\n', '\r']);
    let rest = line.strip_prefix(CELL_MARKER)?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    let tags = rest.trim();
    if tags.contains("[markdown]") || tags.contains("[md]") {
        Some(CellKind::Markdown)
    } else if tags.contains("[raw]") {
        Some(CellKind::Raw)
    } else {
        Some(CellKind::Code)
    }
}

/// The marker line written for a cell of `kind`.
pub fn cell_marker(kind: CellKind) -> &'static str {
    match kind {
        CellKind::Code => "# %%",
        CellKind::Markdown => "# %% [markdown]",
        CellKind::Raw => "# %% [raw]",
    }
}

/// Lines that would read back as structure: a cell marker or a metadata
/// block delimiter.
fn is_reserved(line: &str) -> bool {
    parse_cell_marker(line).is_some()
        || line == pep723::END_MARKER
        || line.starts_with(pep723::TYPE_MARKER_PREFIX)
}

/// Whether `line` is reserved, or is a reserved line behind one or more
/// `# ` escapes.
fn needs_escape(line: &str) -> bool {
    let mut rest = line;
    loop {
        if is_reserved(rest) {
            return true;
        }
        match rest.strip_prefix("# ") {
            Some(inner) => rest = inner,
            None => return false,
        }
    }
}

/// Escape a cell line (without terminator) before it goes into a script:
/// reserved lines get one extra `# ` in front.
pub fn escape_line(line: &str) -> Cow<'_, str> {
    if needs_escape(line) {
        Cow::Owned(format!("# {line}"))
    } else {
        Cow::Borrowed(line)
    }
}

/// Undo [`escape_line`].
pub fn unescape_line(line: &str) -> &str {
    match line.strip_prefix("# ") {
        Some(inner) if needs_escape(inner) => inner,
        _ => line,
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn scan_markers(lines: &[String], span: Option<&Range<usize>>) -> Vec<CellMarker> {
    lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !span.is_some_and(|span| span.contains(i)))
        .filter_map(|(line, text)| parse_cell_marker(text).map(|kind| CellMarker { line, kind }))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDocument {
    lines: Vec<String>,
    metadata_block_span: Option<Range<usize>>,
    cell_markers: Vec<CellMarker>,
}

impl ScriptDocument {
    /// Split `text` into lines and find the block and cell markers.
    ///
    /// Fails only on broken block delimiters; the TOML inside the block is
    /// not parsed until [`ScriptDocument::metadata_block`] is called.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let lines: Vec<String> = text.split_inclusive('\n').map(String::from).collect();
        let metadata_block_span = pep723::locate(&lines)?;
        let cell_markers = scan_markers(&lines, metadata_block_span.as_ref());
        Ok(Self {
            lines,
            metadata_block_span,
            cell_markers,
        })
    }

    /// Lines with their original terminators.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn metadata_block_span(&self) -> Option<Range<usize>> {
        self.metadata_block_span.clone()
    }

    pub fn cell_markers(&self) -> &[CellMarker] {
        &self.cell_markers
    }

    pub fn has_metadata_block(&self) -> bool {
        self.metadata_block_span.is_some()
    }

    /// Parse the embedded block, if there is one.
    pub fn metadata_block(&self) -> Result<Option<MetadataBlock>, ParseError> {
        match &self.metadata_block_span {
            Some(span) => {
                MetadataBlock::from_toml(&pep723::interior(&self.lines[span.clone()])).map(Some)
            }
            None => Ok(None),
        }
    }

    fn line_ending(&self) -> &'static str {
        if self.lines.iter().any(|line| line.ends_with("\r\n")) {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Where a new block goes: the top of the file, after a shebang line
    /// and an encoding declaration on either of the first two lines.
    pub fn canonical_block_position(&self) -> usize {
        let is_encoding = |index: usize| {
            self.lines
                .get(index)
                .is_some_and(|line| ENCODING_RE.is_match(line))
        };
        let first_is_comment = self.lines.first().is_some_and(|line| line.starts_with('#'));
        if first_is_comment && is_encoding(1) {
            2
        } else if first_is_comment {
            // A shebang or an encoding declaration.
            usize::from(self.lines[0].starts_with("#!") || is_encoding(0))
        } else {
            0
        }
    }

    /// Return a copy with `block` written in place of the current block, or
    /// inserted at the canonical position when there is none. No other line
    /// changes, apart from a missing terminator on the line the block is
    /// inserted after.
    pub fn with_metadata_block(&self, block: &MetadataBlock) -> ScriptDocument {
        let ending = self.line_ending();
        let mut block_lines: Vec<String> = block
            .serialize()
            .lines()
            .map(|line| format!("{line}{ending}"))
            .collect();
        let block_len = block_lines.len();
        let mut lines = self.lines.clone();

        let span = match &self.metadata_block_span {
            Some(span) => {
                let had_terminator = lines[span.end - 1].ends_with('\n');
                if !had_terminator && let Some(last) = block_lines.last_mut() {
                    last.truncate(last.trim_end_matches(['\n', '\r']).len());
                }
                lines.splice(span.clone(), block_lines);
                span.start..span.start + block_len
            }
            None => {
                let at = self.canonical_block_position();
                if at > 0 && !lines[at - 1].ends_with('\n') {
                    lines[at - 1].push_str(ending);
                }
                if lines.get(at).is_some_and(|line| !is_blank(line)) {
                    block_lines.push(ending.to_string());
                }
                lines.splice(at..at, block_lines);
                at..at + block_len
            }
        };

        let cell_markers = scan_markers(&lines, Some(&span));
        ScriptDocument {
            lines,
            metadata_block_span: Some(span),
            cell_markers,
        }
    }

    /// Return a copy without the block (and without the blank line that
    /// separated it from what follows).
    pub fn without_metadata_block(&self) -> ScriptDocument {
        let Some(span) = &self.metadata_block_span else {
            return self.clone();
        };
        let mut lines = self.lines.clone();
        let mut end = span.end;
        if lines.get(end).is_some_and(|line| is_blank(line)) {
            end += 1;
        }
        lines.drain(span.start..end);

        let cell_markers = scan_markers(&lines, None);
        ScriptDocument {
            lines,
            metadata_block_span: None,
            cell_markers,
        }
    }

    pub fn to_text(&self) -> String {
        self.lines.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor;

    fn sample_block() -> MetadataBlock {
        editor::add(&MetadataBlock::default(), &["numpy"]).unwrap()
    }

    #[test]
    fn to_text_reproduces_input_exactly() {
        for text in [
            "",
            "print(1)",
            "print(1)\n",
            "a = 1\r\nb = 2\r\n",
            "x = 1  \n\n\n# trailing\n   ",
            "# /// script\n# dependencies = []\n# ///\nimport os",
        ] {
            assert_eq!(ScriptDocument::from_text(text).unwrap().to_text(), text);
        }
    }

    #[test]
    fn finds_block_span_and_markers() {
        let text = "# /// script\n# dependencies = []\n# ///\n\n# %%\nimport os\n\n# %% [markdown]\n# # Title\n";
        let doc = ScriptDocument::from_text(text).unwrap();
        assert_eq!(doc.metadata_block_span(), Some(0..3));
        assert_eq!(
            doc.cell_markers(),
            &[
                CellMarker { line: 4, kind: CellKind::Code },
                CellMarker { line: 7, kind: CellKind::Markdown },
            ]
        );
    }

    #[test]
    fn marker_grammar() {
        assert_eq!(parse_cell_marker("# %%"), Some(CellKind::Code));
        assert_eq!(parse_cell_marker("# %% Setup\n"), Some(CellKind::Code));
        assert_eq!(parse_cell_marker("# %% [md]"), Some(CellKind::Markdown));
        assert_eq!(parse_cell_marker("# %% Notes [markdown]\r\n"), Some(CellKind::Markdown));
        assert_eq!(parse_cell_marker("# %% [raw]"), Some(CellKind::Raw));
        assert_eq!(parse_cell_marker("# %%%"), None);
        assert_eq!(parse_cell_marker("  # %%"), None);
        assert_eq!(parse_cell_marker("#%%"), None);
    }

    #[test]
    fn inserts_block_at_top() {
        let doc = ScriptDocument::from_text("import numpy\n").unwrap();
        let doc = doc.with_metadata_block(&sample_block());
        assert_eq!(
            doc.to_text(),
            "# /// script\n# dependencies = [\n#     \"numpy\",\n# ]\n# ///\n\nimport numpy\n"
        );
        assert_eq!(doc.metadata_block_span(), Some(0..5));
        assert_eq!(doc.metadata_block().unwrap(), Some(sample_block()));
    }

    #[test]
    fn inserts_block_after_shebang_and_encoding() {
        let text = "#!/usr/bin/env python3\n# -*- coding: utf-8 -*-\nprint('hi')\n";
        let doc = ScriptDocument::from_text(text).unwrap().with_metadata_block(&sample_block());
        let lines = doc.lines();
        assert_eq!(lines[0], "#!/usr/bin/env python3\n");
        assert_eq!(lines[1], "# -*- coding: utf-8 -*-\n");
        assert_eq!(lines[2], "# /// script\n");
        assert_eq!(doc.metadata_block_span(), Some(2..7));
        assert!(doc.to_text().ends_with("# ///\n\nprint('hi')\n"));
    }

    #[test]
    fn encoding_on_second_line_stays_above_block() {
        let text = "# analysis helpers\n# -*- coding: latin-1 -*-\nprint('hi')\n";
        let doc = ScriptDocument::from_text(text).unwrap();
        assert_eq!(doc.canonical_block_position(), 2);

        let doc = ScriptDocument::from_text("# vim: set fileencoding=utf-8 :\nx = 1\n").unwrap();
        assert_eq!(doc.canonical_block_position(), 1);

        let doc = ScriptDocument::from_text("# just a comment\nx = 1\n").unwrap();
        assert_eq!(doc.canonical_block_position(), 0);

        let doc = ScriptDocument::from_text("x = 1\n# coding: utf-8\n").unwrap();
        assert_eq!(doc.canonical_block_position(), 0);
    }

    #[test]
    fn reserved_lines_are_escaped_once_per_level() {
        assert_eq!(escape_line("x = 1"), "x = 1");
        assert_eq!(escape_line("# plain comment"), "# plain comment");
        assert_eq!(escape_line("# %% not a boundary"), "# # %% not a boundary");
        assert_eq!(escape_line("# /// script"), "# # /// script");
        assert_eq!(escape_line("# ///"), "# # ///");
        assert_eq!(escape_line("# # %%"), "# # # %%");

        for line in ["x = 1", "# plain comment", "# %% [markdown]", "# # /// script", "#", "# "] {
            assert_eq!(unescape_line(&escape_line(line)), line);
            assert!(!is_reserved(&escape_line(line)));
        }
    }

    #[test]
    fn shebang_without_newline_gets_one() {
        let doc = ScriptDocument::from_text("#!/usr/bin/env python3")
            .unwrap()
            .with_metadata_block(&MetadataBlock::default());
        assert_eq!(
            doc.to_text(),
            "#!/usr/bin/env python3\n# /// script\n# dependencies = []\n# ///\n"
        );
    }

    #[test]
    fn replaces_existing_block_in_place() {
        let text = "import sys\n\n# /// script\n# dependencies = []\n# ///\nprint(sys.argv)";
        let doc = ScriptDocument::from_text(text).unwrap();
        let replaced = doc.with_metadata_block(&sample_block());
        assert_eq!(
            replaced.to_text(),
            "import sys\n\n# /// script\n# dependencies = [\n#     \"numpy\",\n# ]\n# ///\nprint(sys.argv)"
        );

        // Same block back in: the text is unchanged.
        let block = doc.metadata_block().unwrap().unwrap();
        assert_eq!(doc.with_metadata_block(&block).to_text(), text);
    }

    #[test]
    fn keeps_missing_final_newline_of_block() {
        let text = "# /// script\n# dependencies = []\n# ///";
        let doc = ScriptDocument::from_text(text).unwrap();
        let replaced = doc.with_metadata_block(&sample_block());
        assert!(replaced.to_text().ends_with("# ]\n# ///"));
    }

    #[test]
    fn preserves_crlf_endings() {
        let text = "import os\r\n";
        let doc = ScriptDocument::from_text(text).unwrap().with_metadata_block(&MetadataBlock::default());
        assert_eq!(
            doc.to_text(),
            "# /// script\r\n# dependencies = []\r\n# ///\r\n\r\nimport os\r\n"
        );
    }

    #[test]
    fn markers_shift_after_insertion() {
        let doc = ScriptDocument::from_text("# %%\nx = 1\n").unwrap();
        assert_eq!(doc.cell_markers()[0].line, 0);
        let doc = doc.with_metadata_block(&MetadataBlock::default());
        assert_eq!(doc.cell_markers()[0].line, 4);
    }

    #[test]
    fn removes_block_and_separator() {
        let text = "# /// script\n# dependencies = []\n# ///\n\n# %%\nx = 1\n";
        let doc = ScriptDocument::from_text(text).unwrap().without_metadata_block();
        assert_eq!(doc.to_text(), "# %%\nx = 1\n");
        assert!(!doc.has_metadata_block());
        assert_eq!(doc.cell_markers()[0].line, 0);
    }

    #[test]
    fn broken_delimiters_fail() {
        assert!(ScriptDocument::from_text("# /// script\nimport os\n").is_err());
    }
}
