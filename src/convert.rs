//! Notebook ⇄ percent-format script conversion.
//!
//! ```python
//! # /// script
//! # dependencies = []
//! # ///
//!
//! # %% [markdown]
//! # # Title
//!
//! # %%
//! import os
//! ```
//!
//! The metadata block always sits at the top of the script and always travels
//! as its own leading (hidden) code cell in the notebook. Cell lines that
//! would read back as a cell marker or a block delimiter are written behind
//! an extra `# ` (see [`escape_line`]). Outputs, execution
//! counts and metadata have no script form; what a conversion dropped is
//! reported in [`LossReport`] instead of being discarded silently.

use crate::notebook::{Cell, CellKind, NotebookDocument};
use crate::pep723::{MetadataBlock, ParseError};
use crate::script::{ScriptDocument, cell_marker, escape_line, unescape_line};
use serde::Serialize;
use std::borrow::Cow;

/// What a conversion could not carry over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LossReport {
    pub outputs: usize,
    pub execution_counts: usize,
    pub cell_metadata: usize,
    pub notebook_metadata: bool,
}

impl LossReport {
    pub fn is_lossy(&self) -> bool {
        self.outputs > 0
            || self.execution_counts > 0
            || self.cell_metadata > 0
            || self.notebook_metadata
    }

    /// Human readable list of what was dropped, e.g.
    /// `2 outputs, 1 execution count, notebook metadata`.
    pub fn summary(&self) -> String {
        fn plural(n: usize, word: &str) -> String {
            if n == 1 {
                format!("{n} {word}")
            } else {
                format!("{n} {word}s")
            }
        }

        let mut parts = Vec::new();
        if self.outputs > 0 {
            parts.push(plural(self.outputs, "output"));
        }
        if self.execution_counts > 0 {
            parts.push(plural(self.execution_counts, "execution count"));
        }
        if self.cell_metadata > 0 {
            parts.push(format!(
                "metadata of {}",
                plural(self.cell_metadata, "cell")
            ));
        }
        if self.notebook_metadata {
            parts.push("notebook metadata".to_string());
        }
        parts.join(", ")
    }

    fn record(&mut self, cell: &Cell) {
        self.outputs += cell.outputs.len();
        if cell.execution_count.is_some() {
            self.execution_counts += 1;
        }
        if !cell.metadata.is_empty() || !cell.extra.is_empty() {
            self.cell_metadata += 1;
        }
    }
}

/// A converted document together with its loss report.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion<T> {
    pub document: T,
    pub loss: LossReport,
}

impl<T> Conversion<T> {
    pub fn is_lossy(&self) -> bool {
        self.loss.is_lossy()
    }
}

/// Source lines without terminators, trailing blank lines dropped.
fn trimmed_lines<S: AsRef<str>>(lines: &[S]) -> Vec<&str> {
    let mut lines: Vec<&str> = lines
        .iter()
        .map(|line| line.as_ref().trim_end_matches(['\n', '\r']))
        .collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines
}

fn comment_out(line: &str) -> String {
    if line.is_empty() {
        "#".to_string()
    } else {
        format!("# {line}")
    }
}

fn uncomment(line: &str) -> &str {
    line.strip_prefix("# ")
        .or_else(|| line.strip_prefix('#'))
        .unwrap_or(line)
}

/// Flatten `notebook` into a percent-format script.
pub fn notebook_to_script(
    notebook: &NotebookDocument,
) -> Result<Conversion<ScriptDocument>, ParseError> {
    let block = notebook.metadata_block()?;
    let carrier = notebook.first_code_cell().filter(|_| block.is_some());

    let mut loss = LossReport {
        notebook_metadata: !notebook.metadata.is_empty() || !notebook.extra.is_empty(),
        ..LossReport::default()
    };
    let mut chunks: Vec<String> = Vec::new();

    for (index, cell) in notebook.cells.iter().enumerate() {
        let source = if Some(index) == carrier {
            let rest = ScriptDocument::from_text(&cell.source)?
                .without_metadata_block()
                .to_text();
            if rest.trim().is_empty() {
                // The block-only cell is regenerated on the way back.
                loss.outputs += cell.outputs.len();
                continue;
            }
            rest
        } else {
            cell.source.clone()
        };
        loss.record(cell);

        let lines: Vec<&str> = source.split_inclusive('\n').collect();
        let body = trimmed_lines(&lines);
        let mut chunk = String::from(cell_marker(cell.kind));
        chunk.push('\n');
        for line in body {
            let line = match cell.kind {
                CellKind::Code => Cow::Borrowed(line),
                CellKind::Markdown | CellKind::Raw => Cow::Owned(comment_out(line)),
            };
            chunk.push_str(&escape_line(&line));
            chunk.push('\n');
        }
        chunks.push(chunk);
    }

    let mut text = String::new();
    if let Some(block) = &block {
        text.push_str(&block.serialize());
        if !chunks.is_empty() {
            text.push('\n');
        }
    }
    text.push_str(&chunks.join("\n"));

    Ok(Conversion {
        document: ScriptDocument::from_text(&text)?,
        loss,
    })
}

/// Split a percent-format script back into notebook cells.
///
/// Text before the first marker becomes a leading code cell; a script
/// without any marker becomes a single code cell.
pub fn script_to_notebook(
    script: &ScriptDocument,
) -> Result<Conversion<NotebookDocument>, ParseError> {
    let block: Option<MetadataBlock> = script.metadata_block()?;
    let body = script.without_metadata_block();
    let lines = body.lines();
    let markers = body.cell_markers();

    let mut notebook = NotebookDocument::new();
    if let Some(block) = &block {
        let cell = notebook.metadata_cell(block);
        notebook.cells.push(cell);
    }

    let preamble_end = markers.first().map_or(lines.len(), |marker| marker.line);
    let preamble: Vec<&str> = trimmed_lines(&lines[..preamble_end])
        .into_iter()
        .map(unescape_line)
        .collect();
    let preamble_is_blank = preamble.iter().all(|line| line.trim().is_empty());
    if !preamble_is_blank || (markers.is_empty() && block.is_none()) {
        notebook.push_cell(Cell::code(preamble.join("\n")));
    }

    for (position, marker) in markers.iter().enumerate() {
        let end = markers
            .get(position + 1)
            .map_or(lines.len(), |next| next.line);
        let content: Vec<&str> = trimmed_lines(&lines[marker.line + 1..end])
            .into_iter()
            .map(unescape_line)
            .collect();
        let source = match marker.kind {
            CellKind::Code => content.join("\n"),
            CellKind::Markdown | CellKind::Raw => content
                .into_iter()
                .map(uncomment)
                .collect::<Vec<_>>()
                .join("\n"),
        };
        notebook.push_cell(Cell::new(marker.kind, source));
    }

    Ok(Conversion {
        document: notebook,
        loss: LossReport::default(),
    })
}
