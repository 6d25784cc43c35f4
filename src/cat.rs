//! Plain-text renderings of a notebook.

use crate::convert::notebook_to_script;
use crate::notebook::{CellKind, NotebookDocument};
use crate::pep723::ParseError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CatFormat {
    /// Percent-format Python script.
    #[default]
    Script,
    /// Markdown with code cells in fenced blocks.
    Markdown,
}

impl CatFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            CatFormat::Script => "script",
            CatFormat::Markdown => "markdown",
        }
    }
}

/// Render `notebook` as text, without trailing whitespace.
pub fn render(notebook: &NotebookDocument, format: CatFormat) -> Result<String, ParseError> {
    let text = match format {
        CatFormat::Script => notebook_to_script(notebook)?.document.to_text(),
        CatFormat::Markdown => to_markdown(notebook),
    };
    Ok(text.trim_end().to_string())
}

fn to_markdown(notebook: &NotebookDocument) -> String {
    notebook
        .cells
        .iter()
        .map(|cell| {
            let source = cell.source.trim_end_matches(['\n', '\r']);
            match cell.kind {
                CellKind::Markdown => source.to_string(),
                CellKind::Code => format!("```python\n{source}\n```"),
                CellKind::Raw => format!("<!-- #raw -->\n{source}\n<!-- #endraw -->"),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
