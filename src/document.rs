//! Documents on disk: `.py` scripts and `.ipynb` notebooks.

use crate::convert::{Conversion, notebook_to_script, script_to_notebook};
use crate::notebook::NotebookDocument;
use crate::pep723::{MetadataBlock, ParseError};
use crate::script::ScriptDocument;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_UNTITLED: usize = 100;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("unsupported file type {} (expected .py or .ipynb)", .0.display())]
    UnsupportedExtension(PathBuf),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("could not find an available UntitledN.ipynb name in {}", .0.display())]
    NoUntitledName(PathBuf),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Script,
    Notebook,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Ok(DocumentKind::Script),
            Some("ipynb") => Ok(DocumentKind::Notebook),
            _ => Err(DocumentError::UnsupportedExtension(path.to_path_buf())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Script => "py",
            DocumentKind::Notebook => "ipynb",
        }
    }

    pub fn other(self) -> Self {
        match self {
            DocumentKind::Script => DocumentKind::Notebook,
            DocumentKind::Notebook => DocumentKind::Script,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Script(ScriptDocument),
    Notebook(NotebookDocument),
}

impl Document {
    pub fn parse(kind: DocumentKind, text: &str) -> std::result::Result<Self, ParseError> {
        Ok(match kind {
            DocumentKind::Script => Document::Script(ScriptDocument::from_text(text)?),
            DocumentKind::Notebook => Document::Notebook(NotebookDocument::from_json(text)?),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let kind = DocumentKind::from_path(path)?;
        let text = fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(kind, &text).map_err(|source| DocumentError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_text().map_err(|source| DocumentError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| DocumentError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Script(_) => DocumentKind::Script,
            Document::Notebook(_) => DocumentKind::Notebook,
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        match self {
            Document::Script(script) => Ok(script.to_text()),
            Document::Notebook(notebook) => notebook.to_json(),
        }
    }

    pub fn metadata_block(&self) -> std::result::Result<Option<MetadataBlock>, ParseError> {
        match self {
            Document::Script(script) => script.metadata_block(),
            Document::Notebook(notebook) => notebook.metadata_block(),
        }
    }

    pub fn with_metadata_block(
        &self,
        block: &MetadataBlock,
    ) -> std::result::Result<Document, ParseError> {
        Ok(match self {
            Document::Script(script) => Document::Script(script.with_metadata_block(block)),
            Document::Notebook(notebook) => {
                Document::Notebook(notebook.with_metadata_block(block)?)
            }
        })
    }

    /// The notebook form; a script is converted.
    pub fn to_notebook(&self) -> std::result::Result<Conversion<NotebookDocument>, ParseError> {
        match self {
            Document::Script(script) => script_to_notebook(script),
            Document::Notebook(notebook) => Ok(Conversion {
                document: notebook.clone(),
                loss: Default::default(),
            }),
        }
    }

    /// The script form; a notebook is converted.
    pub fn to_script(&self) -> std::result::Result<Conversion<ScriptDocument>, ParseError> {
        match self {
            Document::Script(script) => Ok(Conversion {
                document: script.clone(),
                loss: Default::default(),
            }),
            Document::Notebook(notebook) => notebook_to_script(notebook),
        }
    }

    /// Convert to the other shape.
    pub fn convert(&self) -> std::result::Result<Conversion<Document>, ParseError> {
        Ok(match self {
            Document::Script(_) => {
                let Conversion { document, loss } = self.to_notebook()?;
                Conversion {
                    document: Document::Notebook(document),
                    loss,
                }
            }
            Document::Notebook(_) => {
                let Conversion { document, loss } = self.to_script()?;
                Conversion {
                    document: Document::Script(document),
                    loss,
                }
            }
        })
    }
}

/// The first free `Untitled.ipynb`, `Untitled1.ipynb`, ... in `dir`.
pub fn untitled_path(dir: &Path) -> Result<PathBuf> {
    let candidate = dir.join("Untitled.ipynb");
    if !candidate.exists() {
        return Ok(candidate);
    }
    (1..MAX_UNTITLED)
        .map(|i| dir.join(format!("Untitled{i}.ipynb")))
        .find(|path| !path.exists())
        .ok_or_else(|| DocumentError::NoUntitledName(dir.to_path_buf()))
}
