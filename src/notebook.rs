//! Jupyter notebooks (nbformat v4).
//!
//! Only the structure the metadata workflow needs is modeled: the cell list,
//! each cell's kind and source, and the format version. Everything else
//! (notebook and cell metadata, outputs, attachments, unknown keys) is kept
//! as opaque JSON and written back unchanged.

use crate::pep723::{self, MetadataBlock, ParseError};
use crate::script::ScriptDocument;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub const SUPPORTED_MAJOR: u64 = 4;
pub const MAX_SUPPORTED_MINOR: u64 = 5;

/// Opaque, order-preserving JSON object.
pub type Bag = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Markdown,
    Raw,
}

impl CellKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CellKind::Code => "code",
            CellKind::Markdown => "markdown",
            CellKind::Raw => "raw",
        }
    }

    fn from_cell_type(cell_type: &str) -> Option<Self> {
        match cell_type {
            "code" => Some(CellKind::Code),
            "markdown" => Some(CellKind::Markdown),
            "raw" => Some(CellKind::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub kind: CellKind,
    pub id: Option<String>,
    pub source: String,
    pub metadata: Bag,
    /// Code cells only.
    pub outputs: Vec<Value>,
    /// Code cells only.
    pub execution_count: Option<i64>,
    /// `attachments` and any key nbformat adds later.
    pub extra: Bag,
}

impl Cell {
    pub fn new(kind: CellKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            id: None,
            source: source.into(),
            metadata: Bag::new(),
            outputs: Vec::new(),
            execution_count: None,
            extra: Bag::new(),
        }
    }

    pub fn code(source: impl Into<String>) -> Self {
        Self::new(CellKind::Code, source)
    }

    pub fn markdown(source: impl Into<String>) -> Self {
        Self::new(CellKind::Markdown, source)
    }

    fn from_value(index: usize, value: Value) -> Result<Self, ParseError> {
        let schema = |message: String| ParseError::InvalidSchema(format!("cell {index}: {message}"));

        let Value::Object(mut object) = value else {
            return Err(schema("expected an object".into()));
        };

        let kind = match object.remove("cell_type") {
            Some(Value::String(cell_type)) => CellKind::from_cell_type(&cell_type)
                .ok_or_else(|| schema(format!("unknown cell_type `{cell_type}`")))?,
            Some(_) => return Err(schema("`cell_type` must be a string".into())),
            None => return Err(schema("missing `cell_type`".into())),
        };

        let source = match object.remove("source") {
            Some(Value::String(text)) => text,
            Some(Value::Array(parts)) => parts
                .into_iter()
                .map(|part| match part {
                    Value::String(text) => Ok(text),
                    _ => Err(schema("`source` lines must be strings".into())),
                })
                .collect::<Result<String, _>>()?,
            Some(_) => return Err(schema("`source` must be a string or list of strings".into())),
            None => return Err(schema("missing `source`".into())),
        };

        let id = match object.remove("id") {
            Some(Value::String(id)) => Some(id),
            Some(_) => return Err(schema("`id` must be a string".into())),
            None => None,
        };

        let metadata = match object.remove("metadata") {
            Some(Value::Object(metadata)) => metadata,
            Some(_) => return Err(schema("`metadata` must be an object".into())),
            None => Bag::new(),
        };

        let mut cell = Cell {
            kind,
            id,
            source,
            metadata,
            outputs: Vec::new(),
            execution_count: None,
            extra: Bag::new(),
        };

        if kind == CellKind::Code {
            cell.outputs = match object.remove("outputs") {
                Some(Value::Array(outputs)) => outputs,
                Some(_) => return Err(schema("`outputs` must be a list".into())),
                None => Vec::new(),
            };
            cell.execution_count = match object.remove("execution_count") {
                Some(Value::Null) | None => None,
                Some(value) => Some(
                    value
                        .as_i64()
                        .ok_or_else(|| schema("`execution_count` must be an integer".into()))?,
                ),
            };
        }

        cell.extra = object;
        Ok(cell)
    }

    fn to_value(&self) -> Value {
        // nbformat writes cell keys sorted.
        let mut fields: BTreeMap<String, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        fields.insert("cell_type".into(), json!(self.kind.as_str()));
        if let Some(id) = &self.id {
            fields.insert("id".into(), json!(id));
        }
        fields.insert("metadata".into(), Value::Object(self.metadata.clone()));
        if self.kind == CellKind::Code {
            fields.insert("execution_count".into(), json!(self.execution_count));
            fields.insert("outputs".into(), Value::Array(self.outputs.clone()));
        }
        fields.insert(
            "source".into(),
            Value::Array(
                self.source
                    .split_inclusive('\n')
                    .map(|line| Value::String(line.to_string()))
                    .collect(),
            ),
        );
        Value::Object(fields.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotebookDocument {
    pub cells: Vec<Cell>,
    /// Kernel spec, language info and the like. Never interpreted.
    pub metadata: Bag,
    /// `(nbformat, nbformat_minor)`.
    pub format_version: (u64, u64),
    /// Unknown top-level keys.
    pub extra: Bag,
}

impl Default for NotebookDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl NotebookDocument {
    /// An empty nbformat 4.5 notebook with a Python 3 kernel.
    pub fn new() -> Self {
        let metadata = json!({
            "kernelspec": {
                "display_name": "Python 3 (ipykernel)",
                "language": "python",
                "name": "python3"
            },
            "language_info": {
                "name": "python"
            }
        });
        Self {
            cells: Vec::new(),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            format_version: (SUPPORTED_MAJOR, MAX_SUPPORTED_MINOR),
            extra: Bag::new(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ParseError::InvalidSchema(format!("not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let Value::Object(mut object) = value else {
            return Err(ParseError::InvalidSchema(
                "top level must be a JSON object".into(),
            ));
        };

        let major = take_version(&mut object, "nbformat")?;
        let minor = take_version(&mut object, "nbformat_minor")?;
        if major != SUPPORTED_MAJOR || minor > MAX_SUPPORTED_MINOR {
            return Err(ParseError::UnsupportedFormatVersion { major, minor });
        }

        let metadata = match object.remove("metadata") {
            Some(Value::Object(metadata)) => metadata,
            Some(_) => {
                return Err(ParseError::InvalidSchema(
                    "`metadata` must be an object".into(),
                ));
            }
            None => return Err(ParseError::InvalidSchema("missing `metadata`".into())),
        };

        let cells = match object.remove("cells") {
            Some(Value::Array(cells)) => cells
                .into_iter()
                .enumerate()
                .map(|(index, cell)| Cell::from_value(index, cell))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(ParseError::InvalidSchema("`cells` must be a list".into())),
            None => return Err(ParseError::InvalidSchema("missing `cells`".into())),
        };

        Ok(Self {
            cells,
            metadata,
            format_version: (major, minor),
            extra: object,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut fields: BTreeMap<String, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        fields.insert(
            "cells".into(),
            Value::Array(self.cells.iter().map(Cell::to_value).collect()),
        );
        fields.insert("metadata".into(), Value::Object(self.metadata.clone()));
        fields.insert("nbformat".into(), json!(self.format_version.0));
        fields.insert("nbformat_minor".into(), json!(self.format_version.1));
        Value::Object(fields.into_iter().collect())
    }

    /// Serialize the way nbformat does: one-space indent, trailing newline.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.to_value().serialize(&mut serializer)?;
        let mut text = String::from_utf8_lossy(&buf).into_owned();
        text.push('\n');
        Ok(text)
    }

    /// Whether new cells must carry an `id` (nbformat 4.5+).
    pub fn uses_cell_ids(&self) -> bool {
        self.format_version >= (4, 5)
    }

    /// Give `cell` a fresh id if this notebook's format expects one.
    pub fn prepare_cell(&self, mut cell: Cell) -> Cell {
        if self.uses_cell_ids() && cell.id.is_none() {
            cell.id = Some(Uuid::new_v4().to_string());
        }
        cell
    }

    pub fn push_cell(&mut self, cell: Cell) {
        let cell = self.prepare_cell(cell);
        self.cells.push(cell);
    }

    pub fn first_code_cell(&self) -> Option<usize> {
        self.cells.iter().position(|cell| cell.kind == CellKind::Code)
    }

    /// The block embedded in the first code cell, if any.
    pub fn metadata_block(&self) -> Result<Option<MetadataBlock>, ParseError> {
        match self.first_code_cell() {
            Some(index) if pep723::has_script_metadata(&self.cells[index].source) => {
                MetadataBlock::find(&self.cells[index].source)
            }
            _ => Ok(None),
        }
    }

    /// A hidden code cell holding only `block`.
    pub fn metadata_cell(&self, block: &MetadataBlock) -> Cell {
        let mut cell = Cell::code(block.serialize().trim_end());
        cell.metadata
            .insert("jupyter".into(), json!({ "source_hidden": true }));
        self.prepare_cell(cell)
    }

    /// Return a copy whose first code cell carries `block`. Without any code
    /// cell, a hidden metadata cell is prepended.
    pub fn with_metadata_block(&self, block: &MetadataBlock) -> Result<NotebookDocument, ParseError> {
        let mut next = self.clone();
        match next.first_code_cell() {
            Some(index) => {
                let cell = &mut next.cells[index];
                let script = ScriptDocument::from_text(&cell.source)?;
                let mut source = script.with_metadata_block(block).to_text();
                if !cell.source.ends_with('\n') && source.ends_with('\n') {
                    source.truncate(source.trim_end_matches(['\n', '\r']).len());
                }
                cell.source = source;
            }
            None => {
                let cell = self.metadata_cell(block);
                next.cells.insert(0, cell);
            }
        }
        Ok(next)
    }
}

fn take_version(object: &mut Bag, key: &str) -> Result<u64, ParseError> {
    match object.remove(key) {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| ParseError::InvalidSchema(format!("`{key}` must be an integer"))),
        None => Err(ParseError::InvalidSchema(format!("missing `{key}`"))),
    }
}
