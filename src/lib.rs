//! Jupyter notebooks and Python scripts that carry their own dependencies.
//!
//! The core is a set of pure transformations:
//! [`pep723`] parses and writes the inline `# /// script` metadata block,
//! [`editor`] edits it, [`script`] and [`notebook`] embed it in documents,
//! and [`convert`] moves documents between the two shapes.
//! The remaining modules are the `juv` command line around that core.

pub mod cat;
pub mod cli;
pub mod commands;
pub mod convert;
pub mod document;
pub mod editor;
pub mod entry;
pub mod notebook;
pub mod pep723;
pub mod runtime;
pub mod schema;
pub mod script;
pub mod specifier;
pub mod stamp;
