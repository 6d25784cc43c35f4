//! Property-based tests for the metadata block and its placement.

use juv::convert::{notebook_to_script, script_to_notebook};
use juv::editor;
use juv::notebook::{Cell, CellKind, NotebookDocument};
use juv::pep723::MetadataBlock;
use juv::script::ScriptDocument;
use juv::specifier::normalize_name;
use proptest::prelude::*;

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,6}(-[a-z0-9]{1,4})?"
}

fn arb_constraint() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        (
            prop::sample::select(vec![">=", "<", "==", "~=", "!="]),
            "[1-9][0-9]?\\.[0-9]{1,2}",
        )
            .prop_map(|(op, version)| format!("{op}{version}")),
    ]
}

fn arb_specifier() -> impl Strategy<Value = String> {
    (arb_name(), arb_constraint()).prop_map(|(name, constraint)| format!("{name}{constraint}"))
}

fn arb_block() -> impl Strategy<Value = MetadataBlock> {
    (
        prop::collection::vec(arb_specifier(), 0..8),
        prop::option::of("3\\.[0-9]{1,2}"),
    )
        .prop_map(|(specifiers, python)| {
            let mut block = editor::add(&MetadataBlock::default(), &specifiers).unwrap();
            if let Some(python) = python {
                block = editor::set_requires_python(&block, &format!(">={python}")).unwrap();
            }
            block
        })
}

/// Script bodies with no metadata block, shebang or cell marker, whose first
/// line is code.
fn arb_body() -> impl Strategy<Value = String> {
    (
        "[a-z][a-z =()0-9]{0,20}",
        prop::collection::vec(prop_oneof!["[a-z][a-z =()0-9]{0,20}", Just(String::new())], 0..6),
    )
        .prop_map(|(first, rest)| {
            let mut text = first;
            text.push('\n');
            for line in rest {
                text.push_str(&line);
                text.push('\n');
            }
            text
        })
}

fn arb_cell_line() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "# %%",
            "# %% [markdown]",
            "%% magic",
            "/// script",
            "# /// script",
            "# ///",
            "///",
            "",
            "#",
            "# # %%",
            "# # foo",
        ])
        .prop_map(String::from),
        "[a-z #%/]{0,10}",
    ]
}

fn arb_cell() -> impl Strategy<Value = (CellKind, String)> {
    (
        prop::sample::select(vec![CellKind::Code, CellKind::Markdown, CellKind::Raw]),
        prop::collection::vec(arb_cell_line(), 0..6),
    )
        .prop_map(|(kind, lines)| (kind, lines.join("\n")))
}

/// Conversion does not keep trailing blank lines of a cell.
fn without_trailing_blank_lines(source: &str) -> String {
    let mut lines: Vec<&str> = source.split('\n').collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

proptest! {
    #[test]
    fn serialize_then_parse_is_identity(block in arb_block()) {
        let parsed = MetadataBlock::parse(&block.serialize()).unwrap();
        prop_assert_eq!(parsed, block);
    }

    #[test]
    fn serialized_text_is_a_fixed_point(block in arb_block()) {
        let text = block.serialize();
        prop_assert_eq!(MetadataBlock::parse(&text).unwrap().serialize(), text);
    }

    #[test]
    fn adding_disjoint_lists_yields_the_union(
        first in prop::collection::btree_map("a[a-z]{1,5}", arb_constraint(), 0..5),
        second in prop::collection::btree_map("b[a-z]{1,5}", arb_constraint(), 0..5),
    ) {
        let specifiers = |map: &std::collections::BTreeMap<String, String>| -> Vec<String> {
            map.iter().map(|(name, constraint)| format!("{name}{constraint}")).collect()
        };
        let first = specifiers(&first);
        let second = specifiers(&second);

        let block = editor::add(&MetadataBlock::default(), &first).unwrap();
        let block = editor::add(&block, &second).unwrap();

        // Both maps iterate by name and every `a…` name sorts before `b…`.
        let expected: Vec<String> = first.into_iter().chain(second).collect();
        prop_assert_eq!(block.dependency_strings(), expected);
    }

    #[test]
    fn dependencies_are_unique_and_sorted(specifiers in prop::collection::vec(arb_specifier(), 0..12)) {
        let block = editor::add(&MetadataBlock::default(), &specifiers).unwrap();
        let names: Vec<String> = block
            .dependencies()
            .map(|requirement| normalize_name(&requirement.name))
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(names, sorted);
    }

    #[test]
    fn adding_then_removing_a_new_package_restores_the_block(
        block in arb_block(),
        name in "zz[a-z]{1,5}",
    ) {
        prop_assume!(block.dependency(&name).is_none());
        let added = editor::add(&block, &[name.as_str()]).unwrap();
        prop_assert!(added.dependency(&name).is_some());
        let removed = editor::remove(&added, &[name.as_str()]);
        prop_assert_eq!(removed, block);
    }

    #[test]
    fn inserting_a_block_leaves_the_body_alone(block in arb_block(), body in arb_body()) {
        let script = ScriptDocument::from_text(&body).unwrap();
        let with_block = script.with_metadata_block(&block);

        prop_assert!(with_block.to_text().starts_with("# /// script\n"));
        prop_assert_eq!(with_block.metadata_block().unwrap(), Some(block));
        prop_assert_eq!(with_block.without_metadata_block().to_text(), body);
    }

    #[test]
    fn block_survives_conversion(block in arb_block(), body in arb_body()) {
        let script = ScriptDocument::from_text(&body)
            .unwrap()
            .with_metadata_block(&block);

        let notebook = script_to_notebook(&script).unwrap().document;
        prop_assert_eq!(notebook.metadata_block().unwrap(), Some(block.clone()));

        let back = notebook_to_script(&notebook).unwrap().document;
        prop_assert_eq!(back.metadata_block().unwrap(), Some(block));
        prop_assert_eq!(back.metadata_block_span().map(|span| span.start), Some(0));
    }

    #[test]
    fn cells_survive_a_script_round_trip(cells in prop::collection::vec(arb_cell(), 0..6)) {
        let mut notebook = NotebookDocument::new();
        notebook.push_cell(Cell::code("import os"));
        for (kind, source) in &cells {
            notebook.push_cell(Cell::new(*kind, source.as_str()));
        }

        let script = notebook_to_script(&notebook).unwrap().document;
        prop_assert_eq!(script.metadata_block().unwrap(), None);
        let back = script_to_notebook(&script).unwrap().document;

        let expected: Vec<(CellKind, String)> =
            std::iter::once((CellKind::Code, "import os".to_string()))
                .chain(
                    cells
                        .iter()
                        .map(|(kind, source)| (*kind, without_trailing_blank_lines(source))),
                )
                .collect();
        let actual: Vec<(CellKind, String)> = back
            .cells
            .iter()
            .map(|cell| (cell.kind, cell.source.clone()))
            .collect();
        prop_assert_eq!(actual, expected);
    }
}
