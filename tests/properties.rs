//! Property-based tests for the lexer and block slicer.
//!
//! These guard the front-end invariants that hold for arbitrary input:
//! no panics, in-bounds spans, and 1-based positions.

use db_catalyst::DiagnosticSink;
use db_catalyst::input::slicer::slice_blocks;
use db_catalyst::parser::lexer::tokenize;
use proptest::prelude::*;

proptest! {
    #[test]
    fn lexer_never_panics(src in ".{0,400}") {
        let _ = tokenize("fuzz.sql", &src);
    }

    #[test]
    fn lexer_spans_are_in_bounds_and_one_based(src in "[ -~\n]{0,300}") {
        let (tokens, diagnostics) = tokenize("fuzz.sql", &src);
        for tok in &tokens {
            prop_assert!(tok.span.start_line >= 1);
            prop_assert!(tok.span.start_col >= 1);
            prop_assert!(tok.span.start_offset <= src.len());
            prop_assert!(tok.span.end_offset <= src.len());
            prop_assert!(tok.span.start_offset <= tok.span.end_offset);
        }
        for d in &diagnostics {
            prop_assert!(d.line >= 1);
            prop_assert!(d.column >= 1);
        }
    }

    #[test]
    fn lexer_token_text_matches_source(src in "[ -~\n]{0,300}") {
        let (tokens, _) = tokenize("fuzz.sql", &src);
        for tok in &tokens {
            let slice = &src[tok.span.start_offset..tok.span.end_offset];
            prop_assert_eq!(slice, tok.text.as_str());
        }
    }

    #[test]
    fn slicer_never_panics(src in ".{0,400}") {
        let mut sink = DiagnosticSink::new();
        let _ = slice_blocks("fuzz.sql", &src, &mut sink);
    }

    #[test]
    fn slicer_bodies_are_source_slices(
        names in proptest::collection::vec("[A-Za-z][A-Za-z0-9]{0,8}", 1..4),
        bodies in proptest::collection::vec("[a-z0-9 ;\n]{0,40}", 1..4),
    ) {
        let mut src = String::new();
        for (name, body) in names.iter().zip(&bodies) {
            src.push_str(&format!("-- name: {name} :one\n{body}\n"));
        }
        let mut sink = DiagnosticSink::new();
        let blocks = slice_blocks("fuzz.sql", &src, &mut sink);
        for block in &blocks {
            prop_assert!(block.body_offset <= src.len());
            let slice = &src[block.body_offset..block.span.end_offset];
            prop_assert_eq!(slice, block.body_text.as_str());
            prop_assert!(!block.name.is_empty());
            prop_assert!(block.body_line >= 2);
        }
    }
}
