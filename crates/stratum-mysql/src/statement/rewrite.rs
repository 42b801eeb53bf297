//! Multi-value INSERT batch rewriting.
//!
//! Folds N batched executions of one parameterized INSERT into a single
//! multi-value statement by splicing the pre-parsed head, value-group, and
//! ODKU-tail segment arrays. No character of the original SQL is
//! re-scanned: each boundary between templates is a byte concatenation of
//! two existing segments, so building an N-row rewrite costs O(N) segment
//! operations.

use stratum_core::{Error, Result};

use super::parser::ParsedStatement;

/// Synthesize the parse of the `batch_size`-row expansion of `parsed`.
///
/// Deterministic and side-effect-free: the same inputs always produce a
/// byte-identical segment array, so results are safe to cache.
///
/// Fails when the statement carries no rewrite bundle (not an eligible
/// INSERT, or VALUES-clause extraction failed) or `batch_size` is zero.
pub fn build(parsed: &ParsedStatement, batch_size: usize) -> Result<ParsedStatement> {
    let Some(bundle) = parsed.batch_bundle() else {
        return Err(Error::Custom(
            "statement is not eligible for multi-value rewriting".to_string(),
        ));
    };
    if batch_size == 0 {
        return Err(Error::Custom("batch size must be at least 1".to_string()));
    }

    // A single row is the original statement
    if batch_size == 1 {
        return Ok(parsed.clone());
    }

    let head_segments = bundle.head.static_segments();

    // The head supplies the first value group; the ODKU template (when
    // present) supplies the last one together with the update clause
    let value_repeats = if bundle.odku.is_some() {
        batch_size - 2
    } else {
        batch_size - 1
    };

    let mut segments: Vec<Vec<u8>> =
        Vec::with_capacity(head_segments.len() + value_repeats * bundle.values.static_segments().len());
    segments.extend_from_slice(&head_segments[..head_segments.len() - 1]);

    // `pending` is the segment currently being grown; each template merge
    // concatenates the boundary instead of opening a new segment
    let mut pending = head_segments[head_segments.len() - 1].clone();

    for _ in 0..value_repeats {
        splice_template(&mut segments, &mut pending, bundle.values.static_segments());
    }

    if let Some(odku) = &bundle.odku {
        splice_template(&mut segments, &mut pending, odku.static_segments());
    } else {
        pending.extend_from_slice(&bundle.trailing);
    }
    segments.push(pending);

    Ok(ParsedStatement::from_segments(segments, parsed))
}

/// Append one template: merge its first segment into the pending boundary,
/// copy the interior, and leave its last segment as the new boundary.
fn splice_template(segments: &mut Vec<Vec<u8>>, pending: &mut Vec<u8>, template: &[Vec<u8>]) {
    pending.extend_from_slice(&template[0]);
    if template.len() > 1 {
        segments.push(std::mem::take(pending));
        segments.extend_from_slice(&template[1..template.len() - 1]);
        *pending = template[template.len() - 1].clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::parser::ParseOptions;

    fn parse_rewrite(sql: &str) -> ParsedStatement {
        ParsedStatement::parse(
            sql,
            ParseOptions {
                build_rewrite_info: true,
                ..ParseOptions::default()
            },
        )
        .unwrap()
    }

    /// Manually expand an INSERT by repeating its values clause.
    fn expand(head: &str, clause: &str, tail: &str, n: usize) -> String {
        let mut out = String::from(head);
        out.push_str(clause);
        for _ in 1..n {
            out.push(',');
            out.push_str(clause);
        }
        out.push_str(tail);
        out
    }

    #[test]
    fn test_rewrite_matches_reparse_of_expanded_sql() {
        let parsed = parse_rewrite("INSERT INTO t (a, b) VALUES (?, ?)");

        for n in [1usize, 2, 5, 100] {
            let built = build(&parsed, n).unwrap();
            let expanded = expand("INSERT INTO t (a, b) VALUES ", "(?, ?)", "", n);
            let reparsed =
                ParsedStatement::parse(&expanded, ParseOptions::default()).unwrap();

            assert_eq!(built.to_sql_text(), expanded, "n={n}");
            assert_eq!(
                built.static_segments(),
                reparsed.static_segments(),
                "segment arrays must be byte-identical, n={n}"
            );
            assert_eq!(built.parameter_count(), 2 * n);
        }
    }

    #[test]
    fn test_rewrite_with_odku_tail() {
        let parsed =
            parse_rewrite("INSERT INTO t (a) VALUES (?) ON DUPLICATE KEY UPDATE a = a + 1");

        for n in [1usize, 2, 5, 100] {
            let built = build(&parsed, n).unwrap();
            let expanded = expand(
                "INSERT INTO t (a) VALUES ",
                "(?)",
                " ON DUPLICATE KEY UPDATE a = a + 1",
                n,
            );
            let reparsed =
                ParsedStatement::parse(&expanded, ParseOptions::default()).unwrap();

            assert_eq!(built.to_sql_text(), expanded, "n={n}");
            assert_eq!(built.static_segments(), reparsed.static_segments(), "n={n}");
            assert_eq!(built.parameter_count(), n);
        }
    }

    #[test]
    fn test_rewrite_mixed_literal_group() {
        // Value group with literals alongside placeholders
        let parsed = parse_rewrite("INSERT INTO t (a, b, c) VALUES (?, NOW(), ?)");
        let built = build(&parsed, 3).unwrap();
        assert_eq!(
            built.to_sql_text(),
            "INSERT INTO t (a, b, c) VALUES (?, NOW(), ?),(?, NOW(), ?),(?, NOW(), ?)"
        );
        assert_eq!(built.parameter_count(), 6);
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let parsed = parse_rewrite("INSERT INTO t (a) VALUES (?)");
        let first = build(&parsed, 7).unwrap();
        let second = build(&parsed, 7).unwrap();
        assert_eq!(first.static_segments(), second.static_segments());
    }

    #[test]
    fn test_rewrite_requires_bundle() {
        let parsed = ParsedStatement::parse("UPDATE t SET a = ?", ParseOptions::default()).unwrap();
        assert!(build(&parsed, 2).is_err());
    }

    #[test]
    fn test_rewrite_rejects_zero_batch() {
        let parsed = parse_rewrite("INSERT INTO t (a) VALUES (?)");
        assert!(build(&parsed, 0).is_err());
    }
}
