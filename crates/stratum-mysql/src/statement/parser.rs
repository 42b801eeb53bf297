//! SQL placeholder scanning.
//!
//! A single left-to-right pass splits the statement text into the static
//! byte segments between `?` placeholders, while tracking quoting modes,
//! comments, and backslash escapes. The scan also derives the facts the
//! batch rewriter needs: statement kind, `ON DUPLICATE KEY UPDATE`
//! location, and the extracted `VALUES (...)` clause.
//!
//! A parse is immutable and reusable; the same `ParsedStatement` backs
//! every execution of a prepared statement and is safe to cache by SQL
//! text.

use stratum_core::error::{StatementError, StatementErrorKind};
use stratum_core::{Error, Result};

/// Options controlling the scan, derived from session state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Server has `NO_BACKSLASH_ESCAPES` enabled; backslash is literal
    pub no_backslash_escapes: bool,
    /// `ANSI_QUOTES` mode: `"` quotes identifiers, not strings
    pub ansi_quotes: bool,
    /// Extract the VALUES clause and build the sub-parses used by batch
    /// rewriting (only done for rewrite-eligible INSERTs)
    pub build_rewrite_info: bool,
}

/// Sub-parses used to synthesize an N-row rewrite without re-scanning.
///
/// `head` covers the statement through the end of the first value group;
/// `values` is `"," + clause` and supplies each additional group; `odku`
/// (when present) is `"," + clause + <text after the clause>` and supplies
/// the final group together with the `ON DUPLICATE KEY UPDATE` tail.
#[derive(Debug, Clone)]
pub struct BatchBundle {
    pub head: ParsedStatement,
    pub values: ParsedStatement,
    pub odku: Option<ParsedStatement>,
    /// Text after the values clause when there is no ODKU tail
    pub trailing: Vec<u8>,
}

/// An immutable parse of one statement's text.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    sql: String,
    static_segments: Vec<Vec<u8>>,
    statement_start: usize,
    first_keyword: Option<char>,
    is_load_data: bool,
    odku_offset: Option<usize>,
    parameters_in_odku: bool,
    values_clause: Option<String>,
    can_rewrite: bool,
    batch_bundle: Option<Box<BatchBundle>>,
}

impl ParsedStatement {
    /// Scan `sql` once and produce a reusable parse.
    ///
    /// Fails with a `Malformed` statement error when `sql` is empty or a
    /// quoting error would push the scan out of bounds.
    pub fn parse(sql: &str, options: ParseOptions) -> Result<Self> {
        if sql.trim().is_empty() {
            return Err(malformed("statement text is empty"));
        }

        let bytes = sql.as_bytes();
        let statement_start = find_statement_start(bytes);
        let first_keyword = bytes
            .get(statement_start)
            .filter(|b| b.is_ascii_alphabetic())
            .map(|b| b.to_ascii_uppercase() as char);
        let is_load_data = starts_with_keyword(&bytes[statement_start..], b"LOAD DATA");

        let odku_offset = find_ignore_case(
            bytes,
            b"ON DUPLICATE KEY UPDATE",
            statement_start,
            bytes.len(),
            options,
        );

        let scan = scan_placeholders(bytes, options)?;
        let parameters_in_odku = match odku_offset {
            Some(odku) => scan.placeholder_offsets.iter().any(|&p| p > odku),
            None => false,
        };

        let mut parsed = Self {
            sql: sql.to_string(),
            static_segments: scan.segments,
            statement_start,
            first_keyword,
            is_load_data,
            odku_offset,
            parameters_in_odku,
            values_clause: None,
            can_rewrite: false,
            batch_bundle: None,
        };

        parsed.can_rewrite = parsed.check_rewrite_eligibility(options);
        if parsed.can_rewrite && options.build_rewrite_info {
            // A failed extraction silently degrades to per-statement
            // batching; it never errors
            parsed.build_rewrite_bundle(options);
        }

        Ok(parsed)
    }

    /// Build a parse from pre-assembled segments, carrying over the
    /// metadata of the statement it was derived from.
    pub(crate) fn from_segments(segments: Vec<Vec<u8>>, like: &ParsedStatement) -> Self {
        Self {
            sql: String::new(),
            static_segments: segments,
            statement_start: 0,
            first_keyword: like.first_keyword,
            is_load_data: like.is_load_data,
            odku_offset: like.odku_offset,
            parameters_in_odku: like.parameters_in_odku,
            values_clause: None,
            can_rewrite: false,
            batch_bundle: None,
        }
    }

    /// The original statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The static byte segments; always `parameter_count() + 1` entries.
    pub fn static_segments(&self) -> &[Vec<u8>] {
        &self.static_segments
    }

    /// Number of `?` placeholders found outside quotes and comments.
    pub fn parameter_count(&self) -> usize {
        self.static_segments.len() - 1
    }

    /// Offset of the first non-comment, non-whitespace byte.
    pub fn statement_start(&self) -> usize {
        self.statement_start
    }

    /// Uppercased first letter of the statement, the kind discriminator
    /// (`'S'` for SELECT, `'I'` for INSERT, ...).
    pub fn first_keyword_char(&self) -> Option<char> {
        self.first_keyword
    }

    /// Whether the statement reads as a query (`SELECT`/`SHOW`), safe to
    /// route to a read-only host.
    pub fn is_read_only(&self) -> bool {
        matches!(self.first_keyword, Some('S'))
    }

    /// Whether this is a `LOAD DATA` statement, whose text travels on the
    /// raw byte path rather than the connection charset.
    pub fn is_load_data(&self) -> bool {
        self.is_load_data
    }

    /// Byte offset of `ON DUPLICATE KEY UPDATE`, if present.
    pub fn on_duplicate_key_update_offset(&self) -> Option<usize> {
        self.odku_offset
    }

    /// Whether any placeholder sits inside the ODKU clause. Rewriting is
    /// disallowed in that case: folding would move per-row parameters
    /// across the clause boundary.
    pub fn parameters_in_odku_clause(&self) -> bool {
        self.parameters_in_odku
    }

    /// The extracted `VALUES (...)` clause text, when rewrite info was
    /// requested and extraction succeeded.
    ///
    /// Extraction is best-effort: the `VALUES` token is located by a
    /// delimiter-checked, case-insensitive search, which an unquoted
    /// identifier containing `values` ahead of the real clause can
    /// defeat. Extraction then fails and batch rewriting silently falls
    /// back to per-statement execution.
    pub fn values_clause(&self) -> Option<&str> {
        self.values_clause.as_deref()
    }

    /// Whether this statement is eligible for multi-value INSERT rewriting.
    pub fn can_rewrite_as_multi_value_insert(&self) -> bool {
        self.can_rewrite
    }

    /// The sub-parses backing batch rewriting, when available.
    pub(crate) fn batch_bundle(&self) -> Option<&BatchBundle> {
        self.batch_bundle.as_deref()
    }

    /// Interleave parameter literals with the static segments, producing
    /// the executable statement bytes.
    pub fn assemble(&self, params: &[&[u8]]) -> Result<Vec<u8>> {
        if params.len() != self.parameter_count() {
            return Err(Error::Statement(StatementError {
                kind: StatementErrorKind::ParameterNotSet,
                message: format!(
                    "statement takes {} parameters, {} given",
                    self.parameter_count(),
                    params.len()
                ),
            }));
        }

        let total: usize = self.static_segments.iter().map(Vec::len).sum::<usize>()
            + params.iter().map(|p| p.len()).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        for (i, segment) in self.static_segments.iter().enumerate() {
            out.extend_from_slice(segment);
            if let Some(param) = params.get(i) {
                out.extend_from_slice(param);
            }
        }
        Ok(out)
    }

    /// Render the parse back to statement text with `?` placeholders.
    pub fn to_sql_text(&self) -> String {
        let mut out = Vec::new();
        for (i, segment) in self.static_segments.iter().enumerate() {
            out.extend_from_slice(segment);
            if i + 1 < self.static_segments.len() {
                out.push(b'?');
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Conservative safety rule: only a plain INSERT with no subquery and
    /// an ODKU clause free of `LAST_INSERT_ID` and placeholders may be
    /// folded into a multi-value statement.
    fn check_rewrite_eligibility(&self, options: ParseOptions) -> bool {
        let bytes = self.sql.as_bytes();

        if !starts_with_keyword(&bytes[self.statement_start..], b"INSERT") {
            return false;
        }

        // A SELECT anywhere (subquery, INSERT ... SELECT) defeats folding
        if find_ignore_case(bytes, b"SELECT", self.statement_start, bytes.len(), options).is_some()
        {
            return false;
        }

        if let Some(odku) = self.odku_offset {
            if self.parameters_in_odku {
                return false;
            }
            // LAST_INSERT_ID in the update clause is per-row state; folding
            // would change auto-increment semantics
            if find_ignore_case(bytes, b"LAST_INSERT_ID", odku, bytes.len(), options).is_some() {
                return false;
            }
        }

        true
    }

    /// Locate the VALUES clause and build the head/values/odku sub-parses.
    fn build_rewrite_bundle(&mut self, options: ParseOptions) {
        let bytes = self.sql.as_bytes();
        let limit = self.odku_offset.unwrap_or(bytes.len());

        let Some(values_pos) = find_values_token(bytes, self.statement_start, limit, options)
        else {
            return;
        };
        let Some(open) = find_byte_outside_quotes(bytes, b'(', values_pos + 6, limit, options)
        else {
            return;
        };
        let Some(close) = find_last_byte_outside_quotes(bytes, b')', open, limit, options) else {
            return;
        };
        if close <= open {
            return;
        }

        let clause = &self.sql[open..=close];
        let tail = &self.sql[close + 1..];

        let sub_options = ParseOptions {
            build_rewrite_info: false,
            ..options
        };

        let head = ParsedStatement::parse(&self.sql[..=close], sub_options);
        let values = ParsedStatement::parse(&format!(",{clause}"), sub_options);
        let odku = match self.odku_offset {
            Some(_) => match ParsedStatement::parse(&format!(",{clause}{tail}"), sub_options) {
                Ok(parsed) => Some(parsed),
                Err(_) => return,
            },
            None => None,
        };

        if let (Ok(head), Ok(values)) = (head, values) {
            self.values_clause = Some(clause.to_string());
            self.batch_bundle = Some(Box::new(BatchBundle {
                head,
                values,
                odku,
                trailing: tail.as_bytes().to_vec(),
            }));
        }
    }
}

struct ScanResult {
    segments: Vec<Vec<u8>>,
    placeholder_offsets: Vec<usize>,
}

/// The single-pass placeholder scan.
fn scan_placeholders(bytes: &[u8], options: ParseOptions) -> Result<ScanResult> {
    let mut segments = Vec::new();
    let mut placeholder_offsets = Vec::new();
    let mut last_end = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i = skip_quoted(bytes, i, b'\'', !options.no_backslash_escapes)?;
            }
            b'"' => {
                // In ANSI_QUOTES mode this is an identifier quote with no
                // backslash processing; otherwise a string
                let backslash = !options.no_backslash_escapes && !options.ansi_quotes;
                i = skip_quoted(bytes, i, b'"', backslash)?;
            }
            b'`' => {
                i = skip_quoted(bytes, i, b'`', false)?;
            }
            b'#' => {
                i = skip_line_comment(bytes, i);
            }
            b'-' if is_dash_comment(bytes, i) => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
            }
            b'?' => {
                segments.push(bytes[last_end..i].to_vec());
                placeholder_offsets.push(i);
                last_end = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }

    segments.push(bytes[last_end..].to_vec());
    Ok(ScanResult {
        segments,
        placeholder_offsets,
    })
}

/// Skip a quoted region starting at the opening quote; returns the index
/// just past the closing quote. Doubled quotes are inline escapes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> Result<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && backslash_escapes {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(malformed(format!(
        "unterminated {} starting at offset {start}",
        if quote == b'`' { "identifier" } else { "string" }
    )))
}

fn is_dash_comment(bytes: &[u8], i: usize) -> bool {
    bytes.get(i + 1) == Some(&b'-')
        && bytes
            .get(i + 2)
            .is_none_or(|b| b.is_ascii_whitespace())
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Offset of the first byte after leading whitespace and comments.
fn find_statement_start(bytes: &[u8]) -> usize {
    let mut i = 0;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return i;
        }
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'#' => i = skip_line_comment(bytes, i),
            b'-' if is_dash_comment(bytes, i) => i = skip_line_comment(bytes, i),
            _ => return i,
        }
    }
}

fn starts_with_keyword(bytes: &[u8], keyword: &[u8]) -> bool {
    bytes.len() >= keyword.len()
        && bytes[..keyword.len()].eq_ignore_ascii_case(keyword)
        && bytes
            .get(keyword.len())
            .is_none_or(|b| !is_identifier_byte(*b))
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Case-insensitive substring search skipping quoted regions and comments.
fn find_ignore_case(
    bytes: &[u8],
    needle: &[u8],
    from: usize,
    to: usize,
    options: ParseOptions,
) -> Option<usize> {
    let mut i = from;
    while i < to {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\'', !options.no_backslash_escapes).ok()?,
            b'"' => {
                let backslash = !options.no_backslash_escapes && !options.ansi_quotes;
                i = skip_quoted(bytes, i, b'"', backslash).ok()?;
            }
            b'`' => i = skip_quoted(bytes, i, b'`', false).ok()?,
            b'#' => i = skip_line_comment(bytes, i),
            b'-' if is_dash_comment(bytes, i) => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            _ => {
                if i + needle.len() <= to && bytes[i..i + needle.len()].eq_ignore_ascii_case(needle)
                {
                    return Some(i);
                }
                i += 1;
            }
        }
    }
    None
}

/// Locate the `VALUES` token, requiring it to be delimited on both sides
/// (not a substring of a longer identifier).
fn find_values_token(
    bytes: &[u8],
    from: usize,
    to: usize,
    options: ParseOptions,
) -> Option<usize> {
    let mut search_from = from;
    while let Some(pos) = find_ignore_case(bytes, b"VALUES", search_from, to, options) {
        let delimited_before = pos == from || !is_identifier_byte(bytes[pos - 1]);
        let delimited_after = bytes.get(pos + 6).is_none_or(|b| !is_identifier_byte(*b));
        if delimited_before && delimited_after {
            return Some(pos);
        }
        search_from = pos + 1;
    }
    None
}

fn find_byte_outside_quotes(
    bytes: &[u8],
    target: u8,
    from: usize,
    to: usize,
    options: ParseOptions,
) -> Option<usize> {
    let needle = [target];
    find_ignore_case(bytes, &needle, from, to, options)
}

fn find_last_byte_outside_quotes(
    bytes: &[u8],
    target: u8,
    from: usize,
    to: usize,
    options: ParseOptions,
) -> Option<usize> {
    let mut last = None;
    let mut search_from = from;
    while let Some(pos) = find_byte_outside_quotes(bytes, target, search_from, to, options) {
        last = Some(pos);
        search_from = pos + 1;
    }
    last
}

fn malformed(message: impl Into<String>) -> Error {
    Error::Statement(StatementError {
        kind: StatementErrorKind::Malformed,
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::error::StatementErrorKind;

    fn parse(sql: &str) -> ParsedStatement {
        ParsedStatement::parse(sql, ParseOptions::default()).unwrap()
    }

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

    #[test]
    fn test_empty_statement_is_malformed() {
        for sql in ["", "   ", "\t\n"] {
            let err = ParsedStatement::parse(sql, ParseOptions::default()).unwrap_err();
            match err {
                stratum_core::Error::Statement(e) => {
                    assert_eq!(e.kind, StatementErrorKind::Malformed);
                }
                other => panic!("expected statement error, got {other}"),
            }
        }
    }

    #[test]
    fn test_unterminated_quote_is_malformed() {
        let err =
            ParsedStatement::parse("SELECT 'oops", ParseOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            stratum_core::Error::Statement(StatementError {
                kind: StatementErrorKind::Malformed,
                ..
            })
        ));

        // Trailing backslash escape runs past the end of the text
        let err =
            ParsedStatement::parse("SELECT 'a\\", ParseOptions::default()).unwrap_err();
        assert!(matches!(err, stratum_core::Error::Statement(_)));
    }

    #[test]
    fn test_zero_placeholders_single_segment() {
        let parsed = parse("SELECT 1");
        assert_eq!(parsed.parameter_count(), 0);
        assert_eq!(parsed.static_segments().len(), 1);
        assert_eq!(parsed.first_keyword_char(), Some('S'));
        assert!(parsed.is_read_only());
    }

    #[test]
    fn test_placeholder_segmentation() {
        let parsed = parse("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(parsed.parameter_count(), 2);
        assert_eq!(parsed.static_segments()[0], b"SELECT * FROM t WHERE a = ");
        assert_eq!(parsed.static_segments()[1], b" AND b = ");
        assert_eq!(parsed.static_segments()[2], b"");
    }

    #[test]
    fn test_placeholders_in_quotes_ignored() {
        let parsed = parse("SELECT '?', \"?\", `a?b`, 'it''s?' FROM t WHERE c = ?");
        assert_eq!(parsed.parameter_count(), 1);

        let parsed = parse(r"SELECT 'esc\'?' FROM t WHERE c = ?");
        assert_eq!(parsed.parameter_count(), 1);
    }

    #[test]
    fn test_placeholders_in_comments_ignored() {
        let parsed = parse("SELECT /* ? */ 1 -- ?\n FROM t WHERE a = ? # ?");
        assert_eq!(parsed.parameter_count(), 1);
    }

    #[test]
    fn test_leading_comment_statement_start() {
        let parsed = parse("/* routing hint */  INSERT INTO t VALUES (?)");
        assert_eq!(parsed.first_keyword_char(), Some('I'));
        assert!(!parsed.is_read_only());
        assert_eq!(
            parsed.statement_start(),
            "/* routing hint */  ".len()
        );
    }

    #[test]
    fn test_load_data_detection() {
        let parsed = parse("LOAD DATA INFILE 'f.csv' INTO TABLE t");
        assert!(parsed.is_load_data());
        assert_eq!(parsed.first_keyword_char(), Some('L'));
        assert!(!parse("SELECT 1").is_load_data());
    }

    #[test]
    fn test_segment_round_trip() {
        let sql = "INSERT INTO t (a, b, c) VALUES (?, ?, ?)";
        let parsed = parse(sql);
        let assembled = parsed
            .assemble(&[b"1".as_slice(), b"'x'".as_slice(), b"NULL".as_slice()])
            .unwrap();
        assert_eq!(
            assembled,
            b"INSERT INTO t (a, b, c) VALUES (1, 'x', NULL)"
        );

        // Joining the segments back with ? reproduces the original text
        assert_eq!(parsed.to_sql_text(), sql);
    }

    #[test]
    fn test_assemble_arity_mismatch() {
        let parsed = parse("SELECT ?");
        assert!(parsed.assemble(&[]).is_err());
    }

    #[test]
    fn test_odku_detection() {
        let parsed = parse("INSERT INTO t (a) VALUES (?) ON DUPLICATE KEY UPDATE a = a + 1");
        assert!(parsed.on_duplicate_key_update_offset().is_some());
        assert!(!parsed.parameters_in_odku_clause());

        let parsed = parse("INSERT INTO t (a) VALUES (?) ON DUPLICATE KEY UPDATE a = ?");
        assert!(parsed.parameters_in_odku_clause());

        // Quoted occurrence is not a clause
        let parsed = parse("INSERT INTO t (a) VALUES ('ON DUPLICATE KEY UPDATE')");
        assert!(parsed.on_duplicate_key_update_offset().is_none());
    }

    #[test]
    fn test_rewrite_eligibility() {
        assert!(parse("INSERT INTO t (a) VALUES (?)").can_rewrite_as_multi_value_insert());
        assert!(
            parse("insert into t (a) values (?)").can_rewrite_as_multi_value_insert(),
            "keyword match is case-insensitive"
        );
        assert!(!parse("UPDATE t SET a = ?").can_rewrite_as_multi_value_insert());
        assert!(
            !parse("INSERT INTO t (a) SELECT b FROM s").can_rewrite_as_multi_value_insert()
        );
    }

    #[test]
    fn test_odku_safety_rules() {
        // LAST_INSERT_ID in the ODKU clause disables rewriting
        let parsed =
            parse("INSERT INTO t (id) VALUES (?) ON DUPLICATE KEY UPDATE id=LAST_INSERT_ID(id)");
        assert!(!parsed.can_rewrite_as_multi_value_insert());

        // A placeholder inside the ODKU clause disables rewriting
        let parsed = parse("INSERT INTO t (a) VALUES (?) ON DUPLICATE KEY UPDATE a = ?");
        assert!(!parsed.can_rewrite_as_multi_value_insert());

        // A plain ODKU clause keeps it eligible
        let parsed = parse("INSERT INTO t (a) VALUES (?) ON DUPLICATE KEY UPDATE a = a + 1");
        assert!(parsed.can_rewrite_as_multi_value_insert());
    }

    #[test]
    fn test_values_clause_extraction() {
        let parsed = parse_rewrite("INSERT INTO t (a, b) VALUES (?, NOW())");
        assert_eq!(parsed.values_clause(), Some("(?, NOW())"));
        let bundle = parsed.batch_bundle().unwrap();
        assert_eq!(bundle.head.to_sql_text(), "INSERT INTO t (a, b) VALUES (?, NOW())");
        assert_eq!(bundle.values.to_sql_text(), ",(?, NOW())");
        assert!(bundle.odku.is_none());
        assert!(bundle.trailing.is_empty());
    }

    #[test]
    fn test_values_clause_extraction_with_odku() {
        let parsed =
            parse_rewrite("INSERT INTO t (a) VALUES (?) ON DUPLICATE KEY UPDATE a = a + 1");
        let bundle = parsed.batch_bundle().unwrap();
        let odku = bundle.odku.as_ref().unwrap();
        assert_eq!(
            odku.to_sql_text(),
            ",(?) ON DUPLICATE KEY UPDATE a = a + 1"
        );
    }

    #[test]
    fn test_values_token_not_matched_inside_identifier() {
        // myvalues is not the VALUES keyword; the real one follows
        let parsed = parse_rewrite("INSERT INTO myvalues (a) VALUES (?)");
        assert_eq!(parsed.values_clause(), Some("(?)"));
    }

    #[test]
    fn test_failed_extraction_degrades_silently() {
        // Eligible INSERT but no parenthesized group to extract
        let parsed = parse_rewrite("INSERT INTO t SET a = ?");
        assert!(parsed.values_clause().is_none());
        assert!(parsed.batch_bundle().is_none());
    }

    #[test]
    fn test_no_backslash_escapes_mode() {
        // With backslash escapes off, a backslash does not escape the quote
        let options = ParseOptions {
            no_backslash_escapes: true,
            ..ParseOptions::default()
        };
        let parsed = ParsedStatement::parse(r"SELECT 'a\' , ?", options).unwrap();
        // The literal is 'a\' and the ? is a real placeholder
        assert_eq!(parsed.parameter_count(), 1);
    }

    #[test]
    fn test_ansi_quotes_mode() {
        let options = ParseOptions {
            ansi_quotes: true,
            ..ParseOptions::default()
        };
        // "col?name" is an identifier either way; scan must not see the ?
        let parsed = ParsedStatement::parse("SELECT \"col?name\" FROM t WHERE a = ?", options)
            .unwrap();
        assert_eq!(parsed.parameter_count(), 1);
    }
}
