//! SQLite → PostgreSQL dialect rewriter
//!
//! The engine authors every query in the SQLite dialect. The hosted backend
//! pushes each statement through this rewriter before execution. The
//! substitutions are exhaustive; anything not listed passes through
//! unchanged, and running the rewriter on already-rewritten SQL is a no-op.
//!
//! | SQLite input                         | Postgres output                              |
//! |--------------------------------------|----------------------------------------------|
//! | `?` placeholders                     | `$1, $2, ...` in left-to-right order         |
//! | `datetime('now')`                    | `CURRENT_TIMESTAMP`                          |
//! | `datetime('now', '+N unit')`         | `CURRENT_TIMESTAMP + INTERVAL 'N unit'`      |
//! | `datetime('now', '-N unit')`         | `CURRENT_TIMESTAMP - INTERVAL 'N unit'`      |
//! | `json_extract(col, '$.a.b.c')`       | `col -> 'a' -> 'b' ->> 'c'`                  |
//! | `knowledge_fts MATCH ?`              | `search_vector @@ plainto_tsquery($N)`       |
//! | `JOIN knowledge_fts fts ON ...`      | stripped (FTS is a generated column)         |
//! | logical table names                  | physical `vestige_*` names                   |
//!
//! Table renames happen only in table positions (after FROM/JOIN/INTO/
//! UPDATE/TABLE) with identifier-boundary matching, so a *column* that
//! happens to share a logical table's name is left alone.

/// Logical (SQLite) to physical (Postgres) table names.
pub const LOGICAL_TO_PHYSICAL: &[(&str, &str)] = &[
    ("knowledge_nodes", "vestige_knowledge"),
    ("people", "vestige_people"),
    ("graph_edges", "vestige_edges"),
    ("intentions", "vestige_intentions"),
    ("vestige_metadata", "vestige_metadata"),
];

/// Rewrite one SQLite-dialect statement into the Postgres dialect.
pub fn rewrite_to_postgres(sql: &str) -> String {
    let sql = strip_fts_join(sql);
    let sql = rewrite_fts_match(&sql);
    let sql = rewrite_datetime(&sql);
    let sql = rewrite_json_extract(&sql);
    let sql = rename_tables(&sql);
    number_placeholders(&sql)
}

// ============================================================================
// TOKENIZING HELPERS
// ============================================================================

/// True when the byte can be part of a SQL identifier.
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find `needle` as a whole identifier at or after `from`, skipping
/// single-quoted literals. Case-insensitive, byte-level (safe for any UTF-8
/// payload in literals). Returns the byte offset.
fn find_identifier(sql: &str, needle: &str, from: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let needle = needle.as_bytes();
    let mut i = from;
    let mut in_string = false;

    while i + needle.len() <= bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        if !in_string && bytes[i..i + needle.len()].eq_ignore_ascii_case(needle) {
            let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
            let end = i + needle.len();
            let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
            if before_ok && after_ok {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Skip whitespace forward from `i`.
fn skip_ws(sql: &str, mut i: usize) -> usize {
    let bytes = sql.as_bytes();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Read an identifier (possibly dot-qualified) starting at `i`.
fn read_qualified_ident(sql: &str, start: usize) -> Option<(usize, &str)> {
    let bytes = sql.as_bytes();
    let mut i = start;
    while i < bytes.len() && (is_ident_byte(bytes[i]) || bytes[i] == b'.') {
        i += 1;
    }
    if i > start {
        Some((i, &sql[start..i]))
    } else {
        None
    }
}

// ============================================================================
// FTS REWRITES
// ============================================================================

/// Strip `JOIN knowledge_fts <alias> ON <condition>`: the Postgres schema
/// keeps the search vector as a generated column on the knowledge table, so
/// the join has nothing to join against.
fn strip_fts_join(sql: &str) -> String {
    let Some(join_pos) = find_join_of_fts(sql) else {
        return sql.to_string();
    };

    // The stripped span ends at the next top-level clause keyword (or EOF)
    let after_on = join_pos + 4; // past "JOIN"
    let terminators = ["where", "group", "order", "limit", "join", "union"];
    let mut end = sql.len();
    for term in terminators {
        if let Some(pos) = find_identifier(sql, term, after_on) {
            end = end.min(pos);
        }
    }

    let mut out = String::with_capacity(sql.len());
    out.push_str(sql[..join_pos].trim_end());
    out.push(' ');
    out.push_str(&sql[end..]);
    out.trim_end().to_string()
}

/// Locate a `JOIN` whose joined table is `knowledge_fts`.
fn find_join_of_fts(sql: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(join_pos) = find_identifier(sql, "join", from) {
        let after = skip_ws(sql, join_pos + 4);
        if let Some((_, ident)) = read_qualified_ident(sql, after) {
            if ident.eq_ignore_ascii_case("knowledge_fts") {
                return Some(join_pos);
            }
        }
        from = join_pos + 4;
    }
    None
}

/// `knowledge_fts MATCH ?` → `search_vector @@ plainto_tsquery(?)`.
///
/// The `?` stays a `?` here; placeholder numbering happens last so the
/// argument keeps its left-to-right position.
fn rewrite_fts_match(sql: &str) -> String {
    let mut out = sql.to_string();
    let mut from = 0;
    while let Some(pos) = find_identifier(&out, "knowledge_fts", from) {
        let after = skip_ws(&out, pos + "knowledge_fts".len());
        let is_match = out.as_bytes().len() >= after + 5
            && out.as_bytes()[after..after + 5].eq_ignore_ascii_case(b"match");
        if !is_match {
            from = pos + "knowledge_fts".len();
            continue;
        }
        let q = skip_ws(&out, after + 5);
        if out.as_bytes().get(q) != Some(&b'?') {
            from = pos + "knowledge_fts".len();
            continue;
        }
        out.replace_range(pos..=q, "search_vector @@ plainto_tsquery(?)");
        from = pos;
    }
    out
}

// ============================================================================
// DATETIME REWRITE
// ============================================================================

/// `datetime('now')` and `datetime('now', '+/-N unit')` forms.
fn rewrite_datetime(sql: &str) -> String {
    let mut out = sql.to_string();
    let mut from = 0;
    while let Some(pos) = find_identifier(&out, "datetime", from) {
        let open = skip_ws(&out, pos + "datetime".len());
        if out.as_bytes().get(open) != Some(&b'(') {
            from = pos + 8;
            continue;
        }
        let Some(close_rel) = out[open..].find(')') else {
            break;
        };
        let close = open + close_rel;
        let args: Vec<String> = out[open + 1..close]
            .split(',')
            .map(|a| a.trim().trim_matches('\'').to_string())
            .collect();

        let replacement = match args.as_slice() {
            [now] if now == "now" => Some("CURRENT_TIMESTAMP".to_string()),
            [now, modifier] if now == "now" => parse_interval_modifier(modifier),
            _ => None,
        };

        match replacement {
            Some(text) => {
                out.replace_range(pos..=close, &text);
                from = pos + text.len();
            }
            None => {
                // Unknown form passes through unchanged
                from = close + 1;
            }
        }
    }
    out
}

/// `+N unit` / `-N unit` → `CURRENT_TIMESTAMP ± INTERVAL 'N unit'`.
fn parse_interval_modifier(modifier: &str) -> Option<String> {
    let modifier = modifier.trim();
    let (sign, rest) = match modifier.as_bytes().first()? {
        b'+' => ('+', &modifier[1..]),
        b'-' => ('-', &modifier[1..]),
        _ => return None,
    };
    let mut parts = rest.trim().splitn(2, ' ');
    let amount: i64 = parts.next()?.trim().parse().ok()?;
    let unit = parts.next()?.trim().to_lowercase();
    let valid = matches!(
        unit.as_str(),
        "day" | "days" | "hour" | "hours" | "minute" | "minutes"
    );
    if !valid {
        return None;
    }
    Some(format!(
        "CURRENT_TIMESTAMP {} INTERVAL '{} {}'",
        sign, amount, unit
    ))
}

// ============================================================================
// JSON EXTRACT REWRITE
// ============================================================================

/// `json_extract(col, '$.a.b.c')` → `col -> 'a' -> 'b' ->> 'c'`; a single
/// path component uses `->>` directly.
fn rewrite_json_extract(sql: &str) -> String {
    let mut out = sql.to_string();
    let mut from = 0;
    while let Some(pos) = find_identifier(&out, "json_extract", from) {
        let open = skip_ws(&out, pos + "json_extract".len());
        if out.as_bytes().get(open) != Some(&b'(') {
            from = pos + 12;
            continue;
        }
        let Some(close_rel) = out[open..].find(')') else {
            break;
        };
        let close = open + close_rel;
        let inner = &out[open + 1..close];
        let Some((col, path)) = inner.split_once(',') else {
            from = close + 1;
            continue;
        };
        let col = col.trim().to_string();
        let path = path.trim().trim_matches('\'');
        let Some(path) = path.strip_prefix("$.") else {
            from = close + 1;
            continue;
        };
        let components: Vec<&str> = path.split('.').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            from = close + 1;
            continue;
        }

        let mut expr = col;
        for (i, component) in components.iter().enumerate() {
            let arrow = if i + 1 == components.len() { "->>" } else { "->" };
            expr.push_str(&format!(" {} '{}'", arrow, component));
        }
        out.replace_range(pos..=close, &expr);
        from = pos + expr.len();
    }
    out
}

// ============================================================================
// TABLE RENAMES
// ============================================================================

/// Rename logical tables to their physical names, but only in table
/// positions (the identifier right after FROM/JOIN/INTO/UPDATE/TABLE).
fn rename_tables(sql: &str) -> String {
    const TABLE_KEYWORDS: &[&str] = &["from", "join", "into", "update", "table"];

    let mut out = String::with_capacity(sql.len() + 16);
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    let mut prev_token = String::new();

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            in_string = !in_string;
            out.push('\'');
            i += 1;
            continue;
        }
        if !in_string && is_ident_byte(b) {
            let (end, ident) = read_qualified_ident(sql, i).expect("identifier start");
            let lower = ident.to_lowercase();
            let renamed = if TABLE_KEYWORDS.contains(&prev_token.as_str()) {
                LOGICAL_TO_PHYSICAL
                    .iter()
                    .find(|(logical, _)| *logical == lower)
                    .map(|(_, physical)| *physical)
            } else {
                None
            };
            match renamed {
                Some(physical) => out.push_str(physical),
                None => out.push_str(ident),
            }
            // "IF NOT EXISTS" and "OR IGNORE" sit between keyword and table
            if !matches!(lower.as_str(), "if" | "not" | "exists" | "or" | "ignore") {
                prev_token = lower;
            }
            i = end;
            continue;
        }
        // Copy whole characters so multibyte payloads in literals survive
        let ch_len = utf8_len(b);
        out.push_str(&sql[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >> 5 == 0b110 => 2,
        b if b >> 4 == 0b1110 => 3,
        _ => 4,
    }
}

// ============================================================================
// PLACEHOLDERS
// ============================================================================

/// `?` → `$1, $2, ...` in left-to-right order, skipping string literals.
fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_numbering_in_order() {
        let sql = "SELECT * FROM knowledge_nodes WHERE id = ? AND reps > ? LIMIT ?";
        let out = rewrite_to_postgres(sql);
        assert!(out.contains("id = $1"));
        assert!(out.contains("reps > $2"));
        assert!(out.contains("LIMIT $3"));
        assert!(!out.contains('?'));
    }

    #[test]
    fn test_placeholder_count_preserved() {
        let sql = "INSERT INTO intentions (id, content) VALUES (?, ?)";
        let input_count = sql.matches('?').count();
        let out = rewrite_to_postgres(sql);
        let output_count = (1..=input_count)
            .filter(|n| out.contains(&format!("${}", n)))
            .count();
        assert_eq!(input_count, output_count);
    }

    #[test]
    fn test_placeholders_in_string_literals_untouched() {
        let sql = "SELECT * FROM knowledge_nodes WHERE content LIKE '%?%' AND id = ?";
        let out = rewrite_to_postgres(sql);
        assert!(out.contains("'%?%'"));
        assert!(out.contains("id = $1"));
    }

    #[test]
    fn test_datetime_now() {
        let out = rewrite_to_postgres("SELECT datetime('now')");
        assert_eq!(out, "SELECT CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_datetime_offsets() {
        let out = rewrite_to_postgres(
            "SELECT * FROM knowledge_nodes WHERE created_at > datetime('now', '-7 days')",
        );
        assert!(out.contains("vestige_knowledge"));
        assert!(out.contains("CURRENT_TIMESTAMP - INTERVAL '7 days'"));
        assert!(!out.contains("knowledge_nodes"));
        assert!(!out.contains("datetime("));

        let out = rewrite_to_postgres("UPDATE intentions SET deadline = datetime('now', '+1 hour')");
        assert!(out.contains("CURRENT_TIMESTAMP + INTERVAL '1 hour'"));
    }

    #[test]
    fn test_json_extract_single_component() {
        let out = rewrite_to_postgres("SELECT json_extract(trigger_data, '$.kind') FROM intentions");
        assert!(out.contains("trigger_data ->> 'kind'"));
        assert!(!out.contains("json_extract"));
    }

    #[test]
    fn test_json_extract_nested_path() {
        let out = rewrite_to_postgres("SELECT json_extract(metadata, '$.a.b.c') FROM graph_edges");
        assert!(out.contains("metadata -> 'a' -> 'b' ->> 'c'"));
    }

    #[test]
    fn test_fts_match_rewrite() {
        let sql = "SELECT k.* FROM knowledge_nodes k \
                   JOIN knowledge_fts fts ON fts.id = k.id \
                   WHERE knowledge_fts MATCH ? ORDER BY rank LIMIT ?";
        let out = rewrite_to_postgres(sql);
        assert!(out.contains("search_vector @@ plainto_tsquery($1)"));
        assert!(out.contains("LIMIT $2"));
        assert!(!out.to_lowercase().contains("join knowledge_fts"));
        assert!(!out.contains("MATCH"));
    }

    #[test]
    fn test_table_renames_identifier_boundary() {
        // A column or table merely containing a logical name is untouched
        let out = rewrite_to_postgres("SELECT * FROM knowledge_nodes_archive");
        assert!(out.contains("knowledge_nodes_archive"));

        // The real table is renamed
        let out = rewrite_to_postgres("DELETE FROM knowledge_nodes WHERE id = ?");
        assert!(out.contains("vestige_knowledge"));
    }

    #[test]
    fn test_column_named_like_table_not_renamed() {
        // `people` as a column (select list) stays; `people` as a table renames
        let out = rewrite_to_postgres("SELECT people FROM people");
        assert_eq!(out, "SELECT people FROM vestige_people");
    }

    #[test]
    fn test_all_logical_tables_renamed() {
        let out = rewrite_to_postgres("SELECT * FROM graph_edges");
        assert!(out.contains("vestige_edges"));
        let out = rewrite_to_postgres("UPDATE intentions SET status = ?");
        assert!(out.contains("vestige_intentions"));
        let out = rewrite_to_postgres("INSERT INTO vestige_metadata (key) VALUES (?)");
        assert!(out.contains("vestige_metadata"));
    }

    #[test]
    fn test_idempotent_on_rewritten_sql() {
        let original = "SELECT * FROM knowledge_nodes \
                        WHERE created_at > datetime('now', '-7 days') AND id = ?";
        let once = rewrite_to_postgres(original);
        // Placeholders are already `$n`, names already physical: no-op
        let twice = rewrite_to_postgres(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_passthrough_of_unknown_constructs() {
        let sql = "SELECT COALESCE(summary, content) FROM knowledge_nodes GROUP BY state";
        let out = rewrite_to_postgres(sql);
        assert!(out.contains("COALESCE(summary, content)"));
        assert!(out.contains("GROUP BY state"));
    }
}
