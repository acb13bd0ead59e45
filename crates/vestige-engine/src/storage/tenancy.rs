//! Row-level tenancy for the embedded backend
//!
//! Postgres gets row-level security policies; SQLite has no equivalent, so
//! the embedded backend routes every statement through this module, which
//! appends a `tenant_id = ?` predicate to any SELECT, UPDATE, or DELETE that
//! touches a tenant-scoped table. INSERTs are left alone; the repository
//! always writes the tenant column explicitly, and reads can never surface
//! a foreign row regardless of what an INSERT claimed.
//!
//! The predicate is injected at the end of the WHERE-able portion (before
//! GROUP BY / ORDER BY / LIMIT), and the tenant parameter is spliced into
//! the parameter list at the matching position so placeholder order stays
//! left-to-right.

use crate::storage::SqlValue;

/// Tables carrying a `tenant_id` column.
const TENANT_TABLES: &[&str] = &[
    "knowledge_nodes",
    "people",
    "graph_edges",
    "intentions",
    "vestige_metadata",
];

/// A statement rewritten for tenant scoping.
#[derive(Debug)]
pub struct ScopedStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Scope a statement to `tenant_id`. Statements that do not read or modify
/// tenant tables come back unchanged.
pub fn scope_statement(sql: &str, params: &[SqlValue], tenant_id: &str) -> ScopedStatement {
    if !needs_scoping(sql) {
        return ScopedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
    }

    let (head, tail) = split_at_tail_clause(sql);
    let where_pos = find_top_level_keyword(head, "where");

    // The tenant placeholder is spliced into the parameter list at the
    // position matching where the predicate landed in the text
    let (scoped_head, insert_at) = match where_pos {
        Some(pos) => {
            // Parenthesize the original condition so OR chains can't escape
            let before = &head[..pos];
            let condition = head[pos + 5..].trim();
            (
                format!("{}WHERE tenant_id = ? AND ({})", before, condition),
                count_placeholders(before),
            )
        }
        None => (
            format!("{} WHERE tenant_id = ?", head.trim_end()),
            count_placeholders(head),
        ),
    };

    let mut params_out: Vec<SqlValue> = Vec::with_capacity(params.len() + 1);
    params_out.extend_from_slice(&params[..insert_at.min(params.len())]);
    params_out.push(SqlValue::Text(tenant_id.to_string()));
    params_out.extend_from_slice(&params[insert_at.min(params.len())..]);

    ScopedStatement {
        sql: format!("{}{}", scoped_head, tail),
        params: params_out,
    }
}

/// Whether the statement reads or mutates a tenant table in a way the
/// appended predicate can guard.
fn needs_scoping(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    let guardable = ["select", "update", "delete"].iter().any(|verb| {
        trimmed.len() >= verb.len() && trimmed.as_bytes()[..verb.len()].eq_ignore_ascii_case(verb.as_bytes())
    });
    if !guardable {
        return false;
    }
    TENANT_TABLES
        .iter()
        .any(|table| contains_identifier(sql, table))
}

/// Identifier-boundary containment check, skipping string literals.
fn contains_identifier(sql: &str, ident: &str) -> bool {
    let bytes = sql.as_bytes();
    let needle = ident.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    while i + needle.len() <= bytes.len() {
        if bytes[i] == b'\'' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        if !in_string && bytes[i..i + needle.len()].eq_ignore_ascii_case(needle) {
            let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
            let end = i + needle.len();
            let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
            if before_ok && after_ok {
                return true;
            }
        }
        i += 1;
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split off the trailing GROUP BY / ORDER BY / LIMIT portion.
fn split_at_tail_clause(sql: &str) -> (&str, &str) {
    let mut cut = sql.len();
    for keyword in ["group", "order", "limit"] {
        if let Some(pos) = find_top_level_keyword(sql, keyword) {
            cut = cut.min(pos);
        }
    }
    // Keep the separating space with the tail
    let head_end = sql[..cut].trim_end().len();
    (&sql[..head_end], &sql[head_end..])
}

/// Find a top-level keyword (outside string literals, identifier-bounded).
fn find_top_level_keyword(sql: &str, keyword: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let needle = keyword.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    let mut depth = 0usize;
    while i + needle.len() <= bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
        if !in_string && depth == 0 && bytes[i..i + needle.len()].eq_ignore_ascii_case(needle) {
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

/// Count `?` placeholders outside string literals.
fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => in_string = !in_string,
            '?' if !in_string => count += 1,
            _ => {}
        }
    }
    count
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_select_without_where_gets_predicate() {
        let scoped = scope_statement("SELECT * FROM knowledge_nodes", &[], "t1");
        assert_eq!(scoped.sql, "SELECT * FROM knowledge_nodes WHERE tenant_id = ?");
        assert_eq!(scoped.params, vec![text("t1")]);
    }

    #[test]
    fn test_select_with_where_is_parenthesized() {
        let scoped = scope_statement(
            "SELECT * FROM knowledge_nodes WHERE reps > ? OR lapses > ?",
            &[SqlValue::Integer(1), SqlValue::Integer(2)],
            "t1",
        );
        assert_eq!(
            scoped.sql,
            "SELECT * FROM knowledge_nodes WHERE tenant_id = ? AND (reps > ? OR lapses > ?)"
        );
        // Tenant param comes first: it precedes the original placeholders
        assert_eq!(
            scoped.params,
            vec![text("t1"), SqlValue::Integer(1), SqlValue::Integer(2)]
        );
    }

    #[test]
    fn test_predicate_lands_before_order_and_limit() {
        let scoped = scope_statement(
            "SELECT * FROM knowledge_nodes ORDER BY next_review ASC LIMIT ?",
            &[SqlValue::Integer(10)],
            "t1",
        );
        assert_eq!(
            scoped.sql,
            "SELECT * FROM knowledge_nodes WHERE tenant_id = ? ORDER BY next_review ASC LIMIT ?"
        );
        // Tenant precedes the LIMIT parameter
        assert_eq!(scoped.params, vec![text("t1"), SqlValue::Integer(10)]);
    }

    #[test]
    fn test_where_plus_limit_param_order() {
        let scoped = scope_statement(
            "SELECT * FROM knowledge_nodes WHERE retention_strength >= ? ORDER BY retention_strength DESC LIMIT ?",
            &[SqlValue::Real(0.5), SqlValue::Integer(5)],
            "t9",
        );
        assert_eq!(
            scoped.params,
            vec![text("t9"), SqlValue::Real(0.5), SqlValue::Integer(5)]
        );
        assert!(scoped.sql.contains("WHERE tenant_id = ? AND (retention_strength >= ?)"));
    }

    #[test]
    fn test_update_and_delete_scoped() {
        let scoped = scope_statement(
            "UPDATE knowledge_nodes SET reps = ? WHERE id = ?",
            &[SqlValue::Integer(3), text("abc")],
            "t1",
        );
        assert!(scoped.sql.contains("WHERE tenant_id = ? AND (id = ?)"));

        let scoped = scope_statement("DELETE FROM intentions WHERE id = ?", &[text("i1")], "t1");
        assert!(scoped.sql.contains("WHERE tenant_id = ? AND (id = ?)"));
    }

    #[test]
    fn test_insert_not_scoped() {
        let sql = "INSERT INTO knowledge_nodes (id, tenant_id, content) VALUES (?, ?, ?)";
        let params = vec![text("a"), text("t1"), text("c")];
        let scoped = scope_statement(sql, &params, "t1");
        assert_eq!(scoped.sql, sql);
        assert_eq!(scoped.params.len(), 3);
    }

    #[test]
    fn test_non_tenant_tables_untouched() {
        let sql = "SELECT * FROM sqlite_master WHERE type = 'table'";
        let scoped = scope_statement(sql, &[], "t1");
        assert_eq!(scoped.sql, sql);
    }

    #[test]
    fn test_keyword_inside_string_ignored() {
        let scoped = scope_statement(
            "SELECT * FROM knowledge_nodes WHERE content LIKE '%order by%'",
            &[],
            "t1",
        );
        assert!(scoped
            .sql
            .contains("WHERE tenant_id = ? AND (content LIKE '%order by%')"));
    }

    #[test]
    fn test_subquery_where_not_confused() {
        // The WHERE inside a parenthesized subquery is not top-level
        let scoped = scope_statement(
            "SELECT * FROM graph_edges WHERE from_id IN (SELECT id FROM knowledge_nodes WHERE reps > ?)",
            &[SqlValue::Integer(0)],
            "t1",
        );
        assert!(scoped.sql.starts_with("SELECT * FROM graph_edges WHERE tenant_id = ? AND"));
    }
}
