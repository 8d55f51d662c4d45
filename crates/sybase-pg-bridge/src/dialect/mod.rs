//! Legacy-dialect SQL rewriting.
//!
//! Two passes, composed by the caller rather than chained internally: the
//! generic pass ([`translate`]) rewrites legacy quoting, stored-procedure
//! calls, NULL comparisons and case-sensitive string comparisons; the
//! backend pass ([`postgres::translate_backend`]) handles engine-specific
//! idioms such as temporary tables and conversion functions.
//!
//! This is best-effort rewriting over a curated, ordered rule set, not
//! parsing: rules only cover statement shapes observed in the legacy
//! callers, and anything unmatched passes through verbatim. Rule order is
//! meaningful; later rules assume the text shape earlier ones produce.

pub mod postgres;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// catch both != and = comparisons against a quoted literal
static EQUAL_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\s(])([A-Za-z_.0-9]+) *(!?=) *'([^']*)'").unwrap());

// catch both 'in' and 'not in' comparisons against a literal list
static IN_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\s(])([A-Za-z_.0-9]+) *(not)? *in *\(('[^)]+)\)").unwrap()
});

// catch "alias = expression" naming in the select list; the easy case only,
// expressions with embedded spaces are not recognized
static RENAME_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\s)([A-Za-z_0-9]+) *= *(['A-Za-z0-9_.()]+)").unwrap());

// a leading stored-procedure invocation
static EXEC_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*exec\s+([A-Za-z_0-9.]+)\s*(.*?)\s*$").unwrap());

/// Verbatim substitutions for known legacy idioms, applied unconditionally
/// and in order.
const LITERAL_SUBSTITUTIONS: &[(&str, &str)] = &[
    (".offset", ".cmOffset"),
    (" like ", " ilike "),
    (" LIKE ", " ILIKE "),
    (" null ", " NULL "),
];

/// Generic translation pass.
///
/// Applies, in order: quoting normalization, stored-procedure call
/// conversion, the literal substitution table, NULL-comparison rewrites,
/// case-insensitive WHERE-clause comparison rewrites, and select-list
/// alias reversal. Never fails; unrecognized text is returned unchanged.
pub fn translate(sql: &str) -> String {
    let mut cmd = sql.replace('"', "'");
    cmd = rewrite_exec_call(&cmd);
    cmd = apply_literal_substitutions(&cmd);
    cmd = rewrite_null_comparisons(&cmd);
    cmd = rewrite_where_comparisons(&cmd);
    rewrite_select_aliases(&cmd)
}

/// Locate a keyword the way the legacy callers spelled them: all lower
/// case first, then all upper case.
pub(crate) fn find_keyword(sql: &str, keyword: &str) -> Option<usize> {
    sql.find(keyword)
        .or_else(|| sql.find(&keyword.to_uppercase()))
}

/// `EXEC proc args` becomes `select * from proc (args);`, since the target
/// engine models stored routines as callable table functions.
fn rewrite_exec_call(sql: &str) -> String {
    match EXEC_CALL.captures(sql) {
        Some(caps) => format!("select * from {} ({});", &caps[1], &caps[2]),
        None => sql.to_string(),
    }
}

fn apply_literal_substitutions(sql: &str) -> String {
    LITERAL_SUBSTITUTIONS
        .iter()
        .fold(sql.to_string(), |cmd, (from, to)| cmd.replace(from, to))
}

/// `!= NULL` always becomes `is not null`. `= NULL` becomes `is null`
/// unless the statement mentions `update` anywhere, since `SET col = NULL`
/// must survive. The guard is a substring scan, not parsing: a SELECT that
/// merely mentions the word "update" is conservatively skipped.
pub(crate) fn rewrite_null_comparisons(sql: &str) -> String {
    let cmd = sql.replace("!= NULL", "is not null");
    if cmd.to_lowercase().contains("update") {
        return cmd;
    }
    cmd.replace("= NULL", "is null")
}

/// Rewrite equality and IN comparisons in the WHERE region so they match
/// case-insensitively, which is how the legacy engine compared strings.
fn rewrite_where_comparisons(sql: &str) -> String {
    let where_pos = match find_keyword(sql, "where") {
        Some(pos) => pos,
        None => return sql.to_string(),
    };
    let cmd = rewrite_equal_comparisons(sql, where_pos);
    rewrite_in_comparisons(&cmd, where_pos)
}

/// `symbol = 'Pax6'` becomes `lower(symbol) = 'pax6'`; same for `!=`.
fn rewrite_equal_comparisons(sql: &str, where_pos: usize) -> String {
    let (head, tail) = sql.split_at(where_pos);
    let rewritten = EQUAL_CLAUSE.replace_all(tail, |caps: &Captures| {
        format!(
            "{}lower({}) {} '{}'",
            &caps[1],
            &caps[2],
            &caps[3],
            caps[4].to_lowercase()
        )
    });
    format!("{}{}", head, rewritten)
}

/// `symbol in ('Pax6','Kit')` becomes `lower(symbol) in ('pax6','kit')`,
/// preserving a NOT when present.
fn rewrite_in_comparisons(sql: &str, where_pos: usize) -> String {
    let (head, tail) = sql.split_at(where_pos);
    let rewritten = IN_CLAUSE.replace_all(tail, |caps: &Captures| {
        let op = if caps.get(3).is_some() { "not in" } else { "in" };
        format!(
            "{}lower({}) {} ({})",
            &caps[1],
            &caps[2],
            op,
            caps[4].to_lowercase()
        )
    });
    format!("{}{}", head, rewritten)
}

/// Legacy `alias = expression` select-list naming becomes
/// `expression as alias`.
///
/// Skipped entirely when the statement is an UPDATE (an `update` keyword
/// with no earlier `select`), and applied only to text before the first
/// FROM keyword; a statement without FROM is returned unchanged.
fn rewrite_select_aliases(sql: &str) -> String {
    if let Some(update_pos) = find_keyword(sql, "update") {
        match find_keyword(sql, "select") {
            Some(select_pos) if select_pos < update_pos => {}
            _ => return sql.to_string(),
        }
    }
    let from_pos = match find_keyword(sql, "from") {
        Some(pos) => pos,
        None => return sql.to_string(),
    };

    // only the select list is scanned; text from FROM onward is untouched
    let (head, tail) = sql.split_at(from_pos);
    let rewritten = RENAME_CLAUSE.replace_all(head, |caps: &Captures| {
        format!("{}{} as {}", &caps[1], &caps[3], &caps[2])
    });
    format!("{}{}", rewritten, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select_is_untouched() {
        let sql = "select * from mgi_dbinfo";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_join_select_is_untouched() {
        let sql = "SELECT symbol, name, m._marker_key, mn.note \
                   FROM mrk_marker m join marker_notes mn on \
                   m._marker_key = mn._marker_key \
                   where m._organism_key = 1";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_double_quotes_become_single() {
        assert_eq!(
            translate("select * from t where x > \"abc\""),
            "select * from t where x > 'abc'"
        );
    }

    #[test]
    fn test_exec_becomes_table_function_call() {
        assert_eq!(translate("exec proc 42"), "select * from proc (42);");
        assert_eq!(
            translate("exec GXD_doAssayStuff 1001"),
            "select * from GXD_doAssayStuff (1001);"
        );
    }

    #[test]
    fn test_exec_without_arguments() {
        assert_eq!(translate("EXEC MGI_cleanup"), "select * from MGI_cleanup ();");
    }

    #[test]
    fn test_exec_only_at_statement_start() {
        let sql = "select exec_count from stats";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_like_becomes_ilike() {
        assert_eq!(
            translate("select * from mrk_marker where symbol like 'Pa%'"),
            "select * from mrk_marker where symbol ilike 'Pa%'"
        );
        assert_eq!(
            translate("select * from mrk_marker where symbol LIKE 'Pa%'"),
            "select * from mrk_marker where symbol ILIKE 'Pa%'"
        );
    }

    #[test]
    fn test_dotted_offset_column_renamed() {
        assert_eq!(
            translate("select o.offset from mrk_offset o"),
            "select o.cmOffset from mrk_offset o"
        );
    }

    #[test]
    fn test_equals_null_becomes_is_null() {
        assert_eq!(
            translate("select * from gxd_assay where _reportergene_key = NULL"),
            "select * from gxd_assay where _reportergene_key is null"
        );
    }

    #[test]
    fn test_not_equals_null_becomes_is_not_null() {
        assert_eq!(
            translate("select * from gxd_assay where _reportergene_key != NULL"),
            "select * from gxd_assay where _reportergene_key is not null"
        );
    }

    #[test]
    fn test_update_guard_leaves_set_null_alone() {
        let sql = "update mrk_marker set name = NULL";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_update_guard_is_case_insensitive() {
        let sql = "Update mrk_marker set name = NULL";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_update_guard_still_rewrites_not_equals() {
        assert_eq!(
            translate("update t set a = 1 where b != NULL"),
            "update t set a = 1 where b is not null"
        );
    }

    #[test]
    fn test_where_equality_is_case_folded() {
        assert_eq!(
            translate("select * from mrk_marker where symbol = 'Pax6'"),
            "select * from mrk_marker where lower(symbol) = 'pax6'"
        );
    }

    #[test]
    fn test_where_inequality_is_case_folded() {
        assert_eq!(
            translate("select * from mrk_marker where symbol != 'Pax6'"),
            "select * from mrk_marker where lower(symbol) != 'pax6'"
        );
    }

    #[test]
    fn test_only_the_where_region_is_case_folded() {
        // the select-list literal keeps its case; only the WHERE comparison
        // is folded, and the alias rewrite still applies before FROM
        assert_eq!(
            translate("select tag='A' from t where symbol = 'Kit'"),
            "select 'A' as tag from t where lower(symbol) = 'kit'"
        );
    }

    #[test]
    fn test_unquoted_equality_is_untouched() {
        let sql = "select * from mrk_marker where _organism_key = 1";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_in_clause_is_case_folded() {
        assert_eq!(
            translate("select * from mrk_marker where symbol in ('Pax6','Kit')"),
            "select * from mrk_marker where lower(symbol) in ('pax6','kit')"
        );
    }

    #[test]
    fn test_not_in_clause_keeps_the_not() {
        assert_eq!(
            translate(
                "select * from mrk_marker where symbol in ('pax6','kit') \
                 and name not in ('agouti','hox')"
            ),
            "select * from mrk_marker where lower(symbol) in ('pax6','kit') \
             and lower(name) not in ('agouti','hox')"
        );
    }

    #[test]
    fn test_select_alias_is_reversed() {
        assert_eq!(
            translate("select alleleKey=_allele_key from all_allele"),
            "select _allele_key as alleleKey from all_allele"
        );
    }

    #[test]
    fn test_multiple_aliases_reversed() {
        assert_eq!(
            translate(
                "select alleleKey=_allele_key, alleleName = name, \
                 testString = \"test\" from all_allele"
            ),
            "select _allele_key as alleleKey, name as alleleName, \
             'test' as testString from all_allele"
        );
    }

    #[test]
    fn test_alias_with_function_expression() {
        assert_eq!(
            translate("select maxKey=max(_allele_key) from all_allele"),
            "select max(_allele_key) as maxKey from all_allele"
        );
    }

    #[test]
    fn test_alias_rewrite_skips_updates() {
        let sql = "update t set a = b where c = 5";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_alias_rewrite_allowed_when_select_precedes_update() {
        assert_eq!(
            translate("select tag=modified from t where kind = 'update'"),
            "select modified as tag from t where lower(kind) = 'update'"
        );
    }

    #[test]
    fn test_alias_rewrite_needs_from() {
        let sql = "select x = y";
        assert_eq!(translate(sql), sql);
    }

    #[test]
    fn test_alias_after_from_is_untouched() {
        let sql = "select a from t where b = c";
        assert_eq!(translate(sql), sql);
    }
}
