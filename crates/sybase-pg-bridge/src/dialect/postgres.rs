//! PostgreSQL-specific translation pass.
//!
//! Independent of the generic pass so callers can apply either alone; the
//! unconditional substitutions from the generic pass are repeated here for
//! that reason. The conversion-function table is finite by design: it
//! covers the call shapes observed in legacy callers, and anything else
//! passes through verbatim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::rewrite_null_comparisons;

// convert(char(10), x, 101) date formatting
static CONVERT_DATE_101: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"convert\(char\(10\), *([A-Za-z_.0-9]+), *101\)").unwrap());

// convert([var]char(10), x, 112) date formatting
static CONVERT_DATE_112: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"convert\((?:var)?char\(10\), *([A-Za-z_.0-9]+), *112\)").unwrap());

// convert(int, alias.startCoordinate) and friends
static CONVERT_COORDINATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"convert\(int, *([A-Za-z_.0-9]+)\.(startCoordinate|endCoordinate|pointCoordinate)\)")
        .unwrap()
});

// convert(char(20), x.creation_date, 100) timestamp formatting
static CONVERT_STAMP_100: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"convert\(char\(20\), *([A-Za-z_.0-9]*(?:creation_date|modification_date)), *100\)")
        .unwrap()
});

// dateadd(day, n, x) arithmetic
static DATEADD_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"dateadd\(day, *([0-9]+), *([A-Za-z_.0-9]+)\)").unwrap());

// identity(n) column generation
static IDENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)identity\([0-9]+\)").unwrap());

/// Backend-specific translation pass for PostgreSQL targets.
///
/// Order is important: the temp-table rewrites must run before the `#`
/// marker is stripped, and the conversion-function table before the bare
/// `getdate()` rename.
pub fn translate_backend(sql: &str) -> String {
    // temporary tables: fix insert targets first, make drops conditional,
    // turn the first remaining reference into the creation form, then strip
    // the marker from everything else
    let mut cmd = sql.replace("insert into #", "insert into ");
    cmd = cmd.replace("drop table #", "drop table if exists ");
    cmd = cmd.replace("into #", "INTO TEMPORARY TABLE ");
    cmd = cmd.replace('#', "");

    // cross-schema qualifiers: schema..table becomes schema.table
    cmd = cmd.replace("..", ".");

    // unconditional substitutions shared with the generic pass, so this
    // pass also works on its own
    cmd = cmd.replace("offset", "cmOffset");
    cmd = cmd.replace(" like ", " ilike ");
    cmd = cmd.replace(" LIKE ", " ILIKE ");
    cmd = cmd.replace(" null ", " NULL ");
    cmd = rewrite_null_comparisons(&cmd);

    cmd = cmd.replace("substring", "substr");

    // curated conversion-function shapes
    cmd = cmd.replace("convert(char(20), getdate(), 100)", "current_date as cdate");
    cmd = CONVERT_DATE_101
        .replace_all(&cmd, "to_char( $1, 'MM/dd/yyyy')")
        .into_owned();
    cmd = CONVERT_DATE_112.replace_all(&cmd, "$1::DATE").into_owned();
    cmd = CONVERT_COORDINATE
        .replace_all(&cmd, |caps: &Captures| {
            // the point form kept its camel case in legacy callers
            let column = match &caps[2] {
                "pointCoordinate" => caps[2].to_string(),
                other => other.to_lowercase(),
            };
            format!("cast({}.{} as varchar)", &caps[1], column)
        })
        .into_owned();
    cmd = CONVERT_STAMP_100
        .replace_all(&cmd, "to_char($1, 'Mon DD YYYY HH:MMPM')")
        .into_owned();
    cmd = DATEADD_DAY
        .replace_all(&cmd, "($2 + interval '$1 day')")
        .into_owned();
    cmd = cmd.replace("datepart(year,", "date_part('year',");
    cmd = cmd.replace("getdate()", "now()");
    cmd = cmd.replace("str(o.cmOffset,10,2)", "to_char(o.cmOffset, '999.99')");
    cmd = cmd.replace("'E' as source", "'E'::text as source");
    cmd = cmd.replace("'L' as source", "'L'::text as source");

    cmd = IDENTITY.replace_all(&cmd, "row_number() over()").into_owned();

    rewrite_delete_using(&cmd)
}

/// Multi-table deletes: the second FROM introduces the joined tables, which
/// PostgreSQL spells USING. Skipped when the second FROM belongs to a
/// subquery (a SELECT keyword appears before it).
fn rewrite_delete_using(sql: &str) -> String {
    let lower = sql.to_lowercase();
    let delete_pos = match lower.find("delete") {
        Some(pos) => pos,
        None => return sql.to_string(),
    };
    let first_from = match lower[delete_pos..].find("from") {
        Some(pos) => delete_pos + pos,
        None => return sql.to_string(),
    };
    let second_from = match lower[first_from + 4..].find("from") {
        Some(pos) => first_from + 4 + pos,
        None => return sql.to_string(),
    };
    if let Some(select_pos) = lower.find("select") {
        if select_pos < second_from {
            return sql.to_string();
        }
    }
    format!("{}USING{}", &sql[..second_from], &sql[second_from + 4..])
}
