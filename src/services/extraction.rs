//! Best-effort table-name extraction from SQL text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extracts candidate table names from a SQL statement.
///
/// Kept behind a trait so a real SQL parser can replace the lexical scan
/// without changing the grounding contract.
pub trait TableExtractor: Send + Sync {
    fn tables(&self, sql: &str) -> Vec<String>;
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static TABLE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:FROM|JOIN)\s+([A-Za-z0-9_.`"]+)"#).expect("table regex"));

/// Lexical scan for identifiers following `FROM`/`JOIN`.
///
/// Matches identifiers made of word characters, dots, backticks, and double
/// quotes; quoting marks are stripped from captures. Subqueries and other
/// SQL forms fall through silently, which is fine: unmatched names are
/// later dropped against the live catalog anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalTableExtractor;

impl TableExtractor for LexicalTableExtractor {
    fn tables(&self, sql: &str) -> Vec<String> {
        let normalized = WHITESPACE.replace_all(sql.trim(), " ");

        let mut seen = Vec::new();
        for capture in TABLE_REF.captures_iter(&normalized) {
            let name: String = capture[1]
                .chars()
                .filter(|c| *c != '`' && *c != '"')
                .collect();
            if !name.is_empty() && !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }
}

/// Resolve extracted names against live catalog names, case-insensitively.
/// The catalog's exact casing wins; names without a match are dropped.
pub fn resolve_against_catalog(extracted: &[String], catalog: &[String]) -> Vec<String> {
    let by_lowercase: std::collections::HashMap<String, &String> =
        catalog.iter().map(|name| (name.to_lowercase(), name)).collect();

    extracted
        .iter()
        .filter_map(|name| by_lowercase.get(&name.to_lowercase()).map(|n| (*n).clone()))
        .collect()
}
