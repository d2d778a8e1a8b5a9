//! Read-only statement policy
//!
//! Decides, from statement text alone, whether an ad-hoc query may run, and
//! caps the number of rows it can return. Both checks are keyword
//! heuristics rather than a parse:
//!
//! - A statement is accepted when its first word is `SELECT`. Text that
//!   starts with `SELECT` but smuggles a second statement after a `;`, or a
//!   data-modifying call inside a function, is not detected.
//! - A statement is considered already bounded when `LIMIT` or
//!   `FETCH FIRST|NEXT` appears anywhere as a word, so a limit inside a
//!   subquery, a string literal or a comment suppresses the appended cap.
//! - The cap goes on a line of its own, so a trailing `--` comment cannot
//!   swallow it. A statement ending in `; -- note` then fails to parse
//!   instead of running unbounded.
//!
//! Callers go through [`StatementPolicy`] so a parser-backed policy can
//! replace [`KeywordPolicy`] without touching them.

use crate::error::{DbError, DbResult};
use lazy_regex::{Lazy, Regex, lazy_regex};

static ROW_LIMIT_CLAUSE: Lazy<Regex> = lazy_regex!(r"(?i)\b(LIMIT|FETCH\s+(FIRST|NEXT))\b");

/// Gate for free-form statement text
pub trait StatementPolicy: Send + Sync {
    /// Accept a read-only statement, returning its normalized text.
    ///
    /// Must not perform I/O: a rejected statement costs no round-trip.
    ///
    /// # Errors
    /// Returns `DbError::PolicyRejection` when the statement may write
    fn authorize(&self, statement: &str) -> DbResult<String>;

    /// Append a row cap of `limit` unless the statement already carries one
    fn bound_limit(&self, statement: &str, limit: u64) -> String;
}

/// First-keyword check, matching the gateway's documented behaviour
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    keyword: &'static str,
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self { keyword: "SELECT" }
    }
}

impl StatementPolicy for KeywordPolicy {
    fn authorize(&self, statement: &str) -> DbResult<String> {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            return Err(DbError::PolicyRejection("empty statement".to_string()));
        }

        let leading = leading_keyword(trimmed);
        if leading.eq_ignore_ascii_case(self.keyword) {
            Ok(trimmed.to_string())
        } else {
            let shown = if leading.is_empty() {
                trimmed.chars().take(16).collect::<String>()
            } else {
                leading.to_ascii_uppercase()
            };
            Err(DbError::PolicyRejection(format!(
                "only {} statements are allowed, got {}",
                self.keyword, shown
            )))
        }
    }

    fn bound_limit(&self, statement: &str, limit: u64) -> String {
        bound_limit(statement, limit)
    }
}

/// Leading run of ASCII letters
fn leading_keyword(text: &str) -> &str {
    let end = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map_or(text.len(), |(i, _)| i);
    &text[..end]
}

/// Whether a row-limiting clause appears anywhere in the text
pub fn has_row_limit(statement: &str) -> bool {
    ROW_LIMIT_CLAUSE.is_match(statement)
}

/// Append `LIMIT {limit}` when no row-limiting clause is present.
///
/// A trailing `;` is dropped before appending, and the clause starts a new
/// line so it survives a trailing line comment. Statements that already
/// contain a limit are returned unchanged: the caller's explicit limit wins.
pub fn bound_limit(statement: &str, limit: u64) -> String {
    if has_row_limit(statement) {
        return statement.to_string();
    }
    let base = statement.trim_end().trim_end_matches(';').trim_end();
    format!("{}\nLIMIT {}", base, limit)
}
