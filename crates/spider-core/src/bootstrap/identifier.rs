//! Identifier validation and quoting for generated DDL.
//!
//! Names end up inside backtick-quoted identifiers and single-quoted account
//! literals, so only `[A-Za-z0-9_-]` is accepted. Quoting is applied only to
//! values that already passed validation.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{Result, SpiderError};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier pattern is valid"));

pub fn is_valid_identifier(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Reject anything but a non-empty `[A-Za-z0-9_-]+` string. `what` names the
/// value in the error ("database name", "database user name", ...).
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SpiderError::Validation(format!("invalid {what}: {name:?}")))
    }
}

/// Like [`validate_identifier`], but never echoes the value.
pub fn validate_secret(what: &str, secret: &str) -> Result<()> {
    if is_valid_identifier(secret) {
        Ok(())
    } else {
        Err(SpiderError::Validation(format!("invalid {what}")))
    }
}

/// `` `name` ``
pub fn quote_identifier(name: &str) -> String {
    format!("`{name}`")
}

/// `'user'@'%'`
pub fn quote_account(user: &str) -> String {
    format!("'{user}'@'%'")
}

/// `'value'`
pub fn quote_literal(value: &str) -> String {
    format!("'{value}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("spider-db")]
    #[case("my_db-1")]
    #[case("A")]
    #[case("0123")]
    fn accepts_plain_names(#[case] name: &str) {
        assert!(validate_identifier("database name", name).is_ok());
    }

    #[rstest]
    #[case::empty("")]
    #[case::semicolon("db;drop")]
    #[case::backtick("db`x")]
    #[case::quote("db'x")]
    #[case::double_quote("db\"x")]
    #[case::space("my db")]
    #[case::newline("db\n")]
    #[case::dot("db.x")]
    #[case::non_ascii("dbé")]
    fn rejects_everything_else(#[case] name: &str) {
        let err = validate_identifier("database name", name).unwrap_err();
        assert!(matches!(err, SpiderError::Validation(_)));
    }

    #[test]
    fn secret_errors_do_not_leak_the_value() {
        let err = validate_secret("database user password", "p@ss").unwrap_err();
        assert!(!err.to_string().contains("p@ss"));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_identifier("spider"), "`spider`");
        assert_eq!(quote_account("spider"), "'spider'@'%'");
        assert_eq!(quote_literal("pw"), "'pw'");
    }
}
