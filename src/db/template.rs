//! Statement templating.
//!
//! Operator-authored scripts are split into single statements and the
//! `{{name}}`, `{{password}}` and `{{expiration}}` placeholders are filled in
//! with the values of one credential.
//!
//! Trust boundary: the scripts and the values bound into them come from the
//! operator and the secret backend, not from end users, so values are inserted
//! textually (role DDL cannot take bind parameters). Identifiers the engine
//! generates itself always go through [`quote_identifier`].

use crate::error::{DbError, DbResult};
use crate::models::Credential;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub const NAME_TOKEN: &str = "{{name}}";
pub const PASSWORD_TOKEN: &str = "{{password}}";
pub const EXPIRATION_TOKEN: &str = "{{expiration}}";

/// Statement delimiter for plain-text scripts.
pub const STATEMENT_DELIMITER: char = ';';

/// Binds placeholder tokens to values and renders scripts into statements.
#[derive(Debug, Clone)]
pub struct StatementTemplater<'a> {
    bindings: Vec<(&'static str, &'a str)>,
    required: &'static [&'static str],
}

impl<'a> StatementTemplater<'a> {
    /// Templater for creation scripts: binds name, password and expiration.
    pub fn for_creation(credential: &'a Credential) -> Self {
        Self {
            bindings: vec![
                (NAME_TOKEN, credential.username.as_str()),
                (PASSWORD_TOKEN, credential.password.as_str()),
                (EXPIRATION_TOKEN, credential.expiration.as_str()),
            ],
            required: &[NAME_TOKEN],
        }
    }

    /// Templater for custom revocation scripts: binds the name only.
    pub fn for_revocation(username: &'a str) -> Self {
        Self {
            bindings: vec![(NAME_TOKEN, username)],
            required: &[NAME_TOKEN],
        }
    }

    /// Render a script into ready-to-prepare statements.
    ///
    /// Fails if the script yields no statements or never references a
    /// required token; nothing is executed in either case.
    pub fn render(&self, script: &str) -> DbResult<Vec<String>> {
        let statements = split_statements(script);
        if statements.is_empty() {
            return Err(DbError::template("script contains no statements"));
        }

        for token in self.required {
            if !statements.iter().any(|s| s.contains(token)) {
                return Err(DbError::template(format!(
                    "script never references {}",
                    token
                )));
            }
        }

        Ok(statements
            .iter()
            .map(|statement| substitute(statement, &self.bindings))
            .collect())
    }
}

/// Decode a script into trimmed, non-empty statements.
///
/// Accepts a JSON array of statements, base64 of either form, or plain text
/// delimited by `;`.
pub fn split_statements(script: &str) -> Vec<String> {
    let script = script.trim();
    let decoded = STANDARD
        .decode(script)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let script = decoded.as_deref().map(str::trim).unwrap_or(script);

    if let Ok(statements) = serde_json::from_str::<Vec<String>>(script) {
        return statements
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    script
        .split(STATEMENT_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Replace every bound token in one pass.
///
/// Substituted values are never rescanned, and unknown `{{...}}` tokens are
/// left verbatim so a bad template fails loudly in the database.
pub fn substitute(statement: &str, bindings: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut rest = statement;

    while let Some(pos) = rest.find("{{") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match bindings.iter().find(|(token, _)| rest.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &rest[token.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &rest[2..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Quote an identifier for PostgreSQL.
///
/// Everything from the first NUL on is dropped and embedded double quotes
/// are doubled.
pub fn quote_identifier(ident: &str) -> String {
    let ident = ident.split('\0').next().unwrap_or_default();
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for PostgreSQL.
///
/// Single quotes are doubled; values containing backslashes use the `E''`
/// escape syntax with doubled backslashes.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}
