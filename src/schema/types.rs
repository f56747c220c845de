//! Accepted PostgreSQL column types.
//!
//! Built-in types are checked by their base-type head: `varchar(255)`,
//! `numeric(10, 2)`, `text[]` and `timestamp(3) with time zone` all reduce to
//! a head that must appear in [`BASE_TYPES`]. `interval` may carry a field
//! qualifier such as `day to second`.
//!
//! User-defined types (enums, domains, composites) are accepted in identifier
//! form when they are schema-qualified or quoted: `public.mood`, `"char"`,
//! `sales."Priority"[]`. A bare unknown word is still rejected so a typo does
//! not pass as a custom type.

use crate::error::{SchemaError, SchemaResult};

/// Base type names, lower case, single-spaced.
pub const BASE_TYPES: &[&str] = &[
    // Numeric
    "smallint",
    "integer",
    "int",
    "int2",
    "int4",
    "int8",
    "bigint",
    "smallserial",
    "serial",
    "bigserial",
    "serial2",
    "serial4",
    "serial8",
    "decimal",
    "numeric",
    "real",
    "float",
    "float4",
    "float8",
    "double precision",
    "money",
    // Character
    "char",
    "character",
    "bpchar",
    "varchar",
    "character varying",
    "text",
    "citext",
    "name",
    // Binary
    "bytea",
    // Date/time
    "date",
    "time",
    "timetz",
    "time with time zone",
    "time without time zone",
    "timestamp",
    "timestamptz",
    "timestamp with time zone",
    "timestamp without time zone",
    "interval",
    // Boolean
    "boolean",
    "bool",
    // Other
    "uuid",
    "json",
    "jsonb",
    "xml",
    "inet",
    "cidr",
    "macaddr",
    "macaddr8",
    "bit",
    "varbit",
    "bit varying",
    "tsvector",
    "tsquery",
    "point",
    "line",
    "lseg",
    "box",
    "path",
    "polygon",
    "circle",
    "int4range",
    "int8range",
    "numrange",
    "tsrange",
    "tstzrange",
    "daterange",
    "int4multirange",
    "int8multirange",
    "nummultirange",
    "tsmultirange",
    "tstzmultirange",
    "datemultirange",
    "jsonpath",
    "pg_lsn",
    "pg_snapshot",
    "txid_snapshot",
    "oid",
    "regclass",
    "regtype",
];

/// Field qualifiers allowed after `interval`.
const INTERVAL_FIELDS: &[&str] = &[
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "second",
    "year to month",
    "day to hour",
    "day to minute",
    "day to second",
    "hour to minute",
    "hour to second",
    "minute to second",
];

/// Reduce a declared type to its lower-case base head.
///
/// Returns `None` when the text contains anything outside the type grammar
/// (unbalanced parentheses, quotes, statement separators, ...).
fn base_type_head(type_text: &str) -> Option<String> {
    let mut head = String::with_capacity(type_text.len());
    let mut depth = 0usize;

    for ch in type_text.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.checked_sub(1)?,
            _ if depth > 0 => {
                // Modifiers are numbers: varchar(255), numeric(10, 2), int[3]
                if !(ch.is_ascii_digit() || ch == ',' || ch.is_whitespace()) {
                    return None;
                }
            }
            _ if ch.is_ascii_alphanumeric() || ch == '_' || ch.is_whitespace() => {
                head.push(ch.to_ascii_lowercase());
            }
            _ => return None,
        }
    }

    if depth != 0 {
        return None;
    }

    let head = head.split_whitespace().collect::<Vec<_>>().join(" ");
    if head.is_empty() { None } else { Some(head) }
}

fn is_builtin_head(head: &str) -> bool {
    if BASE_TYPES.contains(&head) {
        return true;
    }
    head.strip_prefix("interval ")
        .is_some_and(|fields| INTERVAL_FIELDS.contains(&fields))
}

/// One identifier of a type name, plain or double-quoted.
///
/// Returns the rest of the input and whether the identifier was quoted.
fn type_name_part(text: &str) -> Option<(&str, bool)> {
    if let Some(quoted) = text.strip_prefix('"') {
        let mut chars = quoted.char_indices();
        while let Some((i, ch)) = chars.next() {
            match ch {
                '"' if quoted[i + 1..].starts_with('"') => {
                    chars.next();
                }
                '"' if i == 0 => return None,
                '"' => return Some((&quoted[i + 1..], true)),
                c if c.is_control() => return None,
                _ => {}
            }
        }
        return None;
    }

    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(text.len());
    let word = &text[..end];
    match word.chars().next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => Some((&text[end..], false)),
        _ => None,
    }
}

/// `schema.name` or `"name"`, optionally followed by array brackets.
fn is_user_defined_type(type_text: &str) -> bool {
    let mut rest = type_text.trim();
    let mut parts = 0usize;
    let mut quoted = false;

    loop {
        let Some((after, was_quoted)) = type_name_part(rest) else {
            return false;
        };
        parts += 1;
        quoted |= was_quoted;
        match after.strip_prefix('.') {
            Some(next) => rest = next,
            None => {
                rest = after;
                break;
            }
        }
    }

    while let Some(after_open) = rest.strip_prefix('[') {
        let Some(close) = after_open.find(']') else {
            return false;
        };
        if !after_open[..close].chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        rest = &after_open[close + 1..];
    }

    rest.is_empty() && (parts == 2 || (parts == 1 && quoted))
}

/// Whether a declared type is accepted.
///
/// # Examples
///
/// ```
/// use schemasense_core::schema::types::is_valid_type;
///
/// assert!(is_valid_type("VARCHAR(255)"));
/// assert!(is_valid_type("text[]"));
/// assert!(is_valid_type("public.mood"));
/// assert!(!is_valid_type("mood"));
/// assert!(!is_valid_type("integer; DROP TABLE users"));
/// ```
pub fn is_valid_type(type_text: &str) -> bool {
    base_type_head(type_text).is_some_and(|head| is_builtin_head(&head))
        || is_user_defined_type(type_text)
}

/// Canonical spelling of a type as printed by the SQL parser.
///
/// Lower-cases everything outside double quotes, collapses whitespace and
/// drops the spaces around parentheses, brackets and commas, so
/// `NUMERIC(10, 2)` becomes `numeric(10,2)` and `"Mood"` stays as written.
pub fn normalize_type(type_text: &str) -> String {
    let mut out = String::with_capacity(type_text.len());
    let mut in_quotes = false;
    let mut pending_space = false;

    for ch in type_text.trim().chars() {
        if in_quotes {
            out.push(ch);
            if ch == '"' {
                in_quotes = false;
            }
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        let tight = matches!(ch, '(' | ')' | '[' | ']' | ',');
        if pending_space && !tight && !out.ends_with(|c| matches!(c, '(' | '[' | ',')) {
            out.push(' ');
        }
        pending_space = false;
        if ch == '"' {
            in_quotes = true;
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}

/// Validate a declared type, returning a schema validation error if rejected.
pub fn validate_type(type_text: &str) -> SchemaResult<()> {
    if is_valid_type(type_text) {
        Ok(())
    } else {
        Err(SchemaError::schema_validation(format!(
            "Invalid PostgreSQL type '{}'",
            type_text
        )))
    }
}
