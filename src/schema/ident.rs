//! Identifier quoting.
//!
//! [`quote_ident`] always quotes and is used for DDL that is sent to the
//! server. [`display_ident`] quotes only when needed and is used for the
//! model's own DDL text, which must re-parse to the same identifiers.

/// Words that cannot appear bare where the DDL parser expects a name.
const RESERVED: &[&str] = &[
    "all", "and", "any", "array", "as", "asc", "check", "collate", "column", "constraint",
    "create", "default", "desc", "distinct", "do", "else", "end", "except", "exclude", "false",
    "for", "foreign", "from", "grant", "group", "having", "in", "into", "like", "limit", "not",
    "null", "offset", "on", "only", "or", "order", "primary", "references", "select", "table",
    "then", "to", "true", "union", "unique", "user", "using", "when", "where", "with",
];

/// Quote an identifier for PostgreSQL, doubling embedded quotes.
///
/// # Examples
///
/// ```
/// use schemasense_core::schema::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."name"`.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

fn is_plain(ident: &str) -> bool {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !RESERVED.contains(&ident)
}

/// Render an identifier bare when PostgreSQL would read it back unchanged.
pub fn display_ident(ident: &str) -> String {
    if is_plain(ident) {
        ident.to_string()
    } else {
        quote_ident(ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_plain() {
        assert_eq!(display_ident("users"), "users");
        assert_eq!(display_ident("_tmp1"), "_tmp1");
        assert_eq!(display_ident("timestamp"), "timestamp");
    }

    #[test]
    fn test_display_needs_quotes() {
        assert_eq!(display_ident("Users"), "\"Users\"");
        assert_eq!(display_ident("first name"), "\"first name\"");
        assert_eq!(display_ident("1st"), "\"1st\"");
        assert_eq!(display_ident("order"), "\"order\"");
        assert_eq!(display_ident(""), "\"\"");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("public", "users"), "\"public\".\"users\"");
    }
}
