//! Identifier and literal quoting.
//!
//! [`Quoter`] renders table names, column names and string literals safe for
//! embedding in SQL text and rewrites the two placeholder conventions used in
//! SQL templates:
//!
//! - `{{name}}` is a table reference; a `%` inside it is replaced by the
//!   configured table prefix.
//! - `[[name]]` is a column reference.
//!
//! Everything here is pure string work. Only literal quoting may consult the
//! client, through [`DbClient::escape_literal`](crate::client::DbClient::escape_literal).

use std::sync::OnceLock;

use regex::{Captures, Regex};

use dbkit_core::QuoteStyle;

use crate::value::Value;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{(%?[\w\-\. ]+%?)\}\}|\[\[([\w\-\. ]+)\]\]").expect("valid regex")
    })
}

/// Quotes identifiers and resolves SQL template placeholders.
///
/// # Examples
///
/// ```
/// use dbkit_core::QuoteStyle;
/// use dbkit_db::quoting::Quoter;
///
/// let quoter = Quoter::new(QuoteStyle::Mysql, "tbl_");
/// assert_eq!(quoter.quote_sql("SELECT * FROM {{%post}}"), "SELECT * FROM `tbl_post`");
/// assert_eq!(quoter.quote_column_name("user.name"), "`user`.`name`");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quoter {
    table_quotes: (char, char),
    column_quotes: (char, char),
    table_prefix: String,
}

impl Default for Quoter {
    fn default() -> Self {
        Self::new(QuoteStyle::default(), "")
    }
}

impl Quoter {
    /// Creates a quoter for the given quoting style and table prefix.
    pub fn new(style: QuoteStyle, table_prefix: impl Into<String>) -> Self {
        Self {
            table_quotes: style.table_quotes(),
            column_quotes: style.column_quotes(),
            table_prefix: table_prefix.into(),
        }
    }

    /// Overrides the quote characters used for table and column names.
    #[must_use]
    pub const fn with_quotes(mut self, table: (char, char), column: (char, char)) -> Self {
        self.table_quotes = table;
        self.column_quotes = column;
        self
    }

    /// Returns the prefix substituted for `%` in table placeholders.
    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Quotes a table name that carries no schema prefix.
    ///
    /// A name already containing the opening quote character is returned
    /// unchanged, which makes the operation idempotent.
    pub fn quote_simple_table_name(&self, name: &str) -> String {
        let (start, end) = self.table_quotes;
        if name.contains(start) {
            return name.to_string();
        }
        format!("{start}{name}{end}")
    }

    /// Quotes a possibly schema-qualified table name.
    ///
    /// Parenthesized sub-expressions and names still holding a `{{`
    /// placeholder are left alone. Otherwise every `.`-separated part is
    /// quoted on its own.
    pub fn quote_table_name(&self, name: &str) -> String {
        if (name.starts_with('(') && name.ends_with(')')) || name.contains("{{") {
            return name.to_string();
        }
        if !name.contains('.') {
            return self.quote_simple_table_name(name);
        }
        name.split('.')
            .map(|part| self.quote_simple_table_name(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quotes a column name that carries no table prefix.
    ///
    /// `*` and names already containing the opening quote character are
    /// returned unchanged.
    pub fn quote_simple_column_name(&self, name: &str) -> String {
        let (start, end) = self.column_quotes;
        if name == "*" || name.contains(start) {
            return name.to_string();
        }
        format!("{start}{name}{end}")
    }

    /// Quotes a possibly table-qualified column name.
    ///
    /// Names containing `(`, `[[` or `{{` are treated as expressions and
    /// returned unchanged. Otherwise the name is split at its last `.`; the
    /// qualifier is quoted as a table name and the rest as a simple column.
    pub fn quote_column_name(&self, name: &str) -> String {
        if name.contains('(') || name.contains("[[") || name.contains("{{") {
            return name.to_string();
        }
        match name.rfind('.') {
            Some(pos) => format!(
                "{}.{}",
                self.quote_table_name(&name[..pos]),
                self.quote_simple_column_name(&name[pos + 1..])
            ),
            None => self.quote_simple_column_name(name),
        }
    }

    /// Replaces every `{{table}}` and `[[column]]` placeholder in `sql`.
    ///
    /// `%` inside a table placeholder becomes the table prefix. Malformed or
    /// unterminated placeholders are left untouched.
    pub fn quote_sql(&self, sql: &str) -> String {
        placeholder_re()
            .replace_all(sql, |caps: &Captures<'_>| {
                if let Some(column) = caps.get(2) {
                    return self.quote_column_name(column.as_str());
                }
                caps.get(1).map_or_else(
                    || caps[0].to_string(),
                    |table| {
                        self.quote_table_name(table.as_str())
                            .replace('%', &self.table_prefix)
                    },
                )
            })
            .into_owned()
    }

    /// Resolves a table name to its raw form: `{{...}}` markers are removed
    /// and `%` is replaced by the table prefix. Nothing is quoted.
    pub fn raw_table_name(&self, name: &str) -> String {
        if !name.contains("{{") {
            return name.to_string();
        }
        static TABLE_RE: OnceLock<Regex> = OnceLock::new();
        let table_re = TABLE_RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("valid regex"));
        table_re
            .replace_all(name, "$1")
            .replace('%', &self.table_prefix)
    }

    /// Quotes a value for embedding in SQL.
    ///
    /// Non-string values are returned unchanged. Strings are escaped by
    /// `native` when it can, otherwise by [`escape_literal_fallback`].
    pub fn quote_value<F>(&self, value: Value, native: F) -> Value
    where
        F: FnOnce(&str) -> Option<String>,
    {
        match value {
            Value::String(s) => {
                Value::String(native(&s).unwrap_or_else(|| escape_literal_fallback(&s)))
            }
            other => other,
        }
    }
}

/// Generic literal escaping for engines without a native routine.
///
/// Wraps the value in single quotes, doubles embedded single quotes and
/// backslash-escapes NUL, LF, CR, backslash and Ctrl-Z.
pub fn escape_literal_fallback(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\000"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\x1a' => out.push_str("\\032"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Returns `true` for statements that only read data and may be routed to
/// a slave.
pub fn is_read_query(sql: &str) -> bool {
    static READ_RE: OnceLock<Regex> = OnceLock::new();
    READ_RE
        .get_or_init(|| Regex::new(r"(?i)^\s*(SELECT|SHOW|DESCRIBE)\b").expect("valid regex"))
        .is_match(sql)
}
