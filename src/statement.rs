use crate::error::SpannerMiddlewareError;
use crate::values::Value;

/// A SQL statement together with its named parameter bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The SQL text
    pub sql: String,
    /// Named parameters, in binding order
    pub params: Vec<(String, Value)>,
}

impl Statement {
    /// Create a statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Add one named parameter binding.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.push((name.into(), value));
        self
    }
}

/// Bind positional arguments to the named parameters found in the SQL text.
///
/// The nth argument binds to the nth distinct `@name` placeholder, matching
/// the ordinal-argument convention of generic pooled interfaces.
///
/// # Errors
/// Returns `InvalidArgument` when the argument count does not match the
/// number of distinct placeholders.
pub fn prepare_statement(
    sql: &str,
    args: &[Value],
) -> Result<Statement, SpannerMiddlewareError> {
    let names = named_parameters(sql);
    if names.len() != args.len() {
        return Err(SpannerMiddlewareError::invalid_argument(format!(
            "statement has {} parameters, but {} arguments were provided",
            names.len(),
            args.len()
        )));
    }
    Ok(Statement {
        sql: sql.to_string(),
        params: names.into_iter().zip(args.iter().cloned()).collect(),
    })
}

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backquoted,
    LineComment,
    BlockComment,
}

/// Extract the distinct `@name` parameters from a SQL string, in order of
/// first appearance. Quoted literals, quoted identifiers, and comments are
/// skipped; `@@` system variables are not parameters.
#[must_use]
pub fn named_parameters(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut names: Vec<String> = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0usize;
    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'`' => state = State::Backquoted,
                b'-' if bytes.get(idx + 1) == Some(&b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'#' => state = State::LineComment,
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment;
                    idx += 1;
                }
                b'@' if bytes.get(idx + 1) == Some(&b'@') => {
                    idx += 1;
                }
                b'@' => {
                    let start = idx + 1;
                    let mut end = start;
                    while end < bytes.len()
                        && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                    {
                        end += 1;
                    }
                    if end > start {
                        let name = sql[start..end].to_string();
                        if !names.contains(&name) {
                            names.push(name);
                        }
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    state = State::Normal;
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    state = State::Normal;
                }
            }
            State::Backquoted => {
                if b == b'`' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }
    names
}

const DDL_KEYWORDS: &[&str] = &["CREATE", "ALTER", "DROP", "GRANT", "REVOKE", "ANALYZE", "RENAME"];

/// True if the statement is schema DDL, judged by its first keyword after
/// leading whitespace and comments.
#[must_use]
pub fn is_ddl(sql: &str) -> bool {
    let trimmed = skip_leading_trivia(sql);
    let keyword: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    DDL_KEYWORDS.contains(&keyword.as_str())
}

fn skip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix('#') {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return trimmed;
        }
    }
}

/// A validated statement handle: the SQL text plus the parameter names it
/// expects. Execution goes back through the owning connection so the usual
/// dispatch rules apply.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    sql: String,
    param_names: Vec<String>,
}

impl PreparedStatement {
    pub(crate) fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            param_names: named_parameters(sql),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of arguments this statement expects.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.param_names.len()
    }

    /// # Errors
    /// Returns `InvalidArgument` when the argument count is wrong.
    pub(crate) fn check_args(&self, args: &[Value]) -> Result<(), SpannerMiddlewareError> {
        if args.len() != self.param_names.len() {
            return Err(SpannerMiddlewareError::invalid_argument(format!(
                "prepared statement has {} parameters, but {} arguments were provided",
                self.param_names.len(),
                args.len()
            )));
        }
        Ok(())
    }
}
