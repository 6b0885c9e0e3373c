//! Quote-aware command-line splitting.
//!
//! The result is an argument vector; nothing is ever passed to a shell.
//! Unquoted control operators are refused outright so a command such as
//! `ls; rm -r x` can never be mistaken for a single operation.

use crate::error::SecurityError;

/// Split `line` into tokens.
///
/// - whitespace separates tokens
/// - `'single'` quotes are literal; `''` inside them is a literal quote
/// - `"double"` quotes honour `\"`, `\\`, `` \` `` and `\$`
/// - an unquoted `\` escapes the next character
pub fn tokenize(line: &str) -> Result<Vec<String>, SecurityError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => {
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                current.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => current.push(c),
                        None => return Err(unterminated('\'')),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.peek().copied() {
                            Some(next @ ('"' | '\\' | '`' | '$')) => {
                                chars.next();
                                current.push(next);
                            }
                            _ => current.push('\\'),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated('"')),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(c) => {
                    in_token = true;
                    current.push(c);
                }
                None => {
                    return Err(SecurityError::Malformed(
                        "trailing escape character".to_string(),
                    ));
                }
            },
            ';' | '|' | '&' | '<' | '>' | '`' | '\n' | '\r' => {
                return Err(SecurityError::ShellSyntax(format!(
                    "unquoted '{}'",
                    ch.escape_default()
                )));
            }
            '$' if matches!(chars.peek(), Some('(' | '{')) => {
                return Err(SecurityError::ShellSyntax(
                    "command or variable substitution".to_string(),
                ));
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unterminated(quote: char) -> SecurityError {
    SecurityError::Malformed(format!("unterminated {quote} quote"))
}
