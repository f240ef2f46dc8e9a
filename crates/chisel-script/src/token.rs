//! Tokenizer for mutation scripts.

use chisel_core::errors::{ChiselError, ChiselResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Assign,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Newline,
}

/// A token plus the 1-based line it started on, for error messages.
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub(crate) fn tokenize(source: &str) -> ChiselResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 1;

    let fail = |line: usize, msg: String| {
        Err(ChiselError::mutation(format!("script line {line}: {msg}")))
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                tokens.push(Spanned {
                    token: Token::Newline,
                    line,
                });
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned {
                        token: Token::Eq,
                        line,
                    });
                    i += 2;
                } else {
                    tokens.push(Spanned {
                        token: Token::Assign,
                        line,
                    });
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned {
                        token: Token::Ne,
                        line,
                    });
                    i += 2;
                } else {
                    return fail(line, "unexpected '!'".to_string());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned {
                        token: Token::Le,
                        line,
                    });
                    i += 2;
                } else {
                    tokens.push(Spanned {
                        token: Token::Lt,
                        line,
                    });
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned {
                        token: Token::Ge,
                        line,
                    });
                    i += 2;
                } else {
                    tokens.push(Spanned {
                        token: Token::Gt,
                        line,
                    });
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Spanned {
                    token: Token::LeftParen,
                    line,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned {
                    token: Token::RightParen,
                    line,
                });
                i += 1;
            }
            '[' => {
                tokens.push(Spanned {
                    token: Token::LeftBracket,
                    line,
                });
                i += 1;
            }
            ']' => {
                tokens.push(Spanned {
                    token: Token::RightBracket,
                    line,
                });
                i += 1;
            }
            ',' => {
                tokens.push(Spanned {
                    token: Token::Comma,
                    line,
                });
                i += 1;
            }
            '.' => {
                tokens.push(Spanned {
                    token: Token::Dot,
                    line,
                });
                i += 1;
            }
            '+' => {
                tokens.push(Spanned {
                    token: Token::Plus,
                    line,
                });
                i += 1;
            }
            '-' => {
                tokens.push(Spanned {
                    token: Token::Minus,
                    line,
                });
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start_line = line;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return fail(start_line, "unterminated string".to_string())
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('\\') => '\\',
                                Some('"') => '"',
                                Some('\'') => '\'',
                                Some('0') => '\0',
                                other => {
                                    return fail(
                                        start_line,
                                        format!("unknown escape {other:?}"),
                                    )
                                }
                            };
                            text.push(escaped);
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    line: start_line,
                });
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<i64>()
                    .map_err(|_| ChiselError::mutation(format!("script line {line}: integer {text} out of range")))?;
                tokens.push(Spanned {
                    token: Token::Int(value),
                    line,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Spanned {
                    token: Token::Ident(text),
                    line,
                });
            }
            other => return fail(line, format!("unexpected character {other:?}")),
        }
    }
    tokens.push(Spanned {
        token: Token::Newline,
        line,
    });
    Ok(tokens)
}
