use crate::expr::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
}

const OPS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@",
    "|", "&", "^", "~",
];

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut end = pos;
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    end = i + ch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Name(src[pos..end].to_string()));
            continue;
        }

        if c.is_ascii_digit() {
            let mut end = pos;
            let mut is_float = false;
            while let Some(&(i, ch)) = chars.peek() {
                let accept = ch.is_ascii_digit()
                    || ch == '_'
                    || (ch == '.' && !is_float)
                    || ((ch == 'e' || ch == 'E') && !src[pos..end].contains(['e', 'E']));
                if !accept {
                    break;
                }
                if ch == '.' || ch == 'e' || ch == 'E' {
                    is_float = true;
                }
                end = i + 1;
                chars.next();
                if ch == 'e' || ch == 'E' {
                    if let Some(&(j, sign)) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            end = j + 1;
                            chars.next();
                        }
                    }
                }
            }
            let text: String = src[pos..end].chars().filter(|c| *c != '_').collect();
            let token = if is_float {
                Token::Float(
                    text.parse()
                        .map_err(|_| ParseError::new(format!("invalid number '{}'", text)))?,
                )
            } else {
                Token::Int(
                    text.parse()
                        .map_err(|_| ParseError::new(format!("invalid number '{}'", text)))?,
                )
            };
            tokens.push(token);
            continue;
        }

        if c == '\'' || c == '"' {
            chars.next();
            tokens.push(Token::Str(read_string(&mut chars, c)?));
            continue;
        }

        let rest = &src[pos..];
        match OPS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                for _ in 0..op.len() {
                    chars.next();
                }
                tokens.push(Token::Op(op));
            }
            None => return Err(ParseError::new(format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
) -> Result<String, ParseError> {
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '\'')) => out.push('\''),
                Some((_, '"')) => out.push('"'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            c if c == quote => return Ok(out),
            c => out.push(c),
        }
    }
    Err(ParseError::new("unterminated string literal"))
}
