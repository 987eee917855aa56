//! Token scanner for style expressions.
//!
//! `${...}` references are resolved here, before any parsing, into dedicated
//! tokens: `${$.path}` becomes a [`Token::JsonPath`] and anything else a
//! [`Token::Variable`] carrying the property name verbatim. References inside
//! quoted strings are left alone and become template strings later.

use std::fmt;

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// Quoted literal, contents verbatim.
    Str(String),
    Ident(String),
    Variable(String),
    JsonPath(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Match,
    NotMatch,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Number(n) => return write!(f, "number {n}"),
            Token::Str(s) => return write!(f, "string '{s}'"),
            Token::Ident(name) => return write!(f, "identifier {name}"),
            Token::Variable(name) => return write!(f, "variable ${{{name}}}"),
            Token::JsonPath(path) => return write!(f, "JSONPath ${{{path}}}"),
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Not => "!",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::StrictEq => "===",
            Token::StrictNe => "!==",
            Token::LooseEq => "==",
            Token::LooseNe => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Match => "=~",
            Token::NotMatch => "!~",
        };
        f.write_str(text)
    }
}

// Longest operators first.
const OPERATORS: &[(&str, Token)] = &[
    ("===", Token::StrictEq),
    ("!==", Token::StrictNe),
    ("==", Token::LooseEq),
    ("!=", Token::LooseNe),
    ("=~", Token::Match),
    ("!~", Token::NotMatch),
    ("<=", Token::Le),
    (">=", Token::Ge),
    ("&&", Token::And),
    ("||", Token::Or),
    ("(", Token::LParen),
    (")", Token::RParen),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
    (",", Token::Comma),
    (".", Token::Dot),
    ("?", Token::Question),
    (":", Token::Colon),
    ("!", Token::Not),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    ("<", Token::Lt),
    (">", Token::Gt),
];

pub fn tokenize(source: &str) -> Result<Vec<Spanned<Token>>, ParseError> {
    Scanner { source, pos: 0 }.run()
}

struct Scanner<'a> {
    source: &'a str,
    pos: usize,
}

impl Scanner<'_> {
    fn rest(&self) -> &str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn run(mut self) -> Result<Vec<Spanned<Token>>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
                continue;
            }

            let start = self.pos;
            let token = if self.rest().starts_with("${") {
                self.reference()?
            } else if ch == '\'' || ch == '"' {
                self.string(ch)?
            } else if ch.is_ascii_digit()
                || (ch == '.' && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()))
            {
                self.number()?
            } else if is_ident_start(ch) {
                self.identifier()
            } else {
                self.operator()
                    .ok_or(ParseError::UnexpectedChar { ch, offset: start })?
            };

            tokens.push(Spanned {
                value: token,
                span: Span {
                    start,
                    end: self.pos,
                },
            });
        }
        Ok(tokens)
    }

    fn reference(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let body_start = start + 2;
        let close = self.source[body_start..]
            .find('}')
            .ok_or(ParseError::UnmatchedBrace { offset: start })?;
        let body = &self.source[body_start..body_start + close];
        self.pos = body_start + close + 1;

        Ok(if body.starts_with('$') {
            Token::JsonPath(body.to_string())
        } else {
            Token::Variable(body.to_string())
        })
    }

    fn string(&mut self, quote: char) -> Result<Token, ParseError> {
        let start = self.pos;
        let body_start = start + quote.len_utf8();
        let close = self.source[body_start..]
            .find(quote)
            .ok_or(ParseError::UnterminatedString { offset: start })?;
        self.pos = body_start + close + quote.len_utf8();
        Ok(Token::Str(self.source[body_start..body_start + close].to_string()))
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        self.eat_digits();
        if self.peek() == Some('.') {
            self.pos += 1;
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(ParseError::UnexpectedChar {
                    ch: self.source[mark..].chars().next().unwrap_or('e'),
                    offset: mark,
                });
            }
            self.eat_digits();
        }

        let text = &self.source[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::UnexpectedToken {
                found: text.to_string(),
                offset: start,
            })
    }

    fn eat_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn identifier(&mut self) -> Token {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !is_ident_part(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
        Token::Ident(self.source[start..self.pos].to_string())
    }

    fn operator(&mut self) -> Option<Token> {
        let (text, token) = OPERATORS
            .iter()
            .find(|(text, _)| self.rest().starts_with(text))?;
        self.pos += text.len();
        Some(token.clone())
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_part(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

/// Names referenced as `${name}` inside a template string, in order.
pub fn template_names(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let open = rest.find("${")?;
        let after = &rest[open + 2..];
        let close = after.find('}')?;
        rest = &after[close + 1..];
        Some(&after[..close])
    })
}

#[cfg(test)]
mod tests {
    use super::{Token, template_names, tokenize};
    use crate::error::ParseError;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn scans_variables_outside_quotes() {
        assert_eq!(
            kinds("${speed} > 10 ? 'fast' : 'slow'"),
            vec![
                Token::Variable("speed".into()),
                Token::Gt,
                Token::Number(10.0),
                Token::Question,
                Token::Str("fast".into()),
                Token::Colon,
                Token::Str("slow".into()),
            ]
        );
    }

    #[test]
    fn variable_names_are_verbatim() {
        assert_eq!(
            kinds("${road-type} === ${a b}"),
            vec![
                Token::Variable("road-type".into()),
                Token::StrictEq,
                Token::Variable("a b".into()),
            ]
        );
    }

    #[test]
    fn json_path_references_get_their_own_token() {
        assert_eq!(
            kinds("${$.phoneNumbers[0].type}"),
            vec![Token::JsonPath("$.phoneNumbers[0].type".into())]
        );
    }

    #[test]
    fn references_inside_strings_are_left_for_templates() {
        assert_eq!(
            kinds("'id: ${id}'"),
            vec![Token::Str("id: ${id}".into())]
        );
    }

    #[test]
    fn backslashes_in_strings_are_literal() {
        assert_eq!(kinds(r"'a\d+'"), vec![Token::Str(r"a\d+".into())]);
    }

    #[test]
    fn spans_cover_source_text() {
        let tokens = tokenize("  ${a} =~ b").unwrap();
        assert_eq!((tokens[0].span.start, tokens[0].span.end), (2, 6));
        assert_eq!(tokens[1].value, Token::Match);
        assert_eq!((tokens[2].span.start, tokens[2].span.end), (10, 11));
    }

    #[test]
    fn numbers_with_fractions_and_exponents() {
        assert_eq!(
            kinds("1.5 .25 2e3 7E-1"),
            vec![
                Token::Number(1.5),
                Token::Number(0.25),
                Token::Number(2000.0),
                Token::Number(0.7),
            ]
        );
    }

    #[test]
    fn reports_unmatched_braces_and_quotes() {
        assert_eq!(
            tokenize("${speed > 1").unwrap_err(),
            ParseError::UnmatchedBrace { offset: 0 }
        );
        assert_eq!(
            tokenize("1 + 'abc").unwrap_err(),
            ParseError::UnterminatedString { offset: 4 }
        );
        assert_eq!(
            tokenize("a & b").unwrap_err(),
            ParseError::UnexpectedChar { ch: '&', offset: 2 }
        );
    }

    #[test]
    fn template_names_in_order() {
        let names: Vec<_> = template_names("${a} and ${b-c} ${").collect();
        assert_eq!(names, vec!["a", "b-c"]);
    }
}
