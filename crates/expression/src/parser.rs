use crate::error::ParseError;
use crate::lexer::{Spanned, Token, tokenize};
use crate::syntax::{BinaryOp, Syntax, UnaryOp};

/// Binding power of binary operators. Higher binds tighter.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Or = 1,
    And = 2,
    Equality = 3,
    Relational = 4,
    Additive = 5,
    Multiplicative = 6,
}

fn binary_operator(token: &Token) -> Option<(BinaryOp, Precedence)> {
    Some(match token {
        Token::Or => (BinaryOp::Or, Precedence::Or),
        Token::And => (BinaryOp::And, Precedence::And),
        Token::StrictEq => (BinaryOp::StrictEq, Precedence::Equality),
        Token::StrictNe => (BinaryOp::StrictNe, Precedence::Equality),
        Token::LooseEq => (BinaryOp::LooseEq, Precedence::Equality),
        Token::LooseNe => (BinaryOp::LooseNe, Precedence::Equality),
        Token::Match => (BinaryOp::Match, Precedence::Equality),
        Token::NotMatch => (BinaryOp::NotMatch, Precedence::Equality),
        Token::Lt => (BinaryOp::Lt, Precedence::Relational),
        Token::Le => (BinaryOp::Le, Precedence::Relational),
        Token::Gt => (BinaryOp::Gt, Precedence::Relational),
        Token::Ge => (BinaryOp::Ge, Precedence::Relational),
        Token::Plus => (BinaryOp::Add, Precedence::Additive),
        Token::Minus => (BinaryOp::Sub, Precedence::Additive),
        Token::Star => (BinaryOp::Mul, Precedence::Multiplicative),
        Token::Slash => (BinaryOp::Div, Precedence::Multiplicative),
        Token::Percent => (BinaryOp::Rem, Precedence::Multiplicative),
        _ => return None,
    })
}

/// Parses exactly one expression.
pub fn parse(source: &str) -> Result<Syntax, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
    };
    let expr = parser.expression()?;

    if let Some(next) = parser.peek() {
        return Err(match next.value {
            Token::RParen | Token::RBracket | Token::Colon | Token::Question => {
                ParseError::UnexpectedToken {
                    found: next.value.to_string(),
                    offset: next.span.start,
                }
            }
            _ => ParseError::MultipleExpressions,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned<Token>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Spanned<Token>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|t| &t.value == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.next() {
            Some(t) if t.value == expected => Ok(()),
            Some(t) => Err(unexpected(&t)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn expression(&mut self) -> Result<Syntax, ParseError> {
        let test = self.binary(Precedence::Or as u8)?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(Token::Colon)?;
        let alternate = self.expression()?;
        Ok(Syntax::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary(&mut self, min: u8) -> Result<Syntax, ParseError> {
        let mut left = self.unary()?;
        while let Some((op, precedence)) = self.peek().and_then(|t| binary_operator(&t.value)) {
            if (precedence as u8) < min {
                break;
            }
            self.pos += 1;
            let right = self.binary(precedence as u8 + 1)?;
            left = Syntax::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Syntax, ParseError> {
        let op = match self.peek().map(|t| &t.value) {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Plus) => UnaryOp::Plus,
            _ => {
                let primary = self.primary()?;
                return self.postfix(primary);
            }
        };
        self.pos += 1;
        Ok(Syntax::Unary {
            op,
            operand: Box::new(self.unary()?),
        })
    }

    fn primary(&mut self) -> Result<Syntax, ParseError> {
        let token = self.next().ok_or(ParseError::UnexpectedEnd)?;
        Ok(match token.value {
            Token::Number(n) => Syntax::Number(n),
            Token::Str(s) => Syntax::String(s),
            Token::Ident(name) => Syntax::Identifier(name),
            Token::Variable(name) => Syntax::Variable(name),
            Token::JsonPath(path) => Syntax::JsonPath(path),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                inner
            }
            Token::LBracket => Syntax::Array(self.list(Token::RBracket)?),
            _ => return Err(unexpected(&token)),
        })
    }

    fn postfix(&mut self, mut expr: Syntax) -> Result<Syntax, ParseError> {
        loop {
            if self.eat(&Token::Dot) {
                let token = self.next().ok_or(ParseError::UnexpectedEnd)?;
                let Token::Ident(name) = token.value else {
                    return Err(unexpected(&token));
                };
                expr = Syntax::Member {
                    object: Box::new(expr),
                    property: Box::new(Syntax::Identifier(name)),
                    computed: false,
                };
            } else if self.eat(&Token::LBracket) {
                let property = self.expression()?;
                self.expect(Token::RBracket)?;
                expr = Syntax::Member {
                    object: Box::new(expr),
                    property: Box::new(property),
                    computed: true,
                };
            } else if self.eat(&Token::LParen) {
                let args = self.list(Token::RParen)?;
                expr = Syntax::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma separated expressions up to `close`; the opener is consumed.
    fn list(&mut self, close: Token) -> Result<Vec<Syntax>, ParseError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma)?;
        }
    }
}

fn unexpected(token: &Spanned<Token>) -> ParseError {
    ParseError::UnexpectedToken {
        found: token.value.to_string(),
        offset: token.span.start,
    }
}
