//! Restricted arithmetic expression evaluator.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary (('^' | '**') unary)?      right-associative
//! primary := number | constant | function '(' args ')' | '(' expr ')'
//! ```
//!
//! Only the fixed constant and function tables below are recognised. There are
//! no variables, attributes, strings, or calls into anything else.

use thiserror::Error;

/// Longest accepted input, in bytes.
pub const MAX_INPUT_LEN: usize = 1024;
/// Deepest accepted nesting of parentheses, unary operators and calls.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("expression longer than {} bytes", MAX_INPUT_LEN)]
    TooLong,
    #[error("expression nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("math domain error in {0}")]
    Domain(String),
    #[error("result is not a finite number")]
    NonFinite,
}

const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("tau", std::f64::consts::TAU),
];

/// Evaluate `input` and return a finite number.
pub fn evaluate(input: &str) -> Result<f64, ExprError> {
    if input.len() > MAX_INPUT_LEN {
        return Err(ExprError::TooLong);
    }
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        input_len: input.len(),
    };
    let value = parser.expr()?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(ExprError::Syntax {
            offset: token.offset,
            message: "unexpected trailing input".to_string(),
        });
    }
    finite(value)
}

/// Render a result the way a calculator would: integers without a fraction.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let tok = match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                i += 1;
                Tok::Caret
            }
            b'*' => Tok::Star,
            b'/' => Tok::Slash,
            b'%' => Tok::Percent,
            b'^' => Tok::Caret,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b',' => Tok::Comma,
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i);
                let text = &input[start..i];
                let value = text.parse::<f64>().map_err(|_| ExprError::Syntax {
                    offset: start,
                    message: format!("invalid number '{text}'"),
                })?;
                tokens.push(Token {
                    tok: Tok::Num(value),
                    offset: start,
                });
                continue;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                let name = &input[start..i];
                let name = name.strip_prefix("math.").unwrap_or(name);
                tokens.push(Token {
                    tok: Tok::Ident(name.to_ascii_lowercase()),
                    offset: start,
                });
                continue;
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(ExprError::Syntax {
                    offset: start,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        };
        i += 1;
        tokens.push(Token { tok, offset: start });
    }
    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.input_len, |t| t.offset)
    }

    fn syntax(&self, message: &str) -> ExprError {
        ExprError::Syntax {
            offset: self.offset(),
            message: message.to_string(),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax(&format!("expected {what}")))
        }
    }

    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Tok::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Tok::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ExprError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Tok::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(Tok::Slash) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    value /= rhs;
                }
                Some(Tok::Percent) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    // floored modulo: the result takes the divisor's sign
                    value -= rhs * (value / rhs).floor();
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, ExprError> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.pos += 1;
                self.enter()?;
                let value = self.unary()?;
                self.leave();
                Ok(-value)
            }
            Some(Tok::Plus) => {
                self.pos += 1;
                self.enter()?;
                let value = self.unary()?;
                self.leave();
                Ok(value)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, ExprError> {
        let base = self.primary()?;
        if self.peek() == Some(&Tok::Caret) {
            self.pos += 1;
            self.enter()?;
            let exponent = self.unary()?;
            self.leave();
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, ExprError> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(self.syntax("unexpected end of expression"));
        };
        match token.tok {
            Tok::Num(value) => {
                self.pos += 1;
                Ok(value)
            }
            Tok::LParen => {
                self.pos += 1;
                self.enter()?;
                let value = self.expr()?;
                self.leave();
                self.expect(&Tok::RParen, "')'")?;
                Ok(value)
            }
            Tok::Ident(name) => {
                self.pos += 1;
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    self.enter()?;
                    let args = self.args()?;
                    self.leave();
                    call(&name, &args)
                } else {
                    CONSTANTS
                        .iter()
                        .find(|(constant, _)| *constant == name)
                        .map(|(_, value)| *value)
                        .ok_or(ExprError::UnknownIdentifier(name))
                }
            }
            _ => Err(self.syntax("expected a number, constant, function or '('")),
        }
    }

    fn args(&mut self) -> Result<Vec<f64>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.peek() {
                Some(Tok::Comma) => self.pos += 1,
                Some(Tok::RParen) => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.syntax("expected ',' or ')'")),
            }
        }
    }
}

fn finite(value: f64) -> Result<f64, ExprError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExprError::NonFinite)
    }
}

fn pow(base: f64, exponent: f64) -> Result<f64, ExprError> {
    if base == 0.0 && exponent < 0.0 {
        return Err(ExprError::DivisionByZero);
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(ExprError::Domain("pow".to_string()));
    }
    finite(base.powf(exponent))
}

fn call(name: &str, args: &[f64]) -> Result<f64, ExprError> {
    let arity = |expected: &'static str| ExprError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    };
    let one = || match args {
        [x] => Ok(*x),
        _ => Err(arity("1")),
    };
    let domain = || ExprError::Domain(name.to_string());

    let value = match name {
        "abs" => one()?.abs(),
        "sqrt" => {
            let x = one()?;
            if x < 0.0 {
                return Err(domain());
            }
            x.sqrt()
        }
        "sin" => one()?.sin(),
        "cos" => one()?.cos(),
        "tan" => one()?.tan(),
        "asin" | "acos" => {
            let x = one()?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(domain());
            }
            if name == "asin" { x.asin() } else { x.acos() }
        }
        "atan" => one()?.atan(),
        "exp" => one()?.exp(),
        "floor" => one()?.floor(),
        "ceil" => one()?.ceil(),
        "round" => match args {
            [x] => x.round(),
            [x, digits] => {
                let scale = 10f64.powi(*digits as i32);
                (x * scale).round() / scale
            }
            _ => return Err(arity("1 or 2")),
        },
        "ln" | "log10" => {
            let x = one()?;
            if x <= 0.0 {
                return Err(domain());
            }
            if name == "ln" { x.ln() } else { x.log10() }
        }
        "log" => match args {
            [x] if *x > 0.0 => x.ln(),
            [x, base] if *x > 0.0 && *base > 0.0 && *base != 1.0 => x.log(*base),
            [_] | [_, _] => return Err(domain()),
            _ => return Err(arity("1 or 2")),
        },
        "pow" => match args {
            [x, y] => return pow(*x, *y),
            _ => return Err(arity("2")),
        },
        "min" | "max" => {
            let Some((first, rest)) = args.split_first() else {
                return Err(arity("at least 1"));
            };
            rest.iter().fold(*first, |acc, &x| {
                if name == "min" { acc.min(x) } else { acc.max(x) }
            })
        }
        _ => return Err(ExprError::UnknownIdentifier(name.to_string())),
    };
    finite(value)
}
