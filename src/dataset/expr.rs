//! Arithmetic formula compilation for derived columns.
//!
//! Formulas are compiled once against the registry (names become column
//! indices) and evaluated per row against the value slice. Grammar, loosest
//! to tightest binding:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | power
//! power   := primary ('^' unary)?            right-associative
//! primary := number | name | name '(' expr {',' expr} ')' | '(' expr ')'
//! ```
//!
//! Functions: `abs`, `sqrt`, `exp`, `log` (one argument), `min`, `max` (two).
//! Any unresolved name is a configuration error at compile time, never at
//! row-evaluation time.

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func1 {
    Abs,
    Sqrt,
    Exp,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func2 {
    Min,
    Max,
}

/// A compiled formula over value columns.
#[derive(Debug, Clone)]
pub enum Expr {
    Const(f64),
    Var(usize),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call1(Func1, Box<Expr>),
    Call2(Func2, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate against one row's value columns.
    pub fn eval(&self, values: &[f64]) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Var(i) => values[*i],
            Expr::Neg(a) => -a.eval(values),
            Expr::Add(a, b) => a.eval(values) + b.eval(values),
            Expr::Sub(a, b) => a.eval(values) - b.eval(values),
            Expr::Mul(a, b) => a.eval(values) * b.eval(values),
            Expr::Div(a, b) => a.eval(values) / b.eval(values),
            Expr::Pow(a, b) => a.eval(values).powf(b.eval(values)),
            Expr::Call1(f, a) => {
                let x = a.eval(values);
                match f {
                    Func1::Abs => x.abs(),
                    Func1::Sqrt => x.sqrt(),
                    Func1::Exp => x.exp(),
                    Func1::Log => x.ln(),
                }
            }
            Expr::Call2(f, a, b) => {
                let x = a.eval(values);
                let y = b.eval(values);
                match f {
                    Func2::Min => x.min(y),
                    Func2::Max => x.max(y),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(formula: &str) -> Result<Vec<Token>, AppError> {
    let mut out = Vec::new();
    let bytes = formula.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                out.push(Token::Plus);
                i += 1;
            }
            '-' => {
                out.push(Token::Minus);
                i += 1;
            }
            '*' => {
                out.push(Token::Star);
                i += 1;
            }
            '/' => {
                out.push(Token::Slash);
                i += 1;
            }
            '^' => {
                out.push(Token::Caret);
                i += 1;
            }
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            ',' => {
                out.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && matches!(bytes[i] as char, '0'..='9' | '.') {
                    i += 1;
                }
                if i < bytes.len() && matches!(bytes[i] as char, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && matches!(bytes[j] as char, '+' | '-') {
                        j += 1;
                    }
                    if j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &formula[start..i];
                let num: f64 = text.parse().map_err(|_| {
                    AppError::config(format!("formula '{formula}': bad number '{text}'"))
                })?;
                out.push(Token::Num(num));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && matches!(bytes[i] as char, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
                {
                    i += 1;
                }
                out.push(Token::Ident(formula[start..i].to_string()));
            }
            _ => {
                return Err(AppError::config(format!(
                    "formula '{formula}': unexpected character '{c}'"
                )));
            }
        }
    }
    Ok(out)
}

struct Parser<'a> {
    formula: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    resolve: &'a dyn Fn(&str) -> Option<usize>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn fail(&self, what: &str) -> AppError {
        AppError::config(format!("formula '{}': {what}", self.formula))
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), AppError> {
        match self.bump() {
            Some(t) if t == token => Ok(()),
            _ => Err(self.fail(what)),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.parse_term()?));
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.parse_term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr, AppError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(self.parse_unary()?));
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    lhs = Expr::Div(Box::new(lhs), Box::new(self.parse_unary()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, AppError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, AppError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.pos += 1;
            let exp = self.parse_unary()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, AppError> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(Expr::Const(n)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "missing ')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let mut args = vec![self.parse_expr()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.pos += 1;
                        args.push(self.parse_expr()?);
                    }
                    self.expect(Token::RParen, "missing ')' after arguments")?;
                    return self.build_call(&name, args);
                }
                match (self.resolve)(&name) {
                    Some(idx) => Ok(Expr::Var(idx)),
                    None => Err(self.fail(&format!(
                        "references '{name}', which is not a declared argument"
                    ))),
                }
            }
            _ => Err(self.fail("expected a value")),
        }
    }

    fn build_call(&self, name: &str, mut args: Vec<Expr>) -> Result<Expr, AppError> {
        match (name, args.len()) {
            ("abs", 1) => Ok(Expr::Call1(Func1::Abs, Box::new(args.remove(0)))),
            ("sqrt", 1) => Ok(Expr::Call1(Func1::Sqrt, Box::new(args.remove(0)))),
            ("exp", 1) => Ok(Expr::Call1(Func1::Exp, Box::new(args.remove(0)))),
            ("log", 1) => Ok(Expr::Call1(Func1::Log, Box::new(args.remove(0)))),
            ("min", 2) | ("max", 2) => {
                let a = Box::new(args.remove(0));
                let b = Box::new(args.remove(0));
                let f = if name == "min" { Func2::Min } else { Func2::Max };
                Ok(Expr::Call2(f, a, b))
            }
            ("abs" | "sqrt" | "exp" | "log" | "min" | "max", n) => Err(self.fail(&format!(
                "function '{name}' called with {n} argument(s)"
            ))),
            _ => Err(self.fail(&format!("unknown function '{name}'"))),
        }
    }
}

/// Compile a formula; `resolve` maps an allowed name to its column index.
pub fn compile(
    formula: &str,
    resolve: &dyn Fn(&str) -> Option<usize>,
) -> Result<Expr, AppError> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Err(AppError::config(format!("formula '{formula}' is empty")));
    }
    let mut parser = Parser {
        formula,
        tokens,
        pos: 0,
        resolve,
    };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.fail("trailing input after the expression"));
    }
    Ok(expr)
}
