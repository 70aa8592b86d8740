use std::{collections::HashSet, fmt};

use axon_memory::Snapshot;
use axon_types::Value;
use executer::EvalError;

/// A parsed scalar expression over literals and aliased resource reads.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ref { alias: Option<String>, name: String },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/"
        };
        f.write_str(symbol)
    }
}

/// Rendering always parenthesizes compound children, so the output parses
/// back to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Ref { alias: None, name } => f.write_str(name),
            Self::Ref { alias: Some(alias), name } => write!(f, "{alias}.{name}"),
            Self::Unary { op: UnaryOp::Not, expr } => write!(f, "!({expr})"),
            Self::Unary { op: UnaryOp::Neg, expr } => write!(f, "-({expr})"),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})")
        }
    }
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self, EvalError> {
        let tokens = lex(text)?;
        let mut parser = Parser { tokens, pos: 0, text };
        let expr = parser.or()?;
        if parser.pos != parser.tokens.len() {
            return Err(EvalError(format!("trailing input in expression {text:?}")))
        }
        Ok(expr)
    }

    /// Evaluates with `resolve` supplying the value behind each reference.
    pub fn eval(
        &self,
        resolve: &dyn Fn(Option<&str>, &str) -> Result<Value, EvalError>
    ) -> Result<Value, EvalError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ref { alias, name } => resolve(alias.as_deref(), name),
            Self::Unary { op, expr } => {
                let value = expr.eval(resolve)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Integer(i)) => Ok(Value::Integer(-i)),
                    (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                    (op, value) => {
                        Err(EvalError(format!("cannot apply {op:?} to a {} value", value.kind())))
                    }
                }
            }
            Self::Binary { op, lhs, rhs } => match op {
                // short-circuit on the boolean connectives
                BinOp::And | BinOp::Or => {
                    let left = expect_bool(lhs.eval(resolve)?)?;
                    if (*op == BinOp::And && !left) || (*op == BinOp::Or && left) {
                        return Ok(Value::Bool(left))
                    }
                    Ok(Value::Bool(expect_bool(rhs.eval(resolve)?)?))
                }
                _ => apply(*op, lhs.eval(resolve)?, rhs.eval(resolve)?)
            }
        }
    }

    /// Replaces every read of the firing node (bare or `local_alias`-
    /// qualified) with its snapshot value; `ext` reads are left free.
    pub fn bind_local(&self, snapshot: &Snapshot, local_alias: &str) -> Result<Self, EvalError> {
        match self {
            Self::Literal(_) => Ok(self.clone()),
            Self::Ref { alias, name } => match alias.as_deref() {
                Some("ext") => Ok(self.clone()),
                Some(a) if a != local_alias => {
                    Err(EvalError(format!("unknown alias {a:?} in expression")))
                }
                _ => snapshot
                    .get(name)
                    .cloned()
                    .map(Self::Literal)
                    .ok_or_else(|| EvalError(format!("unknown local resource {name:?}")))
            },
            Self::Unary { op, expr } => Ok(Self::Unary {
                op:   *op,
                expr: Box::new(expr.bind_local(snapshot, local_alias)?)
            }),
            Self::Binary { op, lhs, rhs } => Ok(Self::Binary {
                op:  *op,
                lhs: Box::new(lhs.bind_local(snapshot, local_alias)?),
                rhs: Box::new(rhs.bind_local(snapshot, local_alias)?)
            })
        }
    }

    /// Collects the `ext`-aliased resource names still read by this
    /// expression: its free variables after local binding.
    pub fn free_ext(&self, out: &mut HashSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref { alias, name } => {
                if alias.as_deref() == Some("ext") {
                    out.insert(name.clone());
                }
            }
            Self::Unary { expr, .. } => expr.free_ext(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.free_ext(out);
                rhs.free_ext(out);
            }
        }
    }
}

fn expect_bool(value: Value) -> Result<bool, EvalError> {
    value
        .as_bool()
        .ok_or_else(|| EvalError(format!("expected a bool, got a {} value", value.kind())))
}

fn apply(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    use Value::*;
    let mismatch = |lhs: &Value, rhs: &Value| {
        EvalError(format!("cannot apply {op} to {} and {} values", lhs.kind(), rhs.kind()))
    };
    // numeric pairs promote to float when either side is a float
    let numeric = |lhs: &Value, rhs: &Value| -> Option<(f64, f64, bool)> {
        match (lhs, rhs) {
            (Integer(a), Integer(b)) => Some((*a as f64, *b as f64, true)),
            (Integer(a), Float(b)) => Some((*a as f64, *b, false)),
            (Float(a), Integer(b)) => Some((*a, *b as f64, false)),
            (Float(a), Float(b)) => Some((*a, *b, false)),
            _ => None
        }
    };
    match op {
        BinOp::Eq | BinOp::Ne => {
            let equal = match (&lhs, &rhs) {
                (Bool(a), Bool(b)) => a == b,
                (Text(a), Text(b)) => a == b,
                _ => {
                    let (a, b, _) = numeric(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
                    a == b
                }
            };
            Ok(Bool(if op == BinOp::Eq { equal } else { !equal }))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Text(a), Text(b)) => a.partial_cmp(b),
                _ => {
                    let (a, b, _) = numeric(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
                    a.partial_cmp(&b)
                }
            }
            .ok_or_else(|| EvalError("incomparable values".to_owned()))?;
            let holds = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge()
            };
            Ok(Bool(holds))
        }
        BinOp::Add => match (&lhs, &rhs) {
            (Text(a), Text(b)) => Ok(Text(format!("{a}{b}"))),
            _ => arithmetic(op, lhs, rhs, numeric, mismatch)
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div => arithmetic(op, lhs, rhs, numeric, mismatch),
        BinOp::And | BinOp::Or => unreachable!("handled with short-circuiting")
    }
}

fn arithmetic(
    op: BinOp,
    lhs: Value,
    rhs: Value,
    numeric: impl Fn(&Value, &Value) -> Option<(f64, f64, bool)>,
    mismatch: impl Fn(&Value, &Value) -> EvalError
) -> Result<Value, EvalError> {
    let (a, b, both_ints) = numeric(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
    if both_ints {
        let (a, b) = (a as i64, b as i64);
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => a.checked_div(b),
            _ => unreachable!()
        };
        result
            .map(Value::Integer)
            .ok_or_else(|| EvalError(format!("integer arithmetic failed: {a} {op} {b}")))
    } else {
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            _ => unreachable!()
        };
        Ok(Value::Float(result))
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Dot,
    LParen,
    RParen,
    Op(BinOp),
    Bang,
    Minus
}

fn lex(text: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '&' | '|' => {
                if i + 1 >= bytes.len() || bytes[i + 1] != bytes[i] {
                    return Err(EvalError(format!("stray {c:?} in expression {text:?}")))
                }
                tokens.push(Token::Op(if c == '&' { BinOp::And } else { BinOp::Or }));
                i += 2;
            }
            '=' | '!' | '<' | '>' => {
                let eq = i + 1 < bytes.len() && bytes[i + 1] == b'=';
                let token = match (c, eq) {
                    ('=', true) => Token::Op(BinOp::Eq),
                    ('=', false) => {
                        return Err(EvalError(format!("stray '=' in expression {text:?}")))
                    }
                    ('!', true) => Token::Op(BinOp::Ne),
                    ('!', false) => Token::Bang,
                    ('<', true) => Token::Op(BinOp::Le),
                    ('<', false) => Token::Op(BinOp::Lt),
                    ('>', true) => Token::Op(BinOp::Ge),
                    (_, false) => Token::Op(BinOp::Gt),
                    (_, true) => Token::Op(BinOp::Ge)
                };
                i += if eq { 2 } else { 1 };
                tokens.push(token);
            }
            '"' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != b'"' {
                    end += 1;
                }
                if end == bytes.len() {
                    return Err(EvalError(format!("unterminated string in expression {text:?}")))
                }
                tokens.push(Token::Str(text[start..end].to_owned()));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit()
                        || (bytes[i] == b'.'
                            && i + 1 < bytes.len()
                            && bytes[i + 1].is_ascii_digit()))
                {
                    if bytes[i] == b'.' {
                        is_float = true;
                    }
                    i += 1;
                }
                let literal = &text[start..i];
                let token = if is_float {
                    Token::Float(
                        literal
                            .parse()
                            .map_err(|_| EvalError(format!("bad float literal {literal:?}")))?
                    )
                } else {
                    Token::Int(
                        literal
                            .parse()
                            .map_err(|_| EvalError(format!("bad integer literal {literal:?}")))?
                    )
                };
                tokens.push(token);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let ident = &text[start..i];
                tokens.push(match ident {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(ident.to_owned())
                });
            }
            other => return Err(EvalError(format!("unexpected {other:?} in expression {text:?}")))
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos:    usize,
    text:   &'a str
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            return true
        }
        false
    }

    fn error(&self, what: &str) -> EvalError {
        EvalError(format!("{what} in expression {:?}", self.text))
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Op(BinOp::Or)) {
            let rhs = self.and()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.comparison()?;
        while self.eat(&Token::Op(BinOp::And)) {
            let rhs = self.comparison()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::Op(
                op @ (BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
            )) => *op,
            _ => return Ok(lhs)
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(BinOp::Add)) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(self.unary()?) })
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.unary()?) })
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Integer(i))),
            Some(Token::Float(x)) => Ok(Expr::Literal(Value::Float(x))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::LParen) => {
                let expr = self.or()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.error("missing closing parenthesis"))
                }
                Ok(expr)
            }
            Some(Token::Ident(first)) => {
                if self.eat(&Token::Dot) {
                    match self.bump() {
                        Some(Token::Ident(name)) => Ok(Expr::Ref { alias: Some(first), name }),
                        _ => Err(self.error("expected a resource name after '.'"))
                    }
                } else {
                    Ok(Expr::Ref { alias: None, name: first })
                }
            }
            _ => Err(self.error("expected a literal, reference or parenthesized expression"))
        }
    }
}
