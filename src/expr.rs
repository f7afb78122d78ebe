//! Expression parser and evaluator for view definitions.
//!
//! Supports expressions like:
//! - `cost > 90`
//! - `name = 'A' AND cost IS NOT NULL`
//! - `date > NOW()` (`GETDATE()` is accepted as an alias)
//! - `f1 + f2`, `-(a * 2) / b`
//! - `SUM(f) + 1`, `MIN(f1 + f2)`, `COUNT(*)`, `AVG(cost)`
//!
//! Predicates use SQL three-valued logic: comparisons involving NULL yield
//! NULL, and a filter keeps a row only when it evaluates to TRUE.

use crate::aggregate::AggregateFunction;
use crate::error::{Result, ViewError};
use crate::value::{ArithOp, Value};
use std::fmt;

/// A parsed expression that can be evaluated against a row or a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to a column of the base table
    Column(String),
    Literal(Value),
    /// The evaluation's current time
    Now,
    Negate(Box<Expr>),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Aggregate call; `arg` is `None` only for `COUNT(*)`
    Aggregate {
        func: AggregateFunction,
        arg: Option<Box<Expr>>,
    },
    /// Reduced value of aggregate slot `n`; produced by view compilation
    AggregateRef(usize),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq, // = or ==
    Ne, // != or <>
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Token types for lexing
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Is,
    LParen,
    RParen,
    Comma,
    Eof,
}

/// Lexer for tokenizing expression strings
struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    fn read_number(&mut self) -> Result<Token> {
        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !is_float {
                is_float = true;
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            num_str
                .parse()
                .map(Token::Float)
                .map_err(|_| ViewError::Parse(format!("Invalid number: {}", num_str)))
        } else {
            num_str
                .parse()
                .map(Token::Int)
                .map_err(|_| ViewError::Parse(format!("Integer out of range: {}", num_str)))
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        self.advance(); // opening quote
        let mut s = String::new();

        while let Some(c) = self.advance() {
            if c == quote {
                // SQL-style doubled quote
                if self.peek() == Some(quote) {
                    self.advance();
                    s.push(quote);
                    continue;
                }
                return Ok(Token::String(s));
            }
            s.push(c);
        }

        Err(ViewError::Parse("Unterminated string".to_string()))
    }

    /// Consume `second` if it follows, returning `two` or `one` accordingly.
    fn either(&mut self, second: char, two: Token, one: Token) -> Token {
        self.advance();
        if self.peek() == Some(second) {
            self.advance();
            two
        } else {
            one
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let c = match self.peek() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        let token = match c {
            '(' => { self.advance(); Token::LParen }
            ')' => { self.advance(); Token::RParen }
            ',' => { self.advance(); Token::Comma }
            '+' => { self.advance(); Token::Plus }
            '-' => { self.advance(); Token::Minus }
            '*' => { self.advance(); Token::Star }
            '/' => { self.advance(); Token::Slash }
            '=' => self.either('=', Token::Eq, Token::Eq),
            '!' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '<' => {
                self.advance();
                match self.peek() {
                    Some('=') => { self.advance(); Token::Le }
                    Some('>') => { self.advance(); Token::Ne }
                    _ => Token::Lt,
                }
            }
            '>' => self.either('=', Token::Ge, Token::Gt),
            '\'' | '"' => self.read_string(c)?,
            _ if c.is_ascii_digit() => self.read_number()?,
            _ if c.is_alphabetic() || c == '_' => {
                let ident = self.read_ident();
                match ident.to_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    "TRUE" => Token::Bool(true),
                    "FALSE" => Token::Bool(false),
                    _ => Token::Ident(ident),
                }
            }
            _ => return Err(ViewError::Parse(format!("Unexpected character: {}", c))),
        };
        Ok(token)
    }
}

/// Parser for building expression AST
struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if &self.current == expected {
            self.advance()
        } else {
            Err(ViewError::Parse(format!(
                "Expected {:?}, got {:?}",
                expected, self.current
            )))
        }
    }

    fn parse(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    /// OR has the lowest precedence
    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.current == Token::Not {
            self.advance()?;
            let expr = self.parse_not()?;
            Ok(Expr::Not(Box::new(expr)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        if self.current == Token::Is {
            self.advance()?;
            let negated = if self.current == Token::Not {
                self.advance()?;
                true
            } else {
                false
            };
            self.expect(&Token::Null)?;
            return Ok(if negated {
                Expr::IsNotNull(Box::new(left))
            } else {
                Expr::IsNull(Box::new(left))
            });
        }

        let op = match self.current {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_additive()?;

        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.current != Token::Minus {
            return self.parse_primary();
        }
        self.advance()?;
        let operand = self.parse_unary()?;

        // Fold negative numeric literals
        Ok(match operand {
            Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
            Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
            other => Expr::Negate(Box::new(other)),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let expr = match self.current.clone() {
            Token::LParen => {
                self.advance()?;
                let expr = self.parse()?;
                self.expect(&Token::RParen)?;
                return Ok(expr);
            }
            Token::Int(n) => Expr::Literal(Value::Int(n)),
            Token::Float(f) => Expr::Literal(Value::Float(f)),
            Token::String(s) => Expr::Literal(Value::String(s)),
            Token::Bool(b) => Expr::Literal(Value::Bool(b)),
            Token::Null => Expr::Literal(Value::Null),
            Token::Ident(name) => {
                self.advance()?;
                if self.current == Token::LParen {
                    return self.parse_call(&name);
                }
                return Ok(Expr::Column(name));
            }
            other => {
                return Err(ViewError::Parse(format!(
                    "Expected expression, got {:?}",
                    other
                )))
            }
        };
        self.advance()?;
        Ok(expr)
    }

    /// Parse a function call; the current token is the opening parenthesis.
    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        self.advance()?;
        let upper = name.to_uppercase();

        if upper == "NOW" || upper == "GETDATE" {
            self.expect(&Token::RParen)?;
            return Ok(Expr::Now);
        }

        let func = match upper.as_str() {
            "COUNT" => AggregateFunction::Count,
            "SUM" => AggregateFunction::Sum,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            "AVG" => AggregateFunction::Avg,
            _ => return Err(ViewError::Parse(format!("Unknown function: {}", name))),
        };

        if func == AggregateFunction::Count && self.current == Token::Star {
            self.advance()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::Aggregate {
                func: AggregateFunction::CountStar,
                arg: None,
            });
        }

        let arg = self.parse()?;
        if self.current == Token::Comma {
            return Err(ViewError::Parse(format!("{} takes a single argument", upper)));
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::Aggregate {
            func,
            arg: Some(Box::new(arg)),
        })
    }
}

/// Parse an expression string into an Expr AST.
pub fn parse_expr(input: &str) -> Result<Expr> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse()?;

    if parser.current != Token::Eof {
        return Err(ViewError::Parse(format!(
            "Unexpected token after expression: {:?}",
            parser.current
        )));
    }
    Ok(expr)
}

// ============================================================================
// Evaluation
// ============================================================================

/// Inputs an expression is evaluated against.
///
/// `lookup` resolves column references without materializing a row map.
/// `aggregates` holds the reduced values that `Expr::AggregateRef` points at.
pub struct EvalContext<'a> {
    pub lookup: &'a dyn Fn(&str) -> Option<Value>,
    pub aggregates: &'a [Value],
    /// Milliseconds since the Unix epoch
    pub now: i64,
}

/// Evaluate an expression to a value.
pub fn eval_expr(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    match expr {
        Expr::Column(name) => {
            (ctx.lookup)(name).ok_or_else(|| ViewError::ColumnNotFound(name.clone()))
        }
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Now => Ok(Value::Timestamp(ctx.now)),
        Expr::Negate(inner) => eval_expr(inner, ctx)?.negate(),
        Expr::Arith { op, left, right } => {
            let l = eval_expr(left, ctx)?;
            let r = eval_expr(right, ctx)?;
            l.arith(*op, &r)
        }
        Expr::Compare { op, left, right } => {
            let l = eval_expr(left, ctx)?;
            let r = eval_expr(right, ctx)?;
            Ok(match l.sql_cmp(&r) {
                None => Value::Null,
                Some(ordering) => Value::Bool(match op {
                    CompareOp::Eq => ordering.is_eq(),
                    CompareOp::Ne => ordering.is_ne(),
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                }),
            })
        }
        Expr::IsNull(inner) => Ok(Value::Bool(eval_expr(inner, ctx)?.is_null())),
        Expr::IsNotNull(inner) => Ok(Value::Bool(!eval_expr(inner, ctx)?.is_null())),
        Expr::And(left, right) => {
            let l = truth(eval_expr(left, ctx)?, "AND")?;
            if l == Some(false) {
                return Ok(Value::Bool(false));
            }
            let r = truth(eval_expr(right, ctx)?, "AND")?;
            Ok(match (l, r) {
                (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            })
        }
        Expr::Or(left, right) => {
            let l = truth(eval_expr(left, ctx)?, "OR")?;
            if l == Some(true) {
                return Ok(Value::Bool(true));
            }
            let r = truth(eval_expr(right, ctx)?, "OR")?;
            Ok(match (l, r) {
                (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            })
        }
        Expr::Not(inner) => {
            Ok(truth(eval_expr(inner, ctx)?, "NOT")?.map_or(Value::Null, |b| Value::Bool(!b)))
        }
        Expr::AggregateRef(slot) => ctx.aggregates.get(*slot).cloned().ok_or_else(|| {
            ViewError::InvalidDefinition(format!("aggregate slot {} is not bound", slot))
        }),
        Expr::Aggregate { func, .. } => Err(ViewError::InvalidDefinition(format!(
            "{} cannot be evaluated per row",
            func.name()
        ))),
    }
}

/// Evaluate a predicate: true only when the expression yields TRUE.
pub fn eval_predicate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<bool> {
    Ok(truth(eval_expr(expr, ctx)?, "WHERE")? == Some(true))
}

fn truth(value: Value, op: &'static str) -> Result<Option<bool>> {
    match value {
        Value::Bool(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(ViewError::InvalidOperands {
            op,
            left: other.type_name().to_string(),
            right: "BOOL".to_string(),
        }),
    }
}

// ============================================================================
// Inspection
// ============================================================================

/// Visit `expr` and every sub-expression in pre-order.
pub fn walk<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Negate(inner) | Expr::IsNull(inner) | Expr::IsNotNull(inner) | Expr::Not(inner) => {
            walk(inner, visit)
        }
        Expr::Arith { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::And(left, right)
        | Expr::Or(left, right) => {
            walk(left, visit);
            walk(right, visit);
        }
        Expr::Aggregate { arg: Some(arg), .. } => walk(arg, visit),
        Expr::Aggregate { arg: None, .. }
        | Expr::Column(_)
        | Expr::Literal(_)
        | Expr::Now
        | Expr::AggregateRef(_) => {}
    }
}

/// Extract all column names referenced in an expression.
pub fn extract_columns(expr: &Expr) -> Vec<String> {
    let mut columns = Vec::new();
    walk(expr, &mut |e| {
        if let Expr::Column(name) = e {
            columns.push(name.clone());
        }
    });
    columns.sort();
    columns.dedup();
    columns
}

pub fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    walk(expr, &mut |e| found |= matches!(e, Expr::Aggregate { .. }));
    found
}

pub fn references_now(expr: &Expr) -> bool {
    let mut found = false;
    walk(expr, &mut |e| found |= matches!(e, Expr::Now));
    found
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Now => write!(f, "NOW()"),
            Expr::Negate(inner) => write!(f, "-({})", inner),
            Expr::Arith { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Compare { op, left, right } => write!(f, "{} {} {}", left, op.symbol(), right),
            Expr::IsNull(inner) => write!(f, "{} IS NULL", inner),
            Expr::IsNotNull(inner) => write!(f, "{} IS NOT NULL", inner),
            Expr::And(left, right) => write!(f, "({} AND {})", left, right),
            Expr::Or(left, right) => write!(f, "({} OR {})", left, right),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::Aggregate { func, arg: None } => write!(f, "{}(*)", func.name()),
            Expr::Aggregate { func, arg: Some(arg) } => write!(f, "{}({})", func.name(), arg),
            Expr::AggregateRef(slot) => write!(f, "${}", slot),
        }
    }
}
