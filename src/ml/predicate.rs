//! Boolean filter expressions over demographic columns
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := and ( ("or" | "|") and )*
//! and     := unary ( ("and" | "&") unary )*
//! unary   := "not" unary | "(" expr ")" | compare
//! compare := operand ( cmp_op operand )+
//! operand := column | number | 'text' | "text"
//! ```
//!
//! Chained comparisons such as `40<age<50` mean `40<age and age<50`.

use crate::structs::{Cell, OutlierError, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Minus,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Column(usize),
    Literal(Cell),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Compare { operands: Vec<Operand>, ops: Vec<CmpOp> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// A compiled control-group predicate with column names resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    source: String,
    columns: Vec<String>,
    expr: Expr,
}

impl Predicate {
    /// Compile `source` against the given column names
    ///
    /// # Errors
    /// Returns `Config` on syntax errors or references to unknown columns
    pub fn parse(source: &str, columns: &[String]) -> Result<Self> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(OutlierError::Config("Control predicate is empty".into()));
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            columns,
        };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(OutlierError::Config(format!(
                "Unexpected {token:?} in control predicate '{source}'"
            )));
        }

        Ok(Self {
            source: source.to_string(),
            columns: columns.to_vec(),
            expr,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one row of cells laid out like the compiled columns
    ///
    /// # Errors
    /// Returns `Config` when ordering a number against text
    pub fn matches(&self, row: &[Cell]) -> Result<bool> {
        self.eval(&self.expr, row)
    }

    fn eval(&self, expr: &Expr, row: &[Cell]) -> Result<bool> {
        match expr {
            Expr::And(lhs, rhs) => Ok(self.eval(lhs, row)? && self.eval(rhs, row)?),
            Expr::Or(lhs, rhs) => Ok(self.eval(lhs, row)? || self.eval(rhs, row)?),
            Expr::Not(inner) => Ok(!self.eval(inner, row)?),
            Expr::Compare { operands, ops } => {
                for (pair, &op) in operands.windows(2).zip(ops) {
                    let lhs = resolve(&pair[0], row);
                    let rhs = resolve(&pair[1], row);
                    if !self.compare(lhs, op, rhs)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn compare(&self, lhs: &Cell, op: CmpOp, rhs: &Cell) -> Result<bool> {
        match (lhs, rhs) {
            (Cell::Missing, _) | (_, Cell::Missing) => Ok(op == CmpOp::Ne),
            (Cell::Number(a), Cell::Number(b)) => Ok(a
                .partial_cmp(b)
                .map_or(op == CmpOp::Ne, |ordering| op.accepts(ordering))),
            (Cell::Text(a), Cell::Text(b)) => Ok(op.accepts(a.cmp(b))),
            _ => match op {
                CmpOp::Eq => Ok(false),
                CmpOp::Ne => Ok(true),
                _ => Err(OutlierError::Config(format!(
                    "Cannot order '{lhs}' {} '{rhs}' in predicate '{}': number compared with text",
                    op.symbol(),
                    self.source
                ))),
            },
        }
    }

    /// Names of the columns this predicate reads
    #[must_use]
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut indices = Vec::new();
        collect_columns(&self.expr, &mut indices);
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|j| self.columns[j].as_str()).collect()
    }
}

static MISSING: Cell = Cell::Missing;

fn resolve<'a>(operand: &'a Operand, row: &'a [Cell]) -> &'a Cell {
    match operand {
        Operand::Column(j) => row.get(*j).unwrap_or(&MISSING),
        Operand::Literal(cell) => cell,
    }
}

fn collect_columns(expr: &Expr, out: &mut Vec<usize>) {
    match expr {
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            collect_columns(lhs, out);
            collect_columns(rhs, out);
        }
        Expr::Not(inner) => collect_columns(inner, out),
        Expr::Compare { operands, .. } => {
            out.extend(operands.iter().filter_map(|o| match o {
                Operand::Column(j) => Some(*j),
                Operand::Literal(_) => None,
            }));
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    columns: &'a [String],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(OutlierError::Config(
                        "Unbalanced parentheses in control predicate".into(),
                    )),
                }
            }
            _ => self.parse_compare(),
        }
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let mut operands = vec![self.parse_operand()?];
        let mut ops = Vec::new();
        while let Some(Token::Cmp(op)) = self.peek() {
            ops.push(*op);
            self.pos += 1;
            operands.push(self.parse_operand()?);
        }

        if ops.is_empty() {
            return Err(OutlierError::Config(
                "Control predicate terms must be comparisons, e.g. age>40".into(),
            ));
        }
        Ok(Expr::Compare { operands, ops })
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        match self.advance().cloned() {
            Some(Token::Ident(name)) => self
                .columns
                .iter()
                .position(|c| *c == name)
                .map(Operand::Column)
                .ok_or_else(|| {
                    OutlierError::Config(format!(
                        "Control predicate references unknown column '{name}'"
                    ))
                }),
            Some(Token::Number(n)) => Ok(Operand::Literal(Cell::Number(n))),
            Some(Token::Text(s)) => Ok(Operand::Literal(Cell::Text(s))),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Number(n)) => Ok(Operand::Literal(Cell::Number(-n))),
                _ => Err(OutlierError::Config(
                    "'-' must be followed by a number in control predicate".into(),
                )),
            },
            Some(token) => Err(OutlierError::Config(format!(
                "Expected a column or value, found {token:?}"
            ))),
            None => Err(OutlierError::Config(
                "Control predicate ends unexpectedly".into(),
            )),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let followed_by_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, followed_by_eq) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    ('>', true) => CmpOp::Ge,
                    ('>', false) => CmpOp::Gt,
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    _ => {
                        return Err(OutlierError::Config(format!(
                            "Unexpected '{c}' at position {i} in control predicate, use == or !="
                        )))
                    }
                };
                tokens.push(Token::Cmp(op));
                i += if followed_by_eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| {
                        OutlierError::Config("Unterminated string in control predicate".into())
                    })?;
                tokens.push(Token::Text(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() {
                    let d = chars[i];
                    let exponent_sign = (d == '+' || d == '-')
                        && matches!(chars.get(i - 1), Some('e' | 'E'));
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| {
                    OutlierError::Config(format!("Invalid number '{text}' in control predicate"))
                })?;
                tokens.push(Token::Number(value));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            _ => {
                return Err(OutlierError::Config(format!(
                    "Unexpected character '{c}' in control predicate"
                )))
            }
        }
    }

    Ok(tokens)
}
