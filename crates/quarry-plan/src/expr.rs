//! Row expressions for filters and sort items.
//!
//! Grammar accepted by [`Expr::parse`]:
//!
//! ```text
//! expr    := term ("or" term)*
//! term    := factor ("and" factor)*
//! factor  := "not" factor | "(" expr ")" | operand [cmpop operand | "is" ["not"] "null"]
//! operand := column | 'string' | "string" | integer | float | true | false | null
//! cmpop   := == | = | != | <> | < | <= | > | >=
//! ```
//!
//! Evaluation distinguishes a present `Null` from an *absent* value: a column
//! that resolves in the metadata but lies beyond the end of the row evaluates
//! to `None`, and absence propagates through every operator.

use std::fmt;

use quarry_core::prelude::{DataType, Metadata, OrderType, Value};
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }

    fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "==" | "=" => CmpOp::Eq,
            "!=" | "<>" => CmpOp::NotEq,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::LtEq,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::GtEq,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Compare {
        left: Box<Expr>,
        op: CmpOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn lit(v: Value) -> Expr {
        Expr::Literal(v)
    }

    pub fn compare(self, op: CmpOp, right: Expr) -> Expr {
        Expr::Compare {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// Evaluate against one row. `Ok(None)` means the value is absent.
    pub fn eval(&self, md: &Metadata, row: &[Value]) -> Result<Option<Value>> {
        match self {
            Expr::Column(name) => {
                let idx = md
                    .index_of(name)
                    .ok_or_else(|| PlanError::Expr(format!("unknown column '{name}'")))?;
                Ok(row.get(idx).cloned())
            }
            Expr::Literal(v) => Ok(Some(v.clone())),
            Expr::Compare { left, op, right } => {
                let (Some(l), Some(r)) = (left.eval(md, row)?, right.eval(md, row)?) else {
                    return Ok(None);
                };
                if l.is_null() || r.is_null() {
                    return Ok(Some(Value::Null));
                }
                if !comparable(&l, &r) {
                    return Err(PlanError::Expr(format!(
                        "cannot compare {l:?} with {r:?}"
                    )));
                }
                let ord = l.cmp_natural(&r);
                let hit = match op {
                    CmpOp::Eq => ord.is_eq(),
                    CmpOp::NotEq => ord.is_ne(),
                    CmpOp::Lt => ord.is_lt(),
                    CmpOp::LtEq => ord.is_le(),
                    CmpOp::Gt => ord.is_gt(),
                    CmpOp::GtEq => ord.is_ge(),
                };
                Ok(Some(Value::Bool(hit)))
            }
            Expr::And(a, b) => {
                let (Some(x), Some(y)) = (a.eval(md, row)?, b.eval(md, row)?) else {
                    return Ok(None);
                };
                let v = match (truth(&x)?, truth(&y)?) {
                    (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                };
                Ok(Some(v))
            }
            Expr::Or(a, b) => {
                let (Some(x), Some(y)) = (a.eval(md, row)?, b.eval(md, row)?) else {
                    return Ok(None);
                };
                let v = match (truth(&x)?, truth(&y)?) {
                    (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                };
                Ok(Some(v))
            }
            Expr::Not(a) => match a.eval(md, row)? {
                None => Ok(None),
                Some(x) => Ok(Some(match truth(&x)? {
                    Some(b) => Value::Bool(!b),
                    None => Value::Null,
                })),
            },
            Expr::IsNull(a) => Ok(a.eval(md, row)?.map(|v| Value::Bool(v.is_null()))),
        }
    }

    /// Filter semantics: only a present `true` keeps the row.
    pub fn eval_predicate(&self, md: &Metadata, row: &[Value]) -> Result<bool> {
        match self.eval(md, row)? {
            Some(v) => Ok(truth(&v)?.unwrap_or(false)),
            None => Ok(false),
        }
    }

    /// Static result type against `md`.
    pub fn data_type(&self, md: &Metadata) -> Result<DataType> {
        match self {
            Expr::Column(name) => Ok(md.type_of(name)?),
            // untyped null literal
            Expr::Literal(v) => Ok(v.data_type().unwrap_or(DataType::Utf8)),
            Expr::Compare { left, right, .. } => {
                left.data_type(md)?;
                right.data_type(md)?;
                Ok(DataType::Boolean)
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.data_type(md)?;
                b.data_type(md)?;
                Ok(DataType::Boolean)
            }
            Expr::Not(a) | Expr::IsNull(a) => {
                a.data_type(md)?;
                Ok(DataType::Boolean)
            }
        }
    }

    /// Column names referenced anywhere in the expression.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Column(name) => out.push(name),
            Expr::Literal(_) => {}
            Expr::Compare { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Expr::Not(a) | Expr::IsNull(a) => a.collect_columns(out),
        }
    }

    pub fn parse(text: &str) -> Result<Expr> {
        let tokens = tokenize(text)?;
        let mut p = Parser { tokens, pos: 0 };
        let expr = p.parse_or()?;
        if let Some(tok) = p.peek() {
            return Err(PlanError::Expr(format!(
                "unexpected '{}' in '{text}'",
                tok.text()
            )));
        }
        Ok(expr)
    }
}

fn comparable(l: &Value, r: &Value) -> bool {
    match (l.data_type(), r.data_type()) {
        (Some(a), Some(b)) => a == b || (a.is_numeric() && b.is_numeric()),
        _ => true,
    }
}

/// `Some(bool)` for booleans, `None` for null, error otherwise.
fn truth(v: &Value) -> Result<Option<bool>> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(PlanError::Expr(format!("expected boolean, got {other:?}"))),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{name}"),
            Expr::Literal(Value::Str(s)) => write!(f, "'{s}'"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Compare { left, op, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::And(a, b) => write!(f, "({a} and {b})"),
            Expr::Or(a, b) => write!(f, "({a} or {b})"),
            Expr::Not(a) => write!(f, "not {a}"),
            Expr::IsNull(a) => write!(f, "{a} is null"),
        }
    }
}

/// One `ORDER BY` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortItem {
    pub expr: Expr,
    pub order: OrderType,
}

impl SortItem {
    pub fn new(expr: Expr, order: OrderType) -> Self {
        Self { expr, order }
    }

    /// `"<expr> [asc|desc]"`.
    pub fn parse(text: &str) -> Result<SortItem> {
        let trimmed = text.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (body, order) = if let Some(body) = lower.strip_suffix(" desc") {
            (&trimmed[..body.len()], OrderType::Desc)
        } else if let Some(body) = lower.strip_suffix(" asc") {
            (&trimmed[..body.len()], OrderType::Asc)
        } else {
            (trimmed, OrderType::Asc)
        };
        Ok(SortItem::new(Expr::parse(body)?, order))
    }
}

impl fmt::Display for SortItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.order {
            OrderType::Asc => "asc",
            OrderType::Desc => "desc",
        };
        write!(f, "{} {dir}", self.expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    Op(String),
    LParen,
    RParen,
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Ident(s) | Token::Number(s) | Token::Op(s) => s.clone(),
            Token::Str(s) => format!("'{s}'"),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            out.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            out.push(Token::RParen);
            i += 1;
        } else if c == '\'' || c == '"' {
            let end = chars[i + 1..]
                .iter()
                .position(|&d| d == c)
                .ok_or_else(|| PlanError::Expr(format!("unterminated string in '{text}'")))?;
            out.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
            i += end + 2;
        } else if "=!<>".contains(c) {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let op = if CmpOp::from_symbol(&two).is_some() {
                two
            } else {
                c.to_string()
            };
            if CmpOp::from_symbol(&op).is_none() {
                return Err(PlanError::Expr(format!("bad operator '{op}' in '{text}'")));
            }
            i += op.len();
            out.push(Token::Op(op));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            out.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            out.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(PlanError::Expr(format!("unexpected '{c}' in '{text}'")));
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        while self.eat_keyword("and") {
            let right = self.parse_factor()?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_factor()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(PlanError::Expr("missing ')'".into())),
            }
        }
        let left = self.parse_operand()?;
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(PlanError::Expr("expected 'null' after 'is'".into()));
            }
            let e = Expr::IsNull(Box::new(left));
            return Ok(if negated { Expr::Not(Box::new(e)) } else { e });
        }
        if let Some(Token::Op(sym)) = self.peek() {
            let op = CmpOp::from_symbol(sym)
                .ok_or_else(|| PlanError::Expr(format!("bad operator '{sym}'")))?;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(left.compare(op, right));
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::lit(Value::Str(s))),
            Some(Token::Number(n)) => parse_number(&n).map(Expr::lit),
            Some(Token::Ident(id)) => Ok(match id.to_ascii_lowercase().as_str() {
                "true" => Expr::lit(Value::Bool(true)),
                "false" => Expr::lit(Value::Bool(false)),
                "null" => Expr::lit(Value::Null),
                _ => Expr::Column(id),
            }),
            Some(tok) => Err(PlanError::Expr(format!("unexpected '{}'", tok.text()))),
            None => Err(PlanError::Expr("unexpected end of expression".into())),
        }
    }
}

fn parse_number(text: &str) -> Result<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::I64(i));
    }
    text.parse::<f64>()
        .map(Value::F64)
        .map_err(|_| PlanError::Expr(format!("bad number '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::prelude::Field;

    fn md() -> Metadata {
        Metadata::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("region", DataType::Utf8),
            Field::new("amount", DataType::Float64),
        ])
    }

    fn row(id: i64, region: &str, amount: Option<f64>) -> Vec<Value> {
        vec![
            Value::I64(id),
            Value::Str(region.into()),
            amount.map(Value::F64).unwrap_or(Value::Null),
        ]
    }

    #[test]
    fn parses_conjunctions_of_comparisons() {
        let e = Expr::parse("amount > 10 and region == 'eu'").unwrap();
        assert_eq!(
            e,
            Expr::col("amount")
                .compare(CmpOp::Gt, Expr::lit(Value::I64(10)))
                .and(Expr::col("region").compare(CmpOp::Eq, Expr::lit(Value::Str("eu".into()))))
        );
        assert_eq!(e.columns(), vec!["amount", "region"]);
    }

    #[test]
    fn predicate_evaluation_is_three_valued() {
        let md = md();
        let e = Expr::parse("amount >= 10.5 AND region != \"us\"").unwrap();
        assert!(e.eval_predicate(&md, &row(1, "eu", Some(11.0))).unwrap());
        assert!(!e.eval_predicate(&md, &row(2, "us", Some(11.0))).unwrap());
        assert!(!e.eval_predicate(&md, &row(3, "eu", None)).unwrap());
        assert_eq!(
            e.eval(&md, &row(3, "eu", None)).unwrap(),
            Some(Value::Null)
        );

        let f = Expr::parse("amount is null or id = 7").unwrap();
        assert!(f.eval_predicate(&md, &row(3, "eu", None)).unwrap());
        assert!(f.eval_predicate(&md, &row(7, "eu", Some(1.0))).unwrap());
        assert!(!f.eval_predicate(&md, &row(8, "eu", Some(1.0))).unwrap());
    }

    #[test]
    fn columns_past_the_row_end_are_absent() {
        let md = md();
        let short = vec![Value::I64(1)];
        assert_eq!(Expr::col("amount").eval(&md, &short).unwrap(), None);
        assert_eq!(
            Expr::parse("amount > 1").unwrap().eval(&md, &short).unwrap(),
            None
        );
        assert!(Expr::col("nope").eval(&md, &short).is_err());
    }

    #[test]
    fn mismatched_types_are_errors() {
        let e = Expr::parse("region > 3").unwrap();
        assert!(e.eval(&md(), &row(1, "eu", None)).is_err());
    }

    #[test]
    fn sort_items_parse_direction() {
        let item = SortItem::parse("amount DESC").unwrap();
        assert_eq!(item.order, OrderType::Desc);
        assert_eq!(item.expr, Expr::col("amount"));
        assert_eq!(SortItem::parse("id").unwrap().order, OrderType::Asc);
        assert_eq!(item.to_string(), "amount desc");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Expr::parse("amount >").is_err());
        assert!(Expr::parse("'open").is_err());
        assert!(Expr::parse("a = 1 b").is_err());
        assert!(Expr::parse("a ~ 1").is_err());
    }
}
