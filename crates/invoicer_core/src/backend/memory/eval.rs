//! Filter and sort expression evaluation for the in-memory backend
//!
//! Grammar: `expr := and ("||" and)*`, `and := term ("&&" term)*`,
//! `term := "(" expr ")" | field op literal`. Literals are quoted strings,
//! numbers, `true`, `false` or `null`.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::query::{SortOrder, SortSpec, parse_datetime};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        field: String,
        op: CompareOp,
        literal: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

impl CompareOp {
    fn parse(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Gte,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Lte,
            "~" => CompareOp::Like,
            "!~" => CompareOp::NotLike,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(String),
    Literal(Value),
    And,
    Or,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(format!("unexpected '{c}' at {i}"));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".to_string()),
                        Some('\\') => {
                            if let Some(next) = chars.get(i + 1) {
                                text.push(*next);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            '=' | '!' | '>' | '<' | '~' | '?' => {
                let mut op = String::from(c);
                i += 1;
                while let Some(next @ ('=' | '~')) = chars.get(i) {
                    op.push(*next);
                    i += 1;
                }
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let number: f64 = raw.parse().map_err(|_| format!("invalid number '{raw}'"))?;
                tokens.push(Token::Literal(numeric(number)));
            }
            c if c.is_alphanumeric() || c == '_' || c == '@' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '.' | '@'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected '{other}' at {i}")),
        }
    }
    Ok(tokens)
}

fn numeric(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut branches = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            branches.push(self.and()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            Expr::Or(branches)
        })
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut terms = vec![self.term()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn term(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Ident(field)) => {
                let op = match self.next() {
                    Some(Token::Op(symbol)) => CompareOp::parse(&symbol)
                        .ok_or_else(|| format!("unsupported operator '{symbol}'"))?,
                    other => return Err(format!("expected operator after {field}, got {other:?}")),
                };
                let literal = match self.next() {
                    Some(Token::Literal(value)) => value,
                    other => return Err(format!("expected value after {field}, got {other:?}")),
                };
                Ok(Expr::Compare { field, op, literal })
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

/// Parse a filter expression; empty input yields `None`
pub fn parse_filter(input: &str) -> Result<Option<Expr>, String> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("trailing input after token {}", parser.pos));
    }
    Ok(Some(expr))
}

impl Expr {
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Expr::And(items) | Expr::Or(items) => items.iter().flat_map(Expr::fields).collect(),
            Expr::Compare { field, .. } => vec![field.as_str()],
        }
    }

    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        match self {
            Expr::And(items) => items.iter().all(|e| e.matches(record)),
            Expr::Or(items) => items.iter().any(|e| e.matches(record)),
            Expr::Compare { field, op, literal } => {
                let actual = record.get(field).unwrap_or(&Value::Null);
                compare_op(actual, *op, literal)
            }
        }
    }
}

fn compare_op(actual: &Value, op: CompareOp, literal: &Value) -> bool {
    match op {
        CompareOp::Like => contains(actual, literal),
        CompareOp::NotLike => !contains(actual, literal),
        CompareOp::Eq => compare(actual, literal) == Ordering::Equal,
        CompareOp::Ne => compare(actual, literal) != Ordering::Equal,
        CompareOp::Gt => compare(actual, literal) == Ordering::Greater,
        CompareOp::Gte => compare(actual, literal) != Ordering::Less,
        CompareOp::Lt => compare(actual, literal) == Ordering::Less,
        CompareOp::Lte => compare(actual, literal) != Ordering::Greater,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    text(actual)
        .to_lowercase()
        .contains(&text(needle).to_lowercase())
}

fn finite_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// How one column is ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collation {
    Number,
    Date,
    Text,
}

impl Collation {
    /// The narrowest collation every non-blank value satisfies
    fn of(values: &[&str]) -> Self {
        let present = || values.iter().filter(|v| !v.trim().is_empty());
        if present().all(|v| finite_number(v).is_some()) {
            Collation::Number
        } else if present().all(|v| parse_datetime(v).is_some()) {
            Collation::Date
        } else {
            Collation::Text
        }
    }

    /// Blank sorts first, then the collation decides
    fn compare(self, a: &str, b: &str) -> Ordering {
        match (a.trim().is_empty(), b.trim().is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match self {
            Collation::Number => match (finite_number(a), finite_number(b)) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.cmp(b),
            },
            Collation::Date => match (parse_datetime(a), parse_datetime(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a.cmp(b),
            },
            Collation::Text => a.cmp(b),
        }
    }
}

/// Numbers compare numerically, dates chronologically, everything else as text
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (a, b) = (text(a), text(b));
    Collation::of(&[a.as_str(), b.as_str()]).compare(&a, &b)
}

/// Parse a sort expression (`-amount,name`)
pub fn parse_sort(input: &str) -> Result<Vec<SortSpec>, String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::parse)
        .collect()
}

pub fn sort_records(records: &mut [Map<String, Value>], sorters: &[SortSpec]) {
    if sorters.is_empty() {
        return;
    }
    let column = |field: &str| -> Vec<String> {
        records
            .iter()
            .map(|r| text(r.get(field).unwrap_or(&Value::Null)))
            .collect()
    };
    let keys: Vec<(Vec<String>, Collation, SortOrder)> = sorters
        .iter()
        .map(|spec| {
            let values = column(&spec.field);
            let collation = Collation::of(&values.iter().map(String::as_str).collect::<Vec<_>>());
            (values, collation, spec.order)
        })
        .collect();

    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        for (values, collation, direction) in &keys {
            let ordering = collation.compare(&values[a], &values[b]);
            let ordering = match direction {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    let mut taken: Vec<Map<String, Value>> = records.iter_mut().map(std::mem::take).collect();
    for (slot, &i) in records.iter_mut().zip(&order) {
        *slot = std::mem::take(&mut taken[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_rendered_filters() {
        let expr = parse_filter(r#"status = "paid" && amount > "100""#)
            .unwrap()
            .unwrap();
        assert_eq!(expr.fields(), vec!["status", "amount"]);

        let paid = record(json!({ "status": "paid", "amount": 150 }));
        let small = record(json!({ "status": "paid", "amount": 90 }));
        assert!(expr.matches(&paid));
        assert!(!expr.matches(&small));
    }

    #[test]
    fn quoted_numbers_still_compare_numerically() {
        let expr = parse_filter(r#"amount >= "1000""#).unwrap().unwrap();
        assert!(expr.matches(&record(json!({ "amount": 1000 }))));
        assert!(!expr.matches(&record(json!({ "amount": 999.99 }))));
    }

    #[test]
    fn dates_compare_chronologically() {
        let expr = parse_filter(r#"invoice_date >= "2025-02-01""#).unwrap().unwrap();
        assert!(expr.matches(&record(json!({ "invoice_date": "2025-02-01 00:00:00.000Z" }))));
        assert!(!expr.matches(&record(json!({ "invoice_date": "2025-01-31 23:59:59.000Z" }))));
    }

    #[test]
    fn like_is_case_insensitive() {
        let expr = parse_filter(r#"name ~ "acme""#).unwrap().unwrap();
        assert!(expr.matches(&record(json!({ "name": "ACME Corp" }))));
        let expr = parse_filter(r#"name !~ "acme""#).unwrap().unwrap();
        assert!(!expr.matches(&record(json!({ "name": "ACME Corp" }))));
    }

    #[test]
    fn supports_grouping_and_typed_literals() {
        let expr = parse_filter(r#"(status = "paid" || status = "sent") && amount > 10.5"#)
            .unwrap()
            .unwrap();
        assert!(expr.matches(&record(json!({ "status": "sent", "amount": 11 }))));
        assert!(!expr.matches(&record(json!({ "status": "draft", "amount": 11 }))));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_filter("status =").is_err());
        assert!(parse_filter(r#"status = "paid" &&"#).is_err());
        assert!(parse_filter(r#"tags ?= "vip""#).is_err());
        assert!(parse_filter(r#"name = "unterminated"#).is_err());
        assert_eq!(parse_filter("  ").unwrap(), None);
    }

    #[test]
    fn sorts_by_multiple_fields() {
        let mut records = vec![
            record(json!({ "id": "a", "status": "paid", "amount": 10 })),
            record(json!({ "id": "b", "status": "draft", "amount": 30 })),
            record(json!({ "id": "c", "status": "paid", "amount": 20 })),
        ];
        let sorters = parse_sort("status,-amount").unwrap();
        sort_records(&mut records, &sorters);
        let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn mixed_columns_fall_back_to_text() {
        let mut records: Vec<_> = ["10", "9", "10x", "nan", "2"]
            .into_iter()
            .map(|n| record(json!({ "invoice_number": n })))
            .collect();
        sort_records(&mut records, &parse_sort("invoice_number").unwrap());
        let order: Vec<_> = records
            .iter()
            .map(|r| r["invoice_number"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["10", "10x", "2", "9", "nan"]);
    }

    #[test]
    fn numeric_columns_sort_numerically_with_blanks_first() {
        let mut records = vec![
            record(json!({ "id": "a", "amount": "10" })),
            record(json!({ "id": "b", "amount": 9 })),
            record(json!({ "id": "c" })),
            record(json!({ "id": "d", "amount": 100.5 })),
        ];
        sort_records(&mut records, &parse_sort("amount").unwrap());
        let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn infinities_are_not_numbers() {
        assert_eq!(compare(&json!("inf"), &json!("5")), Ordering::Greater);
        assert_eq!(compare(&json!("10"), &json!("9")), Ordering::Greater);
        assert_eq!(compare(&json!("10x"), &json!("9")), Ordering::Less);
    }
}
