//! Restricted rule predicate language.
//!
//! Predicates are plain text in the rules file, parsed once when a rule set
//! is loaded into an [`Expr`] tree of comparisons joined by AND / OR / NOT.
//! There are no calls, no variables and no loops, so evaluation always
//! terminates and a decision can be checked later against the exact rule
//! text.
//!
//! ```text
//! counterparty_count <= 3 AND total_volume_usd > 100_000
//! NOT (score < 0.5 OR normalized.velocity < 0.2)
//! ```
//!
//! Evaluation is three-valued: a comparison touching a missing feature is
//! [`Truth::Undecided`], which AND / OR / NOT propagate Kleene-style.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::core::FeatureVector;

/// Maximum nesting depth of a predicate tree.
pub const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredicateError {
    #[error("empty predicate")]
    Empty,
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("invalid number {text:?} at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("expected {expected} at offset {offset}")]
    Expected { expected: &'static str, offset: usize },
    #[error("unexpected trailing input at offset {offset}")]
    Trailing { offset: usize },
    #[error("predicate nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Undecided,
}

impl Truth {
    fn from_bool(b: bool) -> Self {
        if b { Truth::True } else { Truth::False }
    }

    fn negate(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Undecided => Truth::Undecided,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
        }
    }
}

/// Which view of a feature a reference reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Raw,
    Normalized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRef {
    pub name: String,
    pub scale: Scale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Feature(FeatureRef),
    /// The calibrated risk score.
    Score,
}

impl Operand {
    fn value(&self, features: &FeatureVector, score: f64) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            Operand::Score => Some(score),
            Operand::Feature(FeatureRef { name, scale: Scale::Raw }) => features.raw(name),
            Operand::Feature(FeatureRef { name, scale: Scale::Normalized }) => {
                features.normalized(name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(bool),
    Comparison {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn evaluate(&self, features: &FeatureVector, score: f64) -> Truth {
        match self {
            Expr::Constant(b) => Truth::from_bool(*b),
            Expr::Comparison { left, op, right } => {
                match (left.value(features, score), right.value(features, score)) {
                    (Some(l), Some(r)) => Truth::from_bool(op.apply(l, r)),
                    _ => Truth::Undecided,
                }
            }
            Expr::And(items) => {
                let mut result = Truth::True;
                for item in items {
                    match item.evaluate(features, score) {
                        Truth::False => return Truth::False,
                        Truth::Undecided => result = Truth::Undecided,
                        Truth::True => {}
                    }
                }
                result
            }
            Expr::Or(items) => {
                let mut result = Truth::False;
                for item in items {
                    match item.evaluate(features, score) {
                        Truth::True => return Truth::True,
                        Truth::Undecided => result = Truth::Undecided,
                        Truth::False => {}
                    }
                }
                result
            }
            Expr::Not(inner) => inner.evaluate(features, score).negate(),
        }
    }

    /// Feature references in source order (duplicates kept).
    pub fn feature_refs(&self) -> Vec<&FeatureRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a FeatureRef>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Comparison { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Feature(f) = operand {
                        out.push(f);
                    }
                }
            }
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Expr::Not(inner) => inner.collect_refs(out),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Expr::Constant(_) | Expr::Comparison { .. } => 1,
            Expr::And(items) | Expr::Or(items) => {
                1 + items.iter().map(Expr::depth).max().unwrap_or(0)
            }
            Expr::Not(inner) => 1 + inner.depth(),
        }
    }
}

/// Parse predicate text into an expression tree.
pub fn parse(src: &str) -> Result<Expr, PredicateError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(PredicateError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.parse_or(1)?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(PredicateError::Trailing { offset: extra.offset });
    }
    if expr.depth() > MAX_DEPTH {
        return Err(PredicateError::TooDeep);
    }
    Ok(expr)
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    True,
    False,
}

#[derive(Debug)]
struct Lexed {
    token: Token,
    offset: usize,
}

fn eat(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
    if chars.peek().map(|&(_, c)| c) == Some(expected) {
        chars.next();
        true
    } else {
        false
    }
}

fn tokenize(src: &str) -> Result<Vec<Lexed>, PredicateError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let token = match ch {
            '(' | ')' | '≤' | '≥' | '≠' => {
                chars.next();
                match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '≤' => Token::Cmp(CmpOp::Le),
                    '≥' => Token::Cmp(CmpOp::Ge),
                    _ => Token::Cmp(CmpOp::Ne),
                }
            }
            '<' => {
                chars.next();
                Token::Cmp(if eat(&mut chars, '=') { CmpOp::Le } else { CmpOp::Lt })
            }
            '>' => {
                chars.next();
                Token::Cmp(if eat(&mut chars, '=') { CmpOp::Ge } else { CmpOp::Gt })
            }
            '=' => {
                chars.next();
                eat(&mut chars, '=');
                Token::Cmp(CmpOp::Eq)
            }
            '!' => {
                chars.next();
                if eat(&mut chars, '=') { Token::Cmp(CmpOp::Ne) } else { Token::Not }
            }
            '&' | '|' => {
                chars.next();
                if !eat(&mut chars, ch) {
                    return Err(PredicateError::UnexpectedChar { ch, offset });
                }
                if ch == '&' { Token::And } else { Token::Or }
            }
            c if c.is_ascii_digit() || c == '.' || c == '-' => lex_number(&mut chars, offset)?,
            c if c.is_alphabetic() || c == '_' => lex_word(&mut chars),
            other => return Err(PredicateError::UnexpectedChar { ch: other, offset }),
        };
        tokens.push(Lexed { token, offset });
    }
    Ok(tokens)
}

fn lex_number(
    chars: &mut Peekable<CharIndices<'_>>,
    offset: usize,
) -> Result<Token, PredicateError> {
    let mut text = String::new();
    if eat(chars, '-') {
        text.push('-');
    }
    while let Some(&(_, c)) = chars.peek() {
        let after_exponent = matches!(text.chars().last(), Some('e' | 'E'));
        if c.is_ascii_digit() || c == '.' || c == '_' || c == 'e' || c == 'E' {
            text.push(c);
        } else if (c == '+' || c == '-') && after_exponent {
            text.push(c);
        } else {
            break;
        }
        chars.next();
    }
    text.replace('_', "")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(Token::Number)
        .ok_or(PredicateError::InvalidNumber { text, offset })
}

fn lex_word(chars: &mut Peekable<CharIndices<'_>>) -> Token {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    match word.to_ascii_uppercase().as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "TRUE" => Token::True,
        "FALSE" => Token::False,
        _ => Token::Ident(word),
    }
}

// --- Parser ---

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|l| l.offset).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|l| l.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self, nesting: usize) -> Result<Expr, PredicateError> {
        let mut items = vec![self.parse_and(nesting)?];
        while self.eat(&Token::Or) {
            items.push(self.parse_and(nesting)?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Expr::Or(items) })
    }

    fn parse_and(&mut self, nesting: usize) -> Result<Expr, PredicateError> {
        let mut items = vec![self.parse_unary(nesting)?];
        while self.eat(&Token::And) {
            items.push(self.parse_unary(nesting)?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Expr::And(items) })
    }

    fn parse_unary(&mut self, nesting: usize) -> Result<Expr, PredicateError> {
        if nesting > MAX_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary(nesting + 1)?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or(nesting + 1)?;
                if !self.eat(&Token::RParen) {
                    return Err(PredicateError::Expected { expected: "')'", offset: self.offset() });
                }
                Ok(inner)
            }
            Some(Token::True) => {
                self.pos += 1;
                Ok(Expr::Constant(true))
            }
            Some(Token::False) => {
                self.pos += 1;
                Ok(Expr::Constant(false))
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, PredicateError> {
        let left = self.parse_operand()?;
        let offset = self.offset();
        let op = match self.advance() {
            Some(Token::Cmp(op)) => op,
            _ => return Err(PredicateError::Expected { expected: "a comparison operator", offset }),
        };
        let right = self.parse_operand()?;
        Ok(Expr::Comparison { left, op, right })
    }

    fn parse_operand(&mut self) -> Result<Operand, PredicateError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Ident(name)) => Ok(resolve_identifier(&name)),
            _ => Err(PredicateError::Expected { expected: "a feature name or number", offset }),
        }
    }
}

fn resolve_identifier(name: &str) -> Operand {
    if name == "score" || name == "risk_score" {
        return Operand::Score;
    }
    let (name, scale) = match name.strip_prefix("normalized.") {
        Some(dim) => (dim, Scale::Normalized),
        None => (name.strip_prefix("features.").unwrap_or(name), Scale::Raw),
    };
    Operand::Feature(FeatureRef {
        name: name.to_string(),
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FeatureValue;

    fn features() -> FeatureVector {
        let mut fv = FeatureVector::new();
        fv.insert("counterparty_count", FeatureValue::Present { raw: 2.0, normalized: 0.89 });
        fv.insert("total_volume_usd", FeatureValue::Present { raw: 125000.0, normalized: 0.73 });
        fv.insert("velocity", FeatureValue::missing("velocity not reported"));
        fv
    }

    fn eval(src: &str) -> Truth {
        parse(src).unwrap().evaluate(&features(), 0.83)
    }

    fn raw(name: &str) -> Operand {
        Operand::Feature(FeatureRef { name: name.into(), scale: Scale::Raw })
    }

    #[test]
    fn parses_simple_conjunction() {
        let expr = parse("counterparty_count <= 3 AND total_volume_usd > 100_000").unwrap();
        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::Comparison {
                    left: raw("counterparty_count"),
                    op: CmpOp::Le,
                    right: Operand::Number(3.0),
                },
                Expr::Comparison {
                    left: raw("total_volume_usd"),
                    op: CmpOp::Gt,
                    right: Operand::Number(100000.0),
                },
            ])
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a > 1 OR b > 2 AND c > 3").unwrap();
        let Expr::Or(items) = expr else { panic!("expected OR at the root") };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Expr::And(_)));
    }

    #[test]
    fn example_rule_fires() {
        assert_eq!(eval("counterparty_count ≤ 3 AND total_volume_usd > 100000"), Truth::True);
        assert_eq!(eval("counterparty_count > 3 && total_volume_usd > 100000"), Truth::False);
    }

    #[test]
    fn missing_feature_is_undecided() {
        assert_eq!(eval("velocity > 2"), Truth::Undecided);
        assert_eq!(eval("NOT velocity > 2"), Truth::Undecided);
        assert_eq!(eval("features.nonexistent == 1"), Truth::Undecided);
    }

    #[test]
    fn kleene_logic() {
        // False dominates AND, True dominates OR
        assert_eq!(eval("velocity > 2 AND counterparty_count > 5"), Truth::False);
        assert_eq!(eval("velocity > 2 AND counterparty_count < 5"), Truth::Undecided);
        assert_eq!(eval("velocity > 2 OR counterparty_count < 5"), Truth::True);
        assert_eq!(eval("velocity > 2 OR counterparty_count > 5"), Truth::Undecided);
    }

    #[test]
    fn score_and_normalized_operands() {
        assert_eq!(eval("score >= 0.8"), Truth::True);
        assert_eq!(eval("risk_score < 0.8"), Truth::False);
        assert_eq!(eval("normalized.total_volume_usd > 0.7"), Truth::True);
        assert_eq!(eval("0.5 < normalized.counterparty_count"), Truth::True);
    }

    #[test]
    fn not_and_parentheses() {
        assert_eq!(eval("!(counterparty_count > 3)"), Truth::True);
        assert_eq!(eval("not (score < 0.5 or total_volume_usd < 1e3)"), Truth::True);
        assert_eq!(eval("TRUE and false"), Truth::False);
    }

    #[test]
    fn equality_operators() {
        assert_eq!(eval("counterparty_count == 2"), Truth::True);
        assert_eq!(eval("counterparty_count = 2"), Truth::True);
        assert_eq!(eval("counterparty_count != 2"), Truth::False);
        assert_eq!(eval("counterparty_count ≠ 3"), Truth::True);
    }

    #[test]
    fn negative_and_exponent_numbers() {
        assert_eq!(eval("counterparty_count > -1"), Truth::True);
        assert_eq!(eval("total_volume_usd >= 1.25e5"), Truth::True);
        assert_eq!(eval("total_volume_usd > 1.25E+5"), Truth::False);
    }

    #[test]
    fn feature_refs_in_source_order() {
        let expr = parse(
            "features.total_volume_usd > 1 AND (counterparty_count < 2 OR normalized.velocity > 0)",
        )
        .unwrap();
        let names: Vec<&str> = expr.feature_refs().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["total_volume_usd", "counterparty_count", "velocity"]);
        assert_eq!(expr.feature_refs()[2].scale, Scale::Normalized);
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse("   "), Err(PredicateError::Empty));
        assert!(matches!(parse("a >"), Err(PredicateError::Expected { .. })));
        assert!(matches!(parse("a 3"), Err(PredicateError::Expected { .. })));
        assert!(matches!(
            parse("(a > 3"),
            Err(PredicateError::Expected { expected: "')'", .. })
        ));
        assert!(matches!(parse("a > 3 b"), Err(PredicateError::Trailing { offset: 6 })));
        assert!(matches!(
            parse("a > 3 & b < 1"),
            Err(PredicateError::UnexpectedChar { ch: '&', .. })
        ));
        assert!(matches!(parse("a > 1.2.3"), Err(PredicateError::InvalidNumber { .. })));
        assert!(matches!(
            parse("a > $5"),
            Err(PredicateError::UnexpectedChar { ch: '$', .. })
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}a > 1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse(&deep), Err(PredicateError::TooDeep));
        let nots = format!("{}a > 1", "NOT ".repeat(MAX_DEPTH + 1));
        assert_eq!(parse(&nots), Err(PredicateError::TooDeep));
        let ok = format!("{}a > 1{}", "(".repeat(4), ")".repeat(4));
        assert!(parse(&ok).is_ok());
    }

    #[test]
    fn depth_counts_levels() {
        assert_eq!(parse("a > 1").unwrap().depth(), 1);
        assert_eq!(parse("a > 1 AND b > 2").unwrap().depth(), 2);
        assert_eq!(parse("NOT (a > 1 OR b > 2)").unwrap().depth(), 3);
    }
}
