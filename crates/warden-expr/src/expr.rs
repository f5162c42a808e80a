use std::collections::{BTreeMap, BTreeSet};

use logos::Logos;

use crate::error::ExprError;
use crate::token::Token;

/// Compiled boolean expression. `&&` and `||` share one precedence level and
/// associate left; `!` binds tighter; parentheses group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Ident(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr, ExprError> {
        let mut tokens = Vec::new();
        for (result, span) in Token::lexer(input).spanned() {
            match result {
                Ok(token) => tokens.push(token),
                Err(()) => return Err(ExprError::Lex(span.start)),
            }
        }
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
        }
    }

    /// Evaluate against a complete truth map. Every identifier must be
    /// present; the caller runs all checks before calling this.
    pub fn eval(&self, values: &BTreeMap<String, bool>) -> Result<bool, ExprError> {
        match self {
            Expr::Ident(name) => values
                .get(name)
                .copied()
                .ok_or_else(|| ExprError::UnknownIdent(name.clone())),
            Expr::Not(inner) => Ok(!inner.eval(values)?),
            Expr::And(lhs, rhs) => Ok(lhs.eval(values)? & rhs.eval(values)?),
            Expr::Or(lhs, rhs) => Ok(lhs.eval(values)? | rhs.eval(values)?),
        }
    }

    /// De-duplicated set of identifiers referenced by the expression.
    pub fn idents(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_idents(&mut out);
        out
    }

    fn collect_idents(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Not(inner) => inner.collect_idents(out),
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.collect_idents(out);
                rhs.collect_idents(out);
            }
        }
    }
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
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                    let rhs = self.term()?;
                    lhs = Expr::And(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Or) => {
                    self.next();
                    let rhs = self.term()?;
                    lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.term()?))),
            Some(Token::OpenParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::CloseParen) => Ok(inner),
                    Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
                    None => Err(ExprError::UnclosedParen),
                }
            }
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn single_ident() {
        let expr = Expr::parse("ready").unwrap();
        assert!(expr.eval(&truth(&[("ready", true)])).unwrap());
        assert!(!expr.eval(&truth(&[("ready", false)])).unwrap());
    }

    #[test]
    fn negation_with_grouping() {
        // !A && (B || C)
        let expr = Expr::parse("!A && (B || C)").unwrap();
        assert!(!expr
            .eval(&truth(&[("A", true), ("B", false), ("C", true)]))
            .unwrap());
        assert!(expr
            .eval(&truth(&[("A", false), ("B", false), ("C", true)]))
            .unwrap());
    }

    #[test]
    fn and_or_associate_left() {
        // Parsed as (a || b) && c, not a || (b && c).
        let expr = Expr::parse("a || b && c").unwrap();
        assert!(!expr
            .eval(&truth(&[("a", true), ("b", false), ("c", false)]))
            .unwrap());
        assert!(expr
            .eval(&truth(&[("a", true), ("b", false), ("c", true)]))
            .unwrap());
    }

    #[test]
    fn not_binds_tighter_than_and() {
        let expr = Expr::parse("!a && b").unwrap();
        assert!(expr.eval(&truth(&[("a", false), ("b", true)])).unwrap());
    }

    #[test]
    fn double_negation() {
        let expr = Expr::parse("!!a").unwrap();
        assert!(expr.eval(&truth(&[("a", true)])).unwrap());
    }

    #[test]
    fn unknown_ident_is_an_error() {
        let expr = Expr::parse("a && b").unwrap();
        assert_eq!(
            expr.eval(&truth(&[("a", true)])),
            Err(ExprError::UnknownIdent("b".into()))
        );
    }

    #[test]
    fn idents_are_deduplicated() {
        let expr = Expr::parse("a && (a || b)").unwrap();
        let idents: Vec<String> = expr.idents().into_iter().collect();
        assert_eq!(idents, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Expr::parse(""), Err(ExprError::Empty));
        assert_eq!(Expr::parse("   "), Err(ExprError::Empty));
        assert!(matches!(Expr::parse("a &&"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(
            Expr::parse("(a || b"),
            Err(ExprError::UnclosedParen)
        ));
        assert!(matches!(
            Expr::parse("a b"),
            Err(ExprError::UnexpectedToken(_))
        ));
        assert!(matches!(Expr::parse("a & b"), Err(ExprError::Lex(_))));
    }
}
