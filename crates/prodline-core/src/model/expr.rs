//! Propositional constraint expressions.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! iff     := implies ( ("<=>" | "iff") implies )*
//! implies := or ( ("=>" | "implies") implies )?
//! or      := and ( ("|" | "||" | "or") and )*
//! and     := unary ( ("&" | "&&" | "and") unary )*
//! unary   := ("!" | "not") unary | atom
//! atom    := "true" | "false" | IDENT | "(" iff ")"
//! ```

use crate::error::{ProdlineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(bool),
    /// 1-based variable.
    Var(usize),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Iff(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Three-valued evaluation over a partial assignment (`values[v - 1]`).
    /// `None` means the result still depends on unset variables.
    pub fn eval(&self, values: &[Option<bool>]) -> Option<bool> {
        match self {
            Expr::Const(b) => Some(*b),
            Expr::Var(v) => values.get(v - 1).copied().flatten(),
            Expr::Not(e) => e.eval(values).map(|b| !b),
            Expr::And(a, b) => match (a.eval(values), b.eval(values)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::Or(a, b) => match (a.eval(values), b.eval(values)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Expr::Implies(a, b) => match (a.eval(values), b.eval(values)) {
                (Some(false), _) | (_, Some(true)) => Some(true),
                (Some(true), Some(false)) => Some(false),
                _ => None,
            },
            Expr::Iff(a, b) => match (a.eval(values), b.eval(values)) {
                (Some(x), Some(y)) => Some(x == y),
                _ => None,
            },
        }
    }

    /// Parse `input`, resolving identifiers through `resolve`.
    pub fn parse(input: &str, resolve: impl Fn(&str) -> Option<usize>) -> Result<Expr> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
            resolve: &resolve,
        };
        let expr = parser.iff()?;
        if let Some(tok) = parser.peek() {
            return Err(parser.error(format!("unexpected token {tok:?}")));
        }
        Ok(expr)
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Not,
    And,
    Or,
    Implies,
    Iff,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let err = |message: String| ProdlineError::ParseExpression {
        input: input.to_string(),
        message,
    };
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
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
            '!' | '~' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += if rest.starts_with("&&") { 2 } else { 1 };
            }
            '|' => {
                tokens.push(Token::Or);
                i += if rest.starts_with("||") { 2 } else { 1 };
            }
            '=' if rest.starts_with("=>") => {
                tokens.push(Token::Implies);
                i += 2;
            }
            '<' if rest == "<=>" => {
                tokens.push(Token::Iff);
                i += 3;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "not" => Token::Not,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "implies" => Token::Implies,
                    "iff" => Token::Iff,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    resolve: &'a dyn Fn(&str) -> Option<usize>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> ProdlineError {
        ProdlineError::ParseExpression {
            input: self.input.to_string(),
            message,
        }
    }

    fn iff(&mut self) -> Result<Expr> {
        let mut lhs = self.implies()?;
        while self.eat(&Token::Iff) {
            let rhs = self.implies()?;
            lhs = Expr::Iff(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn implies(&mut self) -> Result<Expr> {
        let lhs = self.or()?;
        if self.eat(&Token::Implies) {
            let rhs = self.implies()?;
            return Ok(Expr::Implies(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while self.eat(&Token::And) {
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.iff()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.error("missing ')'".to_string()));
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => Ok(Expr::Const(true)),
                    "false" => Ok(Expr::Const(false)),
                    _ => (self.resolve)(&name)
                        .map(Expr::Var)
                        .ok_or(ProdlineError::UnknownFeature(name)),
                }
            }
            Some(tok) => Err(self.error(format!("unexpected token {tok:?}"))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Expr> {
        Expr::parse(input, |name| match name {
            "A" => Some(1),
            "B" => Some(2),
            "C" => Some(3),
            "Base-Lib" => Some(4),
            _ => None,
        })
    }

    fn var(v: usize) -> Box<Expr> {
        Box::new(Expr::Var(v))
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse("A | B & C").unwrap(),
            Expr::Or(var(1), Box::new(Expr::And(var(2), var(3))))
        );
    }

    #[test]
    fn implies_is_right_associative() {
        assert_eq!(
            parse("A => B => C").unwrap(),
            Expr::Implies(var(1), Box::new(Expr::Implies(var(2), var(3))))
        );
    }

    #[test]
    fn keywords_and_symbols_are_equivalent() {
        assert_eq!(
            parse("not A or B").unwrap(),
            parse("!A | B").unwrap()
        );
        assert_eq!(parse("A iff B").unwrap(), parse("A <=> B").unwrap());
        assert_eq!(parse("A && (B || C)").unwrap(), parse("A & (B | C)").unwrap());
    }

    #[test]
    fn identifiers_may_contain_dashes() {
        assert_eq!(parse("Base-Lib").unwrap(), Expr::Var(4));
    }

    #[test]
    fn unknown_feature_is_reported() {
        let err = parse("A => Missing").unwrap_err();
        assert!(matches!(err, ProdlineError::UnknownFeature(n) if n == "Missing"));
    }

    #[test]
    fn malformed_expressions_fail() {
        for input in ["A &", "(A | B", "A B", "A # B", ""] {
            assert!(parse(input).is_err(), "expected parse error: {input}");
        }
    }

    #[test]
    fn three_valued_evaluation() {
        let e = parse("A => B").unwrap();
        assert_eq!(e.eval(&[Some(true), None]), None);
        assert_eq!(e.eval(&[Some(false), None]), Some(true));
        assert_eq!(e.eval(&[Some(true), Some(false)]), Some(false));
        assert_eq!(e.eval(&[None, Some(true)]), Some(true));
    }
}
