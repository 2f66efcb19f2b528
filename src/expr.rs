//! Restricted expression grammar for animation template parameters.
//!
//! A parameter is either a quoted word (`"inc"`, used for enum-like values)
//! or an arithmetic expression over numeric literals and the single bound
//! variable `signal`: operators `+ - * /`, unary minus, parentheses.
//! Expressions are compiled once when a template is built and evaluated per
//! resolution; evaluation itself cannot fail.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),

    #[error("unknown identifier '{0}' (only 'signal' is bound)")]
    UnknownIdent(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("quoted literal cannot appear inside arithmetic")]
    StringInArithmetic,
}

/// A compiled parameter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledExpr {
    /// A quoted word, e.g. `"incDec"`. Only valid as the whole expression.
    Word(String),
    /// An arithmetic expression over `signal`.
    Arith(Node),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Num(f64),
    Signal,
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
}

impl CompiledExpr {
    /// Compile a parameter source string.
    pub fn compile(src: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };

        // A quoted word is only legal as the entire expression.
        if let Some(Token::Str(_)) = parser.peek() {
            if parser.tokens.len() == 1 {
                if let Some(Token::Str(w)) = parser.next() {
                    return Ok(CompiledExpr::Word(w));
                }
            }
            return Err(ExprError::StringInArithmetic);
        }

        let node = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(ExprError::UnexpectedToken(parser.pos));
        }
        Ok(CompiledExpr::Arith(node))
    }

    /// Shorthand for a numeric constant.
    pub fn literal(value: f64) -> Self {
        CompiledExpr::Arith(Node::Num(value))
    }

    /// Evaluate an arithmetic expression with the given signal value.
    /// Returns `None` for `Word` expressions, which carry no numeric value.
    pub fn eval(&self, signal: f64) -> Option<f64> {
        match self {
            CompiledExpr::Word(_) => None,
            CompiledExpr::Arith(node) => Some(node.eval(signal)),
        }
    }

    pub fn as_word(&self) -> Option<&str> {
        match self {
            CompiledExpr::Word(w) => Some(w),
            CompiledExpr::Arith(_) => None,
        }
    }
}

impl Node {
    fn eval(&self, signal: f64) -> f64 {
        match self {
            Node::Num(n) => *n,
            Node::Signal => signal,
            Node::Neg(a) => -a.eval(signal),
            Node::Add(a, b) => a.eval(signal) + b.eval(signal),
            Node::Sub(a, b) => a.eval(signal) - b.eval(signal),
            Node::Mul(a, b) => a.eval(signal) * b.eval(signal),
            Node::Div(a, b) => a.eval(signal) / b.eval(signal),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Signal,
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(_, c)) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, ch)) => word.push(ch),
                        None => return Err(ExprError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(word));
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        num.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = num
                    .parse()
                    .map_err(|_| ExprError::UnexpectedChar(c))?;
                tokens.push(Token::Num(value));
            }
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut ident = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if ident == "signal" {
                    tokens.push(Token::Signal);
                } else {
                    return Err(ExprError::UnknownIdent(ident));
                }
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }
    Ok(tokens)
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
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_expr(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_term()?;
        while let Some(tok) = self.peek() {
            match tok {
                Token::Plus => {
                    self.next();
                    node = Node::Add(Box::new(node), Box::new(self.parse_term()?));
                }
                Token::Minus => {
                    self.next();
                    node = Node::Sub(Box::new(node), Box::new(self.parse_term()?));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_factor()?;
        while let Some(tok) = self.peek() {
            match tok {
                Token::Star => {
                    self.next();
                    node = Node::Mul(Box::new(node), Box::new(self.parse_factor()?));
                }
                Token::Slash => {
                    self.next();
                    node = Node::Div(Box::new(node), Box::new(self.parse_factor()?));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> Result<Node, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Node::Num(n)),
            Some(Token::Signal) => Ok(Node::Signal),
            Some(Token::Minus) => Ok(Node::Neg(Box::new(self.parse_factor()?))),
            Some(Token::LParen) => {
                let node = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(node),
                    Some(_) => Err(ExprError::UnexpectedToken(self.pos - 1)),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(Token::Str(_)) => Err(ExprError::StringInArithmetic),
            Some(_) => Err(ExprError::UnexpectedToken(self.pos - 1)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, signal: f64) -> f64 {
        CompiledExpr::compile(src).unwrap().eval(signal).unwrap()
    }

    #[test]
    fn literals_and_variable() {
        assert_eq!(eval("255", 0.0), 255.0);
        assert_eq!(eval("signal", 42.5), 42.5);
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("2 + 3 * 4", 0.0), 14.0);
        assert_eq!(eval("(2 + 3) * 4", 0.0), 20.0);
        assert_eq!(eval("signal * 255 / 100", 50.0), 127.5);
        assert_eq!(eval("-signal + 100", 30.0), 70.0);
    }

    #[test]
    fn quoted_word_as_whole_expression() {
        let e = CompiledExpr::compile("\"incDec\"").unwrap();
        assert_eq!(e.as_word(), Some("incDec"));
        assert_eq!(e.eval(1.0), None);
    }

    #[test]
    fn word_inside_arithmetic_rejected() {
        assert_eq!(
            CompiledExpr::compile("\"inc\" + 1"),
            Err(ExprError::StringInArithmetic)
        );
        assert_eq!(
            CompiledExpr::compile("1 + \"inc\""),
            Err(ExprError::StringInArithmetic)
        );
    }

    #[test]
    fn rejects_unknown_identifiers_and_junk() {
        assert_eq!(
            CompiledExpr::compile("value * 2"),
            Err(ExprError::UnknownIdent("value".to_string()))
        );
        assert!(CompiledExpr::compile("1 & 2").is_err());
        assert!(CompiledExpr::compile("").is_err());
        assert!(CompiledExpr::compile("(1 + 2").is_err());
    }
}
