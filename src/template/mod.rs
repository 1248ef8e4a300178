//! Numeric templates such as `{{ states('input_number.heater_power') | float * 2 }}`.
//!
//! Supported inside `{{ ... }}`: numeric literals, `states('id')`,
//! `state_attr('id', 'attr')`, parentheses, `+ - * /`, and the `float`/`int`
//! filters with an optional default.

use crate::state::{value_to_string, StateReader};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("entity '{0}' has no state")]
    MissingEntity(String),
    #[error("value '{0}' is not numeric")]
    NotNumeric(String),
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    pub fn new(source: &str) -> Self {
        Self(source.to_string())
    }

    pub fn source(&self) -> &str {
        &self.0
    }

    /// True when the string contains a `{{ }}` block
    pub fn is_template(source: &str) -> bool {
        source.contains("{{") && source.contains("}}")
    }

    /// Entity ids read by `states()` / `state_attr()` calls
    pub fn referenced_entities(&self) -> Vec<String> {
        static REFS: OnceLock<Regex> = OnceLock::new();
        let re = REFS.get_or_init(|| {
            Regex::new(r#"(?:states|state_attr)\(\s*['"]([a-z0-9_]+\.[a-z0-9_]+)['"]"#)
                .expect("static regex")
        });
        let mut ids: Vec<String> = re
            .captures_iter(&self.0)
            .map(|c| c[1].to_string())
            .collect();
        ids.dedup();
        ids
    }

    /// Render every block and parse the result as a number
    pub fn render_f64(&self, states: &dyn StateReader) -> Result<f64, TemplateError> {
        let rendered = self.render(states)?;
        rendered
            .trim()
            .parse::<f64>()
            .map_err(|_| TemplateError::NotNumeric(rendered.trim().to_string()))
    }

    /// Render every block, keeping surrounding text
    pub fn render(&self, states: &dyn StateReader) -> Result<String, TemplateError> {
        let mut output = String::new();
        let mut rest = self.0.as_str();

        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| TemplateError::Syntax("unterminated '{{'".to_string()))?;
            let value = evaluate(&after[..end], states)?;
            output.push_str(&value.to_text());
            rest = &after[end + 2..];
        }
        output.push_str(rest);

        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
    Pipe,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, TemplateError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(TemplateError::Syntax("unterminated string".to_string()));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| TemplateError::Syntax(format!("bad number '{}'", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(TemplateError::Syntax(format!("unexpected '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Val {
    Num(f64),
    Text(String),
}

impl Val {
    fn to_number(&self) -> Result<f64, TemplateError> {
        match self {
            Val::Num(n) => Ok(*n),
            Val::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| TemplateError::NotNumeric(s.clone())),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Val::Num(n) => n.to_string(),
            Val::Text(s) => s.clone(),
        }
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    states: &'a dyn StateReader,
}

fn evaluate(expr: &str, states: &dyn StateReader) -> Result<Val, TemplateError> {
    let mut parser = Parser {
        tokens: tokenize(expr)?,
        pos: 0,
        states,
    };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(TemplateError::Syntax(format!(
            "unexpected trailing input in '{}'",
            expr.trim()
        )));
    }
    Ok(value)
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), TemplateError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(TemplateError::Syntax(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn expression(&mut self) -> Result<Val, TemplateError> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            let (a, b) = (left.to_number()?, right.to_number()?);
            left = Val::Num(if op == '+' { a + b } else { a - b });
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Val, TemplateError> {
        let mut left = self.filtered()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.filtered()?;
            let (a, b) = (left.to_number()?, right.to_number()?);
            left = if op == '*' {
                Val::Num(a * b)
            } else if b == 0.0 {
                return Err(TemplateError::DivisionByZero);
            } else {
                Val::Num(a / b)
            };
        }
        Ok(left)
    }

    fn filtered(&mut self) -> Result<Val, TemplateError> {
        let mut value = self.primary()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                other => {
                    return Err(TemplateError::Syntax(format!(
                        "expected filter name, found {:?}",
                        other
                    )))
                }
            };
            let default = if self.peek() == Some(&Token::LParen) {
                self.pos += 1;
                let default = self.expression()?.to_number()?;
                self.expect(Token::RParen)?;
                Some(default)
            } else {
                None
            };
            let number = match (value.to_number(), default) {
                (Ok(n), _) => n,
                (Err(_), Some(d)) => d,
                (Err(e), None) => return Err(e),
            };
            value = match name.as_str() {
                "float" => Val::Num(number),
                "int" => Val::Num(number.trunc()),
                other => {
                    return Err(TemplateError::Syntax(format!("unknown filter '{}'", other)))
                }
            };
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<Val, TemplateError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Val::Num(n)),
            Some(Token::Str(s)) => Ok(Val::Text(s)),
            Some(Token::Op('-')) => Ok(Val::Num(-self.primary()?.to_number()?)),
            Some(Token::LParen) => {
                let value = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => self.call(&name),
            other => Err(TemplateError::Syntax(format!("unexpected {:?}", other))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Val, TemplateError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                match self.next() {
                    Some(Token::Str(s)) => args.push(s),
                    other => {
                        return Err(TemplateError::Syntax(format!(
                            "expected string argument, found {:?}",
                            other
                        )))
                    }
                }
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        match (name, args.as_slice()) {
            ("states", [entity_id]) => self
                .states
                .get_state(entity_id)
                .map(|s| Val::Text(s.state))
                .ok_or_else(|| TemplateError::MissingEntity(entity_id.clone())),
            ("state_attr", [entity_id, attribute]) => {
                let state = self
                    .states
                    .get_state(entity_id)
                    .ok_or_else(|| TemplateError::MissingEntity(entity_id.clone()))?;
                Ok(Val::Text(
                    state
                        .attribute(attribute)
                        .map(value_to_string)
                        .unwrap_or_else(|| "None".to_string()),
                ))
            }
            _ => Err(TemplateError::Syntax(format!(
                "unknown function {}({} args)",
                name,
                args.len()
            ))),
        }
    }
}
