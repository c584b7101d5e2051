//! Arithmetic expression evaluator for derived columns, e.g.
//! `Revenue - Cost` or `Price * 1.18`. Column names are matched greedily
//! (longest first) so multi-word names tokenize without quoting.

use crate::dataset::{CellValue, Row};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Column(String),
    Number(f64),
    Op(char),
    LParen,
    RParen,
}

/// A parsed derived-column expression. Rows where any referenced column is
/// non-numeric evaluate to null rather than failing the whole operation.
#[derive(Debug, Clone)]
pub struct Expression {
    rpn: Vec<Token>,
    columns: Vec<String>,
}

fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 1,
        '*' | '/' => 2,
        _ => 0,
    }
}

fn tokenize(source: &str, columns: &[String]) -> Result<Vec<Token>> {
    // Longest column names first so "Unit Price Discounted" wins over
    // "Unit Price".
    let mut by_length: Vec<&String> = columns.iter().collect();
    by_length.sort_by_key(|c| std::cmp::Reverse(c.len()));

    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
                continue;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
                continue;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
                continue;
            }
            _ => {}
        }
        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| EngineError::Validation(format!("Invalid number '{}' in expression", text)))?;
            tokens.push(Token::Number(n));
            continue;
        }
        // Try to match a column name at this position, longest first.
        let rest: String = chars[i..].iter().collect();
        let rest_lower = rest.to_lowercase();
        let mut matched = None;
        for col in &by_length {
            let cl = col.to_lowercase();
            if rest_lower.starts_with(&cl) {
                matched = Some((*col).clone());
                break;
            }
        }
        match matched {
            Some(col) => {
                i += col.chars().count();
                tokens.push(Token::Column(col));
            }
            None => {
                let word: String = rest.split_whitespace().next().unwrap_or("?").to_string();
                return Err(EngineError::Validation(format!(
                    "Expression refers to '{}', which is not a column in this dataset",
                    word
                )));
            }
        }
    }
    Ok(tokens)
}

impl Expression {
    /// Parse and validate an expression against the available columns.
    pub fn parse(source: &str, columns: &[String]) -> Result<Expression> {
        let tokens = tokenize(source, columns)?;
        if tokens.is_empty() {
            return Err(EngineError::Validation(
                "Expression is empty".to_string(),
            ));
        }

        // Shunting-yard to RPN.
        let mut output = Vec::new();
        let mut ops: Vec<Token> = Vec::new();
        let mut referenced = Vec::new();
        let mut prev_was_operand = false;
        for token in tokens {
            match token {
                Token::Number(_) | Token::Column(_) => {
                    if prev_was_operand {
                        return Err(EngineError::Validation(
                            "Expression has two values in a row with no operator".to_string(),
                        ));
                    }
                    if let Token::Column(ref c) = token {
                        if !referenced.contains(c) {
                            referenced.push(c.clone());
                        }
                    }
                    output.push(token);
                    prev_was_operand = true;
                }
                Token::Op(op) => {
                    while matches!(ops.last(), Some(Token::Op(top)) if precedence(*top) >= precedence(op))
                    {
                        if let Some(t) = ops.pop() {
                            output.push(t);
                        }
                    }
                    ops.push(Token::Op(op));
                    prev_was_operand = false;
                }
                Token::LParen => {
                    ops.push(Token::LParen);
                    prev_was_operand = false;
                }
                Token::RParen => {
                    loop {
                        match ops.pop() {
                            Some(Token::LParen) => break,
                            Some(t) => output.push(t),
                            None => {
                                return Err(EngineError::Validation(
                                    "Unbalanced parentheses in expression".to_string(),
                                ))
                            }
                        }
                    }
                    prev_was_operand = true;
                }
            }
        }
        while let Some(t) = ops.pop() {
            if t == Token::LParen {
                return Err(EngineError::Validation(
                    "Unbalanced parentheses in expression".to_string(),
                ));
            }
            output.push(t);
        }
        if !prev_was_operand {
            return Err(EngineError::Validation(
                "Expression ends with an operator".to_string(),
            ));
        }

        Ok(Expression {
            rpn: output,
            columns: referenced,
        })
    }

    /// Columns the expression reads.
    pub fn referenced_columns(&self) -> &[String] {
        &self.columns
    }

    /// Evaluate against one row. Returns None when an operand is non-numeric
    /// or a division by zero occurs.
    pub fn evaluate(&self, row: &Row) -> Option<f64> {
        let mut stack: Vec<f64> = Vec::new();
        for token in &self.rpn {
            match token {
                Token::Number(n) => stack.push(*n),
                Token::Column(c) => {
                    let v = row.get(c).and_then(CellValue::as_number)?;
                    stack.push(v);
                }
                Token::Op(op) => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    let result = match op {
                        '+' => a + b,
                        '-' => a - b,
                        '*' => a * b,
                        '/' => {
                            if b == 0.0 {
                                return None;
                            }
                            a / b
                        }
                        _ => return None,
                    };
                    stack.push(result);
                }
                _ => return None,
            }
        }
        if stack.len() == 1 {
            stack.pop()
        } else {
            None
        }
    }
}
