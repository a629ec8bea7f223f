// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Number parsing and expression evaluation.
//!
//! Expressions are tokenized into a list first and then parsed by
//! recursive descent over three levels: `+ - OR XOR`, then `* / AND`,
//! then factors. Arithmetic is signed 32-bit with wrapping semantics;
//! callers truncate to 16 bits for addresses and 8 bits for immediates.

use crate::assembler::{AsmError, AsmErrorKind};
use crate::symbol_table::{CrossReference, SymbolTable};

/// Parse a numeric literal. Empty input is 0. A leading `-` followed by a
/// digit makes it signed decimal; otherwise the final character selects
/// the radix: `H` hex, `Q` octal, `B` binary, else decimal.
pub fn parse_number(input: &str) -> Result<i32, AsmError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(0);
    }
    let bytes = input.as_bytes();
    if bytes[0] == b'-' && bytes.len() > 1 && bytes[1].is_ascii_digit() {
        return input
            .parse::<i64>()
            .map(|value| value as i32)
            .map_err(|_| malformed(input));
    }
    let (digits, radix) = match bytes[bytes.len() - 1].to_ascii_lowercase() {
        b'h' => (&input[..input.len() - 1], 16),
        b'q' => (&input[..input.len() - 1], 8),
        b'b' => (&input[..input.len() - 1], 2),
        _ => (input, 10),
    };
    if digits.is_empty() {
        return Err(malformed(input));
    }
    i64::from_str_radix(digits, radix)
        .map(|value| value as i32)
        .map_err(|_| malformed(input))
}

fn malformed(input: &str) -> AsmError {
    AsmError::new(AsmErrorKind::Expression, "Invalid number format", Some(input))
}

/// Break an expression into tokens: identifiers (`alpha | $ | _` then
/// `alnum | $ | _`), numbers (leading digit, absorbing alphanumerics so
/// radix suffixes stay attached), quoted character constants, and
/// single-character operators.
fn tokenize(expr: &str) -> Vec<String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let mut token = String::new();
        if c.is_ascii_alphabetic() || c == '$' || c == '_' {
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '$' || chars[i] == '_')
            {
                token.push(chars[i]);
                i += 1;
            }
        } else if c.is_ascii_digit() {
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                token.push(chars[i]);
                i += 1;
            }
        } else if c == '\'' {
            token.push(chars[i]);
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                token.push(chars[i]);
                i += 1;
            }
            if i < chars.len() {
                token.push(chars[i]);
                i += 1;
            }
        } else {
            token.push(c);
            i += 1;
        }
        tokens.push(token);
    }
    tokens
}

/// Recursive-descent evaluator over a token list. Successful symbol
/// lookups record a cross-reference entry at the current line; unknown
/// symbols are 0 in pass 1 and fatal in pass 2.
pub struct ExprEvaluator<'a> {
    tokens: Vec<String>,
    pos: usize,
    symbols: &'a SymbolTable,
    xref: &'a mut CrossReference,
    pass: u8,
    address: u16,
    lineno: u32,
}

impl<'a> ExprEvaluator<'a> {
    pub fn new(
        text: &str,
        symbols: &'a SymbolTable,
        xref: &'a mut CrossReference,
        pass: u8,
        address: u16,
        lineno: u32,
    ) -> Self {
        Self::from_tokens(tokenize(text), symbols, xref, pass, address, lineno)
    }

    fn from_tokens(
        tokens: Vec<String>,
        symbols: &'a SymbolTable,
        xref: &'a mut CrossReference,
        pass: u8,
        address: u16,
        lineno: u32,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            symbols,
            xref,
            pass,
            address,
            lineno,
        }
    }

    pub fn evaluate(mut self) -> Result<i32, AsmError> {
        let value = self.expression()?;
        match self.tokens.get(self.pos) {
            Some(token) => Err(AsmError::new(
                AsmErrorKind::Expression,
                "Unexpected token in expression",
                Some(token),
            )),
            None => Ok(value),
        }
    }

    fn peek_lower(&self) -> Option<String> {
        self.tokens.get(self.pos).map(|t| t.to_ascii_lowercase())
    }

    fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<i32, AsmError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek_lower() {
            value = match op.as_str() {
                "+" => {
                    self.pos += 1;
                    value.wrapping_add(self.term()?)
                }
                "-" => {
                    self.pos += 1;
                    value.wrapping_sub(self.term()?)
                }
                "or" => {
                    self.pos += 1;
                    value | self.term()?
                }
                "xor" => {
                    self.pos += 1;
                    value ^ self.term()?
                }
                _ => break,
            };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i32, AsmError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek_lower() {
            value = match op.as_str() {
                "*" => {
                    self.pos += 1;
                    value.wrapping_mul(self.factor()?)
                }
                "/" => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    if rhs == 0 {
                        return Err(AsmError::new(AsmErrorKind::Expression, "Divide by zero", None));
                    }
                    value.wrapping_div(rhs)
                }
                "and" => {
                    self.pos += 1;
                    value & self.factor()?
                }
                _ => break,
            };
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i32, AsmError> {
        let Some(token) = self.next() else {
            return Err(AsmError::new(
                AsmErrorKind::Expression,
                "Missing operand in expression",
                None,
            ));
        };
        match token.as_str() {
            "(" => {
                let value = self.expression()?;
                match self.next() {
                    Some(close) if close == ")" => Ok(value),
                    _ => Err(AsmError::new(
                        AsmErrorKind::Expression,
                        "Mismatched parentheses in expression",
                        None,
                    )),
                }
            }
            "-" => Ok(self.factor()?.wrapping_neg()),
            "+" => self.factor(),
            _ => self.single_term(&token),
        }
    }

    fn single_term(&mut self, token: &str) -> Result<i32, AsmError> {
        if token.starts_with('\'') {
            return char_constant(token);
        }
        let lower = token.to_ascii_lowercase();
        if lower == "$" {
            return Ok(self.address as i32);
        }
        if lower == "low" || lower == "high" {
            let Some(name) = self.next() else {
                return Err(AsmError::new(
                    AsmErrorKind::Expression,
                    "Missing label after LOW/HIGH",
                    None,
                ));
            };
            let name = name.to_ascii_lowercase();
            return match self.symbols.get(&name) {
                Some(value) if lower == "low" => Ok((value & 0xff) as i32),
                Some(value) => Ok(((value >> 8) & 0xff) as i32),
                None if self.pass == 1 => Ok(0),
                None => Err(AsmError::new(
                    AsmErrorKind::Symbol,
                    "Undefined label in LOW/HIGH operator",
                    Some(&name),
                )),
            };
        }
        if token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return parse_number(token);
        }
        match self.symbols.get(&lower) {
            Some(value) => {
                self.xref.record_reference(&lower, self.lineno);
                Ok(value as i32)
            }
            None if self.pass == 1 => Ok(0),
            None => Err(AsmError::new(
                AsmErrorKind::Symbol,
                "Undefined label in expression",
                Some(&lower),
            )),
        }
    }
}

fn char_constant(token: &str) -> Result<i32, AsmError> {
    let bytes = token.as_bytes();
    if bytes.len() == 3 && bytes[2] == b'\'' {
        Ok(bytes[1] as i32)
    } else {
        Err(AsmError::new(
            AsmErrorKind::Expression,
            "Invalid character constant",
            Some(token),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// Evaluate an `IF` operand. The token list is scanned for the first
/// standalone relational token — word forms `eq ne ge le gt lt` or the
/// symbolic `= != >= <= > <` — and split there; with no relational token
/// the whole expression is compared against zero. Matching whole tokens
/// keeps labels that merely contain `eq` or `lt` from misfiring.
pub fn evaluate_conditional(
    operand: &str,
    symbols: &SymbolTable,
    xref: &mut CrossReference,
    pass: u8,
    address: u16,
    lineno: u32,
) -> Result<bool, AsmError> {
    let tokens = tokenize(operand);
    let mut split = None;
    for (i, raw) in tokens.iter().enumerate() {
        let token = raw.to_ascii_lowercase();
        let next_is_equals = tokens.get(i + 1).map(String::as_str) == Some("=");
        let found = match token.as_str() {
            "eq" | "=" => Some((Relation::Eq, 1)),
            "ne" => Some((Relation::Ne, 1)),
            "ge" => Some((Relation::Ge, 1)),
            "le" => Some((Relation::Le, 1)),
            "gt" => Some((Relation::Gt, 1)),
            "lt" => Some((Relation::Lt, 1)),
            "!" if next_is_equals => Some((Relation::Ne, 2)),
            ">" if next_is_equals => Some((Relation::Ge, 2)),
            ">" => Some((Relation::Gt, 1)),
            "<" if next_is_equals => Some((Relation::Le, 2)),
            "<" => Some((Relation::Lt, 1)),
            _ => None,
        };
        if let Some((relation, width)) = found {
            split = Some((i, relation, width));
            break;
        }
    }

    match split {
        Some((idx, relation, width)) => {
            let lhs_tokens = tokens[..idx].to_vec();
            let rhs_tokens = tokens[idx + width..].to_vec();
            let lhs = ExprEvaluator::from_tokens(lhs_tokens, symbols, &mut *xref, pass, address, lineno)
                .evaluate()?;
            let rhs = ExprEvaluator::from_tokens(rhs_tokens, symbols, &mut *xref, pass, address, lineno)
                .evaluate()?;
            Ok(match relation {
                Relation::Eq => lhs == rhs,
                Relation::Ne => lhs != rhs,
                Relation::Ge => lhs >= rhs,
                Relation::Le => lhs <= rhs,
                Relation::Gt => lhs > rhs,
                Relation::Lt => lhs < rhs,
            })
        }
        None => {
            let value =
                ExprEvaluator::from_tokens(tokens, symbols, &mut *xref, pass, address, lineno)
                    .evaluate()?;
            Ok(value != 0)
        }
    }
}
