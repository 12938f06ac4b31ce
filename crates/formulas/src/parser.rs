//! Formula parser module
//!
//! Text is split into tokens up front and then parsed by precedence climbing.
//! Two bounds keep every later tree walk within a worker's stack: how deep
//! the parser may recurse, and how tall the resulting tree may grow.

use crate::{BinaryOperator, FormulaError, FormulaExpr, UnaryOperator};
use gridcalc_primitives::{CellLocation, Value};

/// Deepest the parser may recurse through brackets, signs, exponents and
/// call arguments.
const MAX_NESTING_DEPTH: usize = 128;

/// Tallest expression tree a formula may compile to. Long operator chains
/// count too, since they build left-deep trees.
const MAX_TREE_HEIGHT: usize = 256;

/// A prefix sign binds tighter than `*` but looser than `^`, so `-2^2` is
/// `-(2^2)`.
const PREFIX_POWER: u8 = 9;

const NESTED_TOO_DEEPLY: &str = "Formula is nested too deeply";

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Int(i64),
    Float(f64),
    String(String),
    Identifier(String),
    CellRef(CellLocation),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Ampersand,
    Percent,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Colon,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    /// Character offset of the token's first character.
    pos: usize,
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Split `text` into tokens. The last token is always `Eof`.
fn tokenize(text: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut at = 0;

    while let Some(&ch) = chars.get(at) {
        if ch.is_whitespace() {
            at += 1;
            continue;
        }
        let (kind, len) = match (ch, chars.get(at + 1)) {
            ('<', Some('=')) => (TokenKind::LessEqual, 2),
            ('<', Some('>')) => (TokenKind::NotEqual, 2),
            ('>', Some('=')) => (TokenKind::GreaterEqual, 2),
            ('"', _) => scan_string(&chars, at)?,
            ('.' | '0'..='9', _) => scan_number(&chars, at)?,
            ('$' | 'A'..='Z' | 'a'..='z' | '_', _) => scan_word(&chars, at),
            _ => match punctuation(ch) {
                Some(kind) => (kind, 1),
                None => {
                    return Err(FormulaError::syntax(
                        at,
                        format!("Unexpected character '{ch}'"),
                    ))
                }
            },
        };
        tokens.push(Token { kind, pos: at });
        at += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}

fn punctuation(ch: char) -> Option<TokenKind> {
    let kind = match ch {
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        ',' => TokenKind::Comma,
        ';' => TokenKind::Semicolon,
        '+' => TokenKind::Plus,
        '-' => TokenKind::Minus,
        '*' => TokenKind::Star,
        '/' => TokenKind::Slash,
        '^' => TokenKind::Caret,
        '&' => TokenKind::Ampersand,
        '%' => TokenKind::Percent,
        ':' => TokenKind::Colon,
        '=' => TokenKind::Equal,
        '<' => TokenKind::Less,
        '>' => TokenKind::Greater,
        _ => return None,
    };
    Some(kind)
}

/// `"..."` with `""` as an escaped quote.
fn scan_string(chars: &[char], start: usize) -> Result<(TokenKind, usize), FormulaError> {
    let mut text = String::new();
    let mut at = start + 1;
    while let Some(&ch) = chars.get(at) {
        at += 1;
        if ch != '"' {
            text.push(ch);
        } else if chars.get(at) == Some(&'"') {
            text.push('"');
            at += 1;
        } else {
            return Ok((TokenKind::String(text), at - start));
        }
    }
    Err(FormulaError::syntax(start, "Unterminated string literal"))
}

/// Digits with an optional fraction and exponent. Whole numbers that fit
/// an `i64` stay integers.
fn scan_number(chars: &[char], start: usize) -> Result<(TokenKind, usize), FormulaError> {
    let mut end = start;
    let mut fraction = false;
    let mut exponent = false;
    while let Some(&ch) = chars.get(end) {
        match ch {
            '0'..='9' => {}
            '.' if !fraction && !exponent => fraction = true,
            'e' | 'E' if !exponent => {
                exponent = true;
                if matches!(chars.get(end + 1), Some('+' | '-')) {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }

    let text: String = chars[start..end].iter().collect();
    let integer = if fraction || exponent {
        None
    } else {
        text.parse::<i64>().ok()
    };
    let kind = match integer {
        Some(value) => TokenKind::Int(value),
        None => text.parse::<f64>().map(TokenKind::Float).map_err(|_| {
            FormulaError::syntax(start, format!("Invalid number literal '{text}'"))
        })?,
    };
    Ok((kind, end - start))
}

/// A cell label, or a name when it is not a valid label or is directly
/// followed by `(`.
fn scan_word(chars: &[char], start: usize) -> (TokenKind, usize) {
    let end = chars[start..]
        .iter()
        .position(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$')))
        .map_or(chars.len(), |len| start + len);
    let word: String = chars[start..end].iter().collect();

    // LOG10( is a call, not a reference to column LOG
    let kind = if chars.get(end) == Some(&'(') {
        TokenKind::Identifier(word)
    } else {
        match CellLocation::from_label(&word) {
            Ok(location) => TokenKind::CellRef(location),
            Err(_) => TokenKind::Identifier(word),
        }
    };
    (kind, end - start)
}

// ============================================================================
// Parser
// ============================================================================

/// An expression and the height of its tree.
struct Parsed {
    expr: FormulaExpr,
    height: usize,
}

impl Parsed {
    fn leaf(expr: FormulaExpr) -> Self {
        Self { expr, height: 1 }
    }
}

/// Binding powers `(left, right)` of an infix operator. Equal powers chain
/// to the left; `^` has a lower right power and chains to the right.
fn infix(kind: &TokenKind) -> Option<(BinaryOperator, u8, u8)> {
    let binding = match kind {
        TokenKind::Equal => (BinaryOperator::Equal, 1, 2),
        TokenKind::NotEqual => (BinaryOperator::NotEqual, 1, 2),
        TokenKind::Less => (BinaryOperator::LessThan, 1, 2),
        TokenKind::LessEqual => (BinaryOperator::LessThanOrEqual, 1, 2),
        TokenKind::Greater => (BinaryOperator::GreaterThan, 1, 2),
        TokenKind::GreaterEqual => (BinaryOperator::GreaterThanOrEqual, 1, 2),
        TokenKind::Ampersand => (BinaryOperator::Concat, 3, 4),
        TokenKind::Plus => (BinaryOperator::Add, 5, 6),
        TokenKind::Minus => (BinaryOperator::Subtract, 5, 6),
        TokenKind::Star => (BinaryOperator::Multiply, 7, 8),
        TokenKind::Slash => (BinaryOperator::Divide, 7, 8),
        TokenKind::Caret => (BinaryOperator::Power, 11, 10),
        _ => return None,
    };
    Some(binding)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    /// Parse operators binding at least as tightly as `min_power`.
    fn parse_expr(&mut self, min_power: u8) -> Result<Parsed, FormulaError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(FormulaError::syntax(self.peek().pos, NESTED_TOO_DEEPLY));
        }
        self.depth += 1;
        let parsed = self.climb(min_power);
        self.depth -= 1;
        parsed
    }

    fn climb(&mut self, min_power: u8) -> Result<Parsed, FormulaError> {
        let mut lhs = self.parse_operand()?;
        while let Some((op, left, right)) = infix(&self.peek().kind) {
            if left < min_power {
                break;
            }
            let pos = self.bump().pos;
            let rhs = self.parse_expr(right)?;
            let height = lhs.height.max(rhs.height);
            lhs = self.node(pos, FormulaExpr::binary(op, lhs.expr, rhs.expr), height)?;
        }
        Ok(lhs)
    }

    /// A node one level above children of height `child_height`.
    fn node(
        &self,
        pos: usize,
        expr: FormulaExpr,
        child_height: usize,
    ) -> Result<Parsed, FormulaError> {
        let height = child_height + 1;
        if height > MAX_TREE_HEIGHT {
            return Err(FormulaError::syntax(pos, NESTED_TOO_DEEPLY));
        }
        Ok(Parsed { expr, height })
    }

    /// Signs, literals, references, calls and brackets, then any `%`.
    fn parse_operand(&mut self) -> Result<Parsed, FormulaError> {
        let token = self.bump().clone();
        let mut operand = match token.kind {
            TokenKind::Plus => return self.parse_expr(PREFIX_POWER),
            TokenKind::Minus => {
                let inner = self.parse_expr(PREFIX_POWER)?;
                let negated = FormulaExpr::UnaryOp {
                    op: UnaryOperator::Negate,
                    expr: Box::new(inner.expr),
                };
                return self.node(token.pos, negated, inner.height);
            }
            TokenKind::Int(value) => Parsed::leaf(FormulaExpr::Literal(Value::Int(value))),
            TokenKind::Float(value) => Parsed::leaf(FormulaExpr::Literal(Value::Float(value))),
            TokenKind::String(value) => Parsed::leaf(FormulaExpr::Literal(Value::String(value))),
            TokenKind::CellRef(location) => Parsed::leaf(self.parse_reference(location)?),
            TokenKind::Identifier(name) => self.parse_name(name, token.pos)?,
            TokenKind::LParen => {
                let inner = self.parse_expr(0)?;
                self.close_paren()?;
                inner
            }
            TokenKind::Eof => {
                return Err(FormulaError::syntax(token.pos, "Unexpected end of input"))
            }
            _ => return Err(FormulaError::syntax(token.pos, "Unexpected token")),
        };

        while self.peek().kind == TokenKind::Percent {
            let pos = self.bump().pos;
            let percent = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                expr: Box::new(operand.expr),
            };
            operand = self.node(pos, percent, operand.height)?;
        }
        Ok(operand)
    }

    /// A call when followed by `(`, otherwise `TRUE` or `FALSE`.
    fn parse_name(&mut self, name: String, pos: usize) -> Result<Parsed, FormulaError> {
        if self.peek().kind == TokenKind::LParen {
            self.bump();
            let (args, height) = self.parse_arguments()?;
            let call = FormulaExpr::FunctionCall {
                name: name.to_ascii_uppercase(),
                args,
            };
            return self.node(pos, call, height);
        }

        match name.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(Parsed::leaf(FormulaExpr::Literal(Value::Bool(true)))),
            "FALSE" => Ok(Parsed::leaf(FormulaExpr::Literal(Value::Bool(false)))),
            _ => Err(FormulaError::syntax(
                pos,
                format!("Unexpected identifier '{name}'"),
            )),
        }
    }

    /// `A1`, or `A1:B2` when a colon follows.
    fn parse_reference(&mut self, start: CellLocation) -> Result<FormulaExpr, FormulaError> {
        if self.peek().kind != TokenKind::Colon {
            return Ok(FormulaExpr::CellRef(start));
        }
        self.bump();
        let token = self.bump();
        match token.kind {
            TokenKind::CellRef(end) => FormulaExpr::range(start, end),
            _ => Err(FormulaError::syntax(
                token.pos,
                "Expected cell reference after ':'",
            )),
        }
    }

    /// Arguments after an opening bracket, through the closing one. Also
    /// returns the tallest argument's height.
    fn parse_arguments(&mut self) -> Result<(Vec<FormulaExpr>, usize), FormulaError> {
        let mut args = Vec::new();
        let mut height = 0;
        if self.peek().kind == TokenKind::RParen {
            self.bump();
            return Ok((args, height));
        }
        loop {
            let arg = self.parse_expr(0)?;
            height = height.max(arg.height);
            args.push(arg.expr);

            let token = self.bump();
            match token.kind {
                TokenKind::Comma | TokenKind::Semicolon => {}
                TokenKind::RParen => return Ok((args, height)),
                _ => {
                    return Err(FormulaError::syntax(
                        token.pos,
                        "Expected ',' or ')' in argument list",
                    ))
                }
            }
        }
    }

    fn close_paren(&mut self) -> Result<(), FormulaError> {
        let token = self.bump();
        if token.kind == TokenKind::RParen {
            return Ok(());
        }
        Err(FormulaError::syntax(
            token.pos,
            format!("Expected ')', got {:?}", token.kind),
        ))
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.cursor]
    }

    /// Current token; the cursor stops at `Eof`.
    fn bump(&mut self) -> &Token {
        let token = &self.tokens[self.cursor];
        if token.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        token
    }
}

/// Parse an expression with no leading formula marker.
///
/// Positions in errors are character offsets into `text`.
pub fn parse_expression(text: &str) -> Result<FormulaExpr, FormulaError> {
    if text.trim().is_empty() {
        return Err(FormulaError::syntax(0, "Empty expression"));
    }

    let mut parser = Parser::new(tokenize(text)?);
    let parsed = parser.parse_expr(0)?;
    let next = parser.peek();
    if next.kind != TokenKind::Eof {
        return Err(FormulaError::syntax(next.pos, "Unexpected trailing input"));
    }
    Ok(parsed.expr)
}

/// Parse a formula string (with its leading `=`) into an AST
pub fn parse_formula(formula: &str) -> Result<FormulaExpr, FormulaError> {
    let body = formula.trim_start().strip_prefix('=').unwrap_or(formula);
    parse_expression(body)
}
