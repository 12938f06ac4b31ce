//! Usercode: the small per-sheet program run around the formula pass.
//!
//! One statement per line:
//!
//! ```text
//! # comment
//! load_constants()
//! evaluate_formulae()
//! print(A1 * 2)
//! B7 = SUM(A1:A5)
//! ```
//!
//! The whole program is parsed before any of it runs.

use crate::error::{CalcError, CalcResult};
use gridcalc_formulas::{parse_expression, FormulaError, FormulaExpr};
use gridcalc_primitives::CellLocation;

/// The program run when a sheet has no usercode of its own.
pub const DEFAULT_USERCODE: &str = "load_constants()\nevaluate_formulae()\n";

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    LoadConstants,
    EvaluateFormulae,
    Print(FormulaExpr),
    Assign {
        target: CellLocation,
        expr: FormulaExpr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based
    pub number: usize,
    pub statement: Statement,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub lines: Vec<Line>,
}

/// Parse a whole program. Errors carry the 1-based line and character.
pub fn parse_program(source: &str) -> CalcResult<Program> {
    let mut lines = Vec::new();
    for (idx, text) in source.lines().enumerate() {
        let number = idx + 1;
        if let Some(statement) = parse_line(text).map_err(|position| CalcError::Syntax {
            line: number,
            position,
        })? {
            lines.push(Line { number, statement });
        }
    }
    Ok(Program { lines })
}

/// `Err` holds the 1-based character position of the problem.
fn parse_line(text: &str) -> Result<Option<Statement>, usize> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let indent = text.chars().take_while(|c| c.is_whitespace()).count();

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    match compact.as_str() {
        "load_constants()" => return Ok(Some(Statement::LoadConstants)),
        "evaluate_formulae()" => return Ok(Some(Statement::EvaluateFormulae)),
        _ => {}
    }

    if let Some(inner) = trimmed
        .strip_prefix("print(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let offset = indent + "print(".len();
        let expr = parse_expression(inner).map_err(|err| error_position(&err, offset))?;
        return Ok(Some(Statement::Print(expr)));
    }

    if let Some((lhs, rhs)) = trimmed.split_once('=') {
        let target = CellLocation::from_label(lhs.trim()).map_err(|_| indent + 1)?;
        let offset = indent + lhs.chars().count() + 1;
        let expr = parse_expression(rhs).map_err(|err| error_position(&err, offset))?;
        return Ok(Some(Statement::Assign { target, expr }));
    }

    Err(indent + 1)
}

fn error_position(err: &FormulaError, offset: usize) -> usize {
    match err {
        FormulaError::Syntax { position, .. } => offset + position,
        FormulaError::RangeTooLarge { .. } => offset + 1,
    }
}
