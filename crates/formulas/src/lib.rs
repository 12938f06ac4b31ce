//! # Gridcalc Formulas
//!
//! Formula compilation and evaluation for cell formulas.
//!
//! A formula is cell text starting with `=`. [`compile`] turns it into a
//! [`CompiledFormula`]: an expression tree plus the exact set of cells it
//! reads. Compilation never fails outright; text that does not parse compiles
//! to an expression that raises `FormulaError` when evaluated, so the problem
//! surfaces as an error on that one cell.

use gridcalc_primitives::{CellLocation, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

pub mod functions;
pub mod parser;

pub use parser::{parse_expression, parse_formula};

/// Largest range (in cells) a formula may reference.
pub const MAX_RANGE_CELLS: u64 = 100_000;

/// Values of a remote worksheet, as returned by a cross-sheet fetch.
pub type RemoteValues = BTreeMap<CellLocation, Value>;

/// Compiled formula ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    /// Formula text as written
    pub source: String,
    pub expr: FormulaExpr,
    /// Every cell the formula reads, ranges expanded
    pub dependencies: BTreeSet<CellLocation>,
}

impl CompiledFormula {
    /// Canonical text of the compiled expression.
    pub fn canonical_source(&self) -> String {
        self.expr.to_string()
    }
}

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    Literal(Value),
    CellRef(CellLocation),
    /// Range reference, corners normalized
    RangeRef {
        start: CellLocation,
        end: CellLocation,
    },
    FunctionCall {
        name: String,
        args: Vec<FormulaExpr>,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<FormulaExpr>,
    },
    /// Text that failed to compile. Evaluates to a `FormulaError`.
    Invalid(String),
}

impl FormulaExpr {
    fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> Self {
        FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn range(a: CellLocation, b: CellLocation) -> Result<Self, FormulaError> {
        let (start, end) = gridcalc_primitives::address::normalize_corners(a, b);
        let cells = u64::from(end.col - start.col + 1) * u64::from(end.row - start.row + 1);
        if cells > MAX_RANGE_CELLS {
            return Err(FormulaError::RangeTooLarge {
                range: format!("{start}:{end}"),
                cells,
            });
        }
        Ok(FormulaExpr::RangeRef { start, end })
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Concat,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Power => "^",
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::Concat => "&",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Percent,
}

impl fmt::Display for FormulaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaExpr::Literal(Value::String(s)) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            FormulaExpr::Literal(Value::Bool(b)) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            FormulaExpr::Literal(value) => write!(f, "{value}"),
            FormulaExpr::CellRef(location) => write!(f, "{location}"),
            FormulaExpr::RangeRef { start, end } => write!(f, "{start}:{end}"),
            FormulaExpr::FunctionCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            FormulaExpr::BinaryOp { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                expr,
            } => write!(f, "-{expr}"),
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                expr,
            } => write!(f, "{expr}%"),
            FormulaExpr::Invalid(message) => {
                write!(f, "RAISE(\"{}\")", message.replace('"', "\"\""))
            }
        }
    }
}

/// Compile-time errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// `position` is a 1-based character offset into the parsed text.
    #[error("{message} at character {position}")]
    Syntax { position: usize, message: String },
    #[error("range {range} spans {cells} cells, more than {max}", max = MAX_RANGE_CELLS)]
    RangeTooLarge { range: String, cells: u64 },
}

impl FormulaError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            position: offset + 1,
            message: message.into(),
        }
    }
}

/// Errors raised while evaluating a formula.
///
/// [`EvalError::kind`] names the error class; a cell's stored error text is
/// [`EvalError::describe`], e.g. `ZeroDivisionError: division by zero`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("division by zero")]
    ZeroDivision,
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Value(String),
    #[error("name '{0}' is not defined")]
    Name(String),
    #[error("{0}")]
    Formula(String),
    #[error("{0}")]
    RunWorksheet(String),
    #[error("{0}")]
    Cycle(String),
}

impl EvalError {
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::ZeroDivision => "ZeroDivisionError",
            EvalError::Type(_) => "TypeError",
            EvalError::Value(_) => "ValueError",
            EvalError::Name(_) => "NameError",
            EvalError::Formula(_) => "FormulaError",
            EvalError::RunWorksheet(_) => "RunWorksheetError",
            EvalError::Cycle(_) => "CycleError",
        }
    }

    /// `"<Kind>: <message>"`
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        EvalError::Type(message.into())
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        EvalError::Value(message.into())
    }
}

/// Does this cell text hold a formula (as opposed to a constant)?
pub fn is_formula(text: &str) -> bool {
    text.starts_with('=')
}

/// Compile formula text. Parse failures compile to [`FormulaExpr::Invalid`].
pub fn compile(formula: &str) -> CompiledFormula {
    match try_compile(formula) {
        Ok(compiled) => compiled,
        Err(err) => CompiledFormula {
            source: formula.to_string(),
            expr: FormulaExpr::Invalid(err.to_string()),
            dependencies: BTreeSet::new(),
        },
    }
}

/// Compile formula text, reporting parse failures.
pub fn try_compile(formula: &str) -> Result<CompiledFormula, FormulaError> {
    let expr = parser::parse_formula(formula)?;
    let mut dependencies = BTreeSet::new();
    collect_dependencies(&expr, &mut dependencies);
    Ok(CompiledFormula {
        source: formula.to_string(),
        expr,
        dependencies,
    })
}

/// Every cell an expression reads.
pub fn collect_dependencies(expr: &FormulaExpr, deps: &mut BTreeSet<CellLocation>) {
    match expr {
        FormulaExpr::Literal(_) | FormulaExpr::Invalid(_) => {}
        FormulaExpr::CellRef(location) => {
            deps.insert(*location);
        }
        FormulaExpr::RangeRef { start, end } => {
            for col in start.col..=end.col {
                for row in start.row..=end.row {
                    deps.insert(CellLocation::new(col, row));
                }
            }
        }
        FormulaExpr::FunctionCall { args, .. } => {
            for arg in args {
                collect_dependencies(arg, deps);
            }
        }
        FormulaExpr::BinaryOp { left, right, .. } => {
            collect_dependencies(left, deps);
            collect_dependencies(right, deps);
        }
        FormulaExpr::UnaryOp { expr, .. } => collect_dependencies(expr, deps),
    }
}

/// Read access to the worksheet under evaluation, plus the cross-sheet fetch.
pub trait ValueResolver {
    /// Current value of a cell; `Value::Undefined` for empty cells.
    fn get_cell(&self, location: CellLocation) -> Value;

    /// Values of a range in row-major order.
    fn get_range(&self, start: CellLocation, end: CellLocation) -> Vec<Value> {
        let mut values = Vec::new();
        for row in start.row..=end.row {
            for col in start.col..=end.col {
                values.push(self.get_cell(CellLocation::new(col, row)));
            }
        }
        values
    }

    /// Recalculate the worksheet published at `url` with `overrides` applied.
    fn run_worksheet(
        &self,
        url: &str,
        _overrides: &[(CellLocation, Value)],
    ) -> Result<RemoteValues, EvalError> {
        Err(EvalError::RunWorksheet(format!(
            "run_worksheet: no remote access configured for {url}"
        )))
    }
}

/// Map-backed resolver.
#[derive(Debug, Default, Clone)]
pub struct EvalContext {
    cells: HashMap<CellLocation, Value>,
}

impl EvalContext {
    pub fn with_cells(cells: HashMap<CellLocation, Value>) -> Self {
        Self { cells }
    }

    pub fn set(&mut self, location: CellLocation, value: Value) {
        self.cells.insert(location, value);
    }
}

impl ValueResolver for EvalContext {
    fn get_cell(&self, location: CellLocation) -> Value {
        self.cells.get(&location).cloned().unwrap_or_default()
    }
}

/// Registry of available functions
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register_standard_functions();
        registry
    }
}

impl FunctionRegistry {
    fn register_standard_functions(&mut self) {
        // Aggregates
        self.register("SUM", FunctionDefinition::variadic(1, functions::sum));
        self.register("MIN", FunctionDefinition::variadic(1, functions::min));
        self.register("MAX", FunctionDefinition::variadic(1, functions::max));
        self.register("AVERAGE", FunctionDefinition::variadic(1, functions::average));
        self.register("COUNT", FunctionDefinition::variadic(1, functions::count));

        // Math
        self.register("ABS", FunctionDefinition::fixed(1, functions::abs));
        self.register("ROUND", FunctionDefinition::range(1, 2, functions::round));

        // Logical
        self.register("AND", FunctionDefinition::variadic(1, functions::and));
        self.register("OR", FunctionDefinition::variadic(1, functions::or));
        self.register("NOT", FunctionDefinition::fixed(1, functions::not));

        // Text
        self.register("LEN", FunctionDefinition::fixed(1, functions::len));
        self.register("CONCAT", FunctionDefinition::variadic(1, functions::concat));
        self.register("UPPER", FunctionDefinition::fixed(1, functions::upper));
        self.register("LOWER", FunctionDefinition::fixed(1, functions::lower));

        // Sheet bindings
        self.register("DATETIME", FunctionDefinition::range(3, 6, functions::datetime));
        self.register("RAISE", FunctionDefinition::fixed(1, functions::raise));
        self.register("UNDEFINED", FunctionDefinition::fixed(0, functions::undefined));
        self.register("ISUNDEFINED", FunctionDefinition::fixed(1, functions::isundefined));
    }

    fn register(&mut self, name: &str, def: FunctionDefinition) {
        self.functions.insert(name.to_uppercase(), def);
    }

    /// Check if a function exists
    pub fn has_function(&self, name: &str) -> bool {
        let name = name.to_uppercase();
        self.functions.contains_key(&name) || SPECIAL_FORMS.contains(&name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(&name.to_uppercase())
    }
}

/// Functions the engine evaluates itself: `IF` is lazy and
/// `RUN_WORKSHEET` needs the resolver.
const SPECIAL_FORMS: [&str; 2] = ["IF", "RUN_WORKSHEET"];

pub type FunctionImpl = fn(&[Value]) -> Result<Value, EvalError>;

pub struct FunctionDefinition {
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub eval: FunctionImpl,
}

impl FunctionDefinition {
    /// Fixed number of arguments
    pub fn fixed(args: usize, eval: FunctionImpl) -> Self {
        Self {
            min_args: args,
            max_args: Some(args),
            eval,
        }
    }

    /// At least `min` arguments
    pub fn variadic(min: usize, eval: FunctionImpl) -> Self {
        Self {
            min_args: min,
            max_args: None,
            eval,
        }
    }

    /// Between `min` and `max` arguments
    pub fn range(min: usize, max: usize, eval: FunctionImpl) -> Self {
        Self {
            min_args: min,
            max_args: Some(max),
            eval,
        }
    }

    fn validate_arg_count(&self, name: &str, provided: usize) -> Result<(), EvalError> {
        validate_arg_count(name, self.min_args, self.max_args, provided)
    }
}

fn validate_arg_count(
    name: &str,
    min: usize,
    max: Option<usize>,
    provided: usize,
) -> Result<(), EvalError> {
    let ok = provided >= min && max.map_or(true, |max| provided <= max);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(max) if max == min => format!("exactly {min}"),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    };
    Err(EvalError::type_error(format!(
        "{name}() takes {expected} argument(s) ({provided} given)"
    )))
}

/// Formula evaluation engine
#[derive(Default)]
pub struct FormulaEngine {
    functions: FunctionRegistry,
}

impl FormulaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access registered functions
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Evaluate a compiled formula against a resolver
    pub fn evaluate<R: ValueResolver + ?Sized>(
        &self,
        compiled: &CompiledFormula,
        resolver: &R,
    ) -> Result<Value, EvalError> {
        self.eval_expr(&compiled.expr, resolver)
    }

    /// Evaluate a bare expression
    pub fn eval_expr<R: ValueResolver + ?Sized>(
        &self,
        expr: &FormulaExpr,
        resolver: &R,
    ) -> Result<Value, EvalError> {
        match expr {
            FormulaExpr::Literal(value) => Ok(value.clone()),
            FormulaExpr::CellRef(location) => Ok(resolver.get_cell(*location)),
            FormulaExpr::RangeRef { start, end } => {
                Ok(Value::Array(resolver.get_range(*start, *end)))
            }
            FormulaExpr::Invalid(message) => Err(EvalError::Formula(message.clone())),
            FormulaExpr::UnaryOp { op, expr } => {
                let value = self.eval_expr(expr, resolver)?;
                eval_unary(*op, &value)
            }
            FormulaExpr::BinaryOp { op, left, right } => {
                let left = self.eval_expr(left, resolver)?;
                let right = self.eval_expr(right, resolver)?;
                eval_binary(*op, &left, &right)
            }
            FormulaExpr::FunctionCall { name, args } => match name.as_str() {
                "IF" => self.eval_if(args, resolver),
                "RUN_WORKSHEET" => self.eval_run_worksheet(args, resolver),
                _ => {
                    let def = self
                        .functions
                        .get(name)
                        .ok_or_else(|| EvalError::Name(name.clone()))?;
                    def.validate_arg_count(name, args.len())?;

                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval_expr(arg, resolver)?);
                    }
                    (def.eval)(&values)
                }
            },
        }
    }

    fn eval_if<R: ValueResolver + ?Sized>(
        &self,
        args: &[FormulaExpr],
        resolver: &R,
    ) -> Result<Value, EvalError> {
        validate_arg_count("IF", 2, Some(3), args.len())?;
        let condition = self.eval_expr(&args[0], resolver)?;
        if condition.is_undefined() {
            return Err(EvalError::type_error("IF() condition is undefined"));
        }
        if condition.is_truthy() {
            self.eval_expr(&args[1], resolver)
        } else if let Some(otherwise) = args.get(2) {
            self.eval_expr(otherwise, resolver)
        } else {
            Ok(Value::Bool(false))
        }
    }

    /// `RUN_WORKSHEET(url, "B2", ["A1", value]...)`
    fn eval_run_worksheet<R: ValueResolver + ?Sized>(
        &self,
        args: &[FormulaExpr],
        resolver: &R,
    ) -> Result<Value, EvalError> {
        validate_arg_count("RUN_WORKSHEET", 2, None, args.len())?;
        if args.len() % 2 != 0 {
            return Err(EvalError::type_error(
                "RUN_WORKSHEET() overrides must be label/value pairs",
            ));
        }

        let url = self.eval_expr(&args[0], resolver)?;
        let url = url
            .as_str()
            .ok_or_else(|| EvalError::type_error("RUN_WORKSHEET() url must be a string"))?
            .to_string();
        let target = label_argument(&self.eval_expr(&args[1], resolver)?)?;

        let mut overrides = Vec::with_capacity((args.len() - 2) / 2);
        for pair in args[2..].chunks(2) {
            let location = label_argument(&self.eval_expr(&pair[0], resolver)?)?;
            let value = self.eval_expr(&pair[1], resolver)?;
            overrides.push((location, value));
        }

        let remote = resolver.run_worksheet(&url, &overrides)?;
        Ok(remote.get(&target).cloned().unwrap_or_default())
    }
}

fn label_argument(value: &Value) -> Result<CellLocation, EvalError> {
    let label = value
        .as_str()
        .ok_or_else(|| EvalError::type_error("cell label must be a string"))?;
    CellLocation::from_label(label)
        .map_err(|_| EvalError::value_error(format!("invalid cell label '{label}'")))
}

fn eval_unary(op: UnaryOperator, value: &Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOperator::Negate, Value::Int(n)) => Ok(n
            .checked_neg()
            .map_or(Value::Float(-(*n as f64)), Value::Int)),
        (UnaryOperator::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Percent, Value::Int(n)) => Ok(Value::Float(*n as f64 / 100.0)),
        (UnaryOperator::Percent, Value::Float(f)) => Ok(Value::Float(f / 100.0)),
        (UnaryOperator::Negate, other) => Err(EvalError::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
        (UnaryOperator::Percent, other) => Err(EvalError::type_error(format!(
            "bad operand type for %: '{}'",
            other.type_name()
        ))),
    }
}

fn eval_binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOperator::Add => arithmetic(op, left, right, i64::checked_add, |l, r| l + r),
        BinaryOperator::Subtract => arithmetic(op, left, right, i64::checked_sub, |l, r| l - r),
        BinaryOperator::Multiply => arithmetic(op, left, right, i64::checked_mul, |l, r| l * r),
        BinaryOperator::Divide => {
            let (l, r) = numeric_operands(op, left, right)?;
            if r == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            Ok(Value::Float(l / r))
        }
        BinaryOperator::Power => power(left, right),
        BinaryOperator::Concat => {
            if left.is_undefined() || right.is_undefined() {
                return Err(unsupported(op, left, right));
            }
            Ok(Value::String(format!(
                "{}{}",
                left.formatted(),
                right.formatted()
            )))
        }
        BinaryOperator::Equal => Ok(Value::Bool(left == right)),
        BinaryOperator::NotEqual => Ok(Value::Bool(left != right)),
        BinaryOperator::LessThan => compare(op, left, right).map(|o| Value::Bool(o.is_lt())),
        BinaryOperator::LessThanOrEqual => {
            compare(op, left, right).map(|o| Value::Bool(o.is_le()))
        }
        BinaryOperator::GreaterThan => compare(op, left, right).map(|o| Value::Bool(o.is_gt())),
        BinaryOperator::GreaterThanOrEqual => {
            compare(op, left, right).map(|o| Value::Bool(o.is_ge()))
        }
    }
}

fn unsupported(op: BinaryOperator, left: &Value, right: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn numeric_operands(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), EvalError> {
    match (left.as_float(), right.as_float()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(unsupported(op, left, right)),
    }
}

fn arithmetic(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    if let (Value::Int(l), Value::Int(r)) = (left, right) {
        if let Some(result) = int_op(*l, *r) {
            return Ok(Value::Int(result));
        }
    }
    let (l, r) = numeric_operands(op, left, right)?;
    Ok(Value::Float(float_op(l, r)))
}

fn power(left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Value::Int(base), Value::Int(exp)) = (left, right) {
        if let Ok(exp) = u32::try_from(*exp) {
            if let Some(result) = base.checked_pow(exp) {
                return Ok(Value::Int(result));
            }
        }
    }
    let (base, exp) = numeric_operands(BinaryOperator::Power, left, right)?;
    if base == 0.0 && exp < 0.0 {
        return Err(EvalError::ZeroDivision);
    }
    Ok(Value::Float(base.powf(exp)))
}

fn compare(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
) -> Result<std::cmp::Ordering, EvalError> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        (Value::DateTime(l), Value::DateTime(r)) => Ok(l.cmp(r)),
        _ => {
            let (l, r) = numeric_operands(op, left, right)?;
            l.partial_cmp(&r)
                .ok_or_else(|| EvalError::value_error("cannot order NaN"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(formula: &str, ctx: &EvalContext) -> Result<Value, EvalError> {
        FormulaEngine::new().evaluate(&compile(formula), ctx)
    }

    #[test]
    fn test_function_registry() {
        let engine = FormulaEngine::new();
        assert!(engine.functions().has_function("sum"));
        assert!(engine.functions().has_function("IF"));
        assert!(!engine.functions().has_function("VLOOKUP"));
    }

    #[test]
    fn test_dispatch_unknown_function() {
        let err = eval("=VLOOKUP(1)", &EvalContext::default()).unwrap_err();
        assert_eq!(err.describe(), "NameError: name 'VLOOKUP' is not defined");
    }

    #[test]
    fn test_dispatch_arg_count_error() {
        let err = eval("=ABS(1, 2)", &EvalContext::default()).unwrap_err();
        assert_eq!(err.kind(), "TypeError");
    }

    #[test]
    fn test_evaluate_arithmetic_and_percent() {
        let ctx = EvalContext::default();
        assert_eq!(eval("=1+2*3", &ctx).unwrap(), Value::Int(7));
        assert_eq!(eval("=2^10", &ctx).unwrap(), Value::Int(1024));
        assert_eq!(eval("=50%", &ctx).unwrap(), Value::Float(0.5));
        assert_eq!(eval("=7/2", &ctx).unwrap(), Value::Float(3.5));
        assert_eq!(eval("=-(3)", &ctx).unwrap(), Value::Int(-3));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let ctx = EvalContext::default();
        let value = eval("=9223372036854775807+1", &ctx).unwrap();
        assert!(matches!(value, Value::Float(_)));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("=1/0", &EvalContext::default()).unwrap_err();
        assert_eq!(err.describe(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_undefined_operand_is_type_error() {
        let err = eval("=A1+1", &EvalContext::default()).unwrap_err();
        assert_eq!(
            err.describe(),
            "TypeError: unsupported operand type(s) for +: 'Undefined' and 'Int'"
        );
    }

    #[test]
    fn test_evaluate_concat_and_compare() {
        let mut ctx = EvalContext::default();
        ctx.set(CellLocation::new(1, 1), Value::from("a"));
        assert_eq!(
            eval("=A1&\"b\"&1", &ctx).unwrap(),
            Value::String("ab1".to_string())
        );
        assert_eq!(eval("=2>1", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("=\"a\"<\"b\"", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("=1=1.0", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval("=1<>2", &ctx).unwrap(), Value::Bool(true));
        assert!(eval("=\"a\"<1", &ctx).is_err());
    }

    #[test]
    fn test_if_is_lazy() {
        let ctx = EvalContext::default();
        assert_eq!(eval("=IF(TRUE, 1, 1/0)", &ctx).unwrap(), Value::Int(1));
        assert_eq!(eval("=IF(0, 1)", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_invalid_formula_raises_formula_error() {
        let compiled = compile("=SUM(");
        assert!(matches!(compiled.expr, FormulaExpr::Invalid(_)));
        assert!(compiled.dependencies.is_empty());
        let err = FormulaEngine::new()
            .evaluate(&compiled, &EvalContext::default())
            .unwrap_err();
        assert_eq!(err.kind(), "FormulaError");
    }

    #[test]
    fn test_dependencies_expand_ranges() {
        let compiled = compile("=SUM(A1:B2) + C3");
        let labels: Vec<String> = compiled.dependencies.iter().map(CellLocation::label).collect();
        assert_eq!(labels, vec!["A1", "A2", "B1", "B2", "C3"]);
    }

    #[test]
    fn test_oversized_range_is_rejected() {
        assert!(matches!(
            try_compile("=SUM(A1:Z100000)"),
            Err(FormulaError::RangeTooLarge { .. })
        ));
    }

    #[test]
    fn test_canonical_source() {
        let compiled = compile("=a1 + 2 * sum(b1:b2)");
        assert_eq!(compiled.canonical_source(), "(A1 + (2 * SUM(B1:B2)))");
    }

    #[test]
    fn test_run_worksheet_without_remote_access() {
        let err = eval("=RUN_WORKSHEET(\"http://x/\", \"A1\")", &EvalContext::default())
            .unwrap_err();
        assert_eq!(err.kind(), "RunWorksheetError");
    }
}
