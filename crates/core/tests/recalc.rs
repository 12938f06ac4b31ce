use gridcalc_core::{
    build_dependency_graph, CalcError, CalcResult, CalculationStatus, Calculator, RecalcConfig,
    RemoteSheets, DEFAULT_USERCODE,
};
use gridcalc_formulas::{compile, EvalContext, FormulaEngine, ValueResolver};
use gridcalc_primitives::{CellLocation, Value};
use gridcalc_sheet::{UsercodeError, Worksheet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn loc(label: &str) -> CellLocation {
    CellLocation::from_label(label).unwrap()
}

fn sheet(cells: &[(&str, &str)]) -> Worksheet {
    let mut sheet = Worksheet::new();
    for (label, formula) in cells {
        sheet.set_formula(label, formula).unwrap();
    }
    sheet
}

fn calculate(sheet: &mut Worksheet) -> CalculationStatus {
    Calculator::default().calculate(sheet, DEFAULT_USERCODE)
}

// ============================================================================
// Basic passes
// ============================================================================

#[test]
fn test_constant_and_dependent_formula() {
    let mut sheet = sheet(&[("A1", "1"), ("B1", "=A1+1")]);
    let (_, leaves) = build_dependency_graph(&sheet).unwrap();
    assert_eq!(leaves.into_iter().collect::<Vec<_>>(), vec![loc("A1")]);

    assert_eq!(calculate(&mut sheet), CalculationStatus::Completed);
    assert_eq!(sheet.value(loc("A1")), Value::Int(1));
    assert_eq!(sheet.value(loc("B1")), Value::Int(2));
    assert_eq!(sheet.cell(loc("B1")).formatted_value, "2");
    assert!(sheet.iter().all(|(_, cell)| cell.error.is_none()));
    assert!(sheet.usercode_error.is_none());
    assert!(sheet.console().plain_text().starts_with("Took "));
}

#[test]
fn test_zero_division_is_reported() {
    let mut sheet = sheet(&[("A1", "=1/0")]);
    calculate(&mut sheet);

    let a1 = sheet.cell(loc("A1"));
    assert!(a1.value.is_undefined());
    assert!(a1
        .error
        .as_deref()
        .unwrap()
        .starts_with("ZeroDivisionError: "));

    let console = sheet.console().plain_text();
    assert!(console.contains("=1/0"));
    assert!(console.contains("A1"));
}

#[test]
fn test_errors_stay_in_their_cell() {
    let mut sheet = sheet(&[
        ("A1", "=1/0"),
        ("A2", "=A1+1"),
        ("B1", "5"),
        ("B2", "=B1*2"),
    ]);
    calculate(&mut sheet);

    assert!(sheet.cell(loc("A1")).error.is_some());
    assert!(sheet
        .cell(loc("A2"))
        .error
        .as_deref()
        .unwrap()
        .starts_with("TypeError: "));
    assert_eq!(sheet.value(loc("B2")), Value::Int(10));
    assert!(sheet.cell(loc("B2")).error.is_none());
}

#[test]
fn test_deeply_nested_formula_fails_alone() {
    let deep = format!("={}1", "-".repeat(20_000));
    let chain = format!("={}1", "1+".repeat(20_000));
    let mut sheet = sheet(&[("A1", &deep), ("A2", &chain), ("B1", "=2")]);
    assert_eq!(calculate(&mut sheet), CalculationStatus::Completed);

    for label in ["A1", "A2"] {
        let error = sheet.cell(loc(label)).error.clone().unwrap();
        assert!(error.starts_with("FormulaError: "), "{label}: {error}");
        assert!(error.contains("nested too deeply"), "{label}: {error}");
    }
    assert_eq!(sheet.value(loc("B1")), Value::Int(2));
    assert!(sheet.cell(loc("B1")).error.is_none());
}

#[test]
fn test_empty_referenced_cell_is_undefined() {
    let mut sheet = sheet(&[("A1", "=ISUNDEFINED(Z99)")]);
    calculate(&mut sheet);
    assert_eq!(sheet.value(loc("A1")), Value::Bool(true));
    assert!(sheet.get(loc("Z99")).is_none());
}

#[test]
fn test_ranges_and_functions() {
    let mut sheet = sheet(&[
        ("A1", "1"),
        ("A2", "2.5"),
        ("A3", "hello"),
        ("B1", "=SUM(A1:A2)"),
        ("B2", "=UPPER(A3)"),
        ("B3", "=IF(B1 > 3, \"big\", \"small\")"),
    ]);
    calculate(&mut sheet);
    assert_eq!(sheet.value(loc("B1")), Value::Float(3.5));
    assert_eq!(sheet.value(loc("B2")), Value::String("HELLO".to_string()));
    assert_eq!(sheet.value(loc("B3")), Value::String("big".to_string()));
}

#[test]
fn test_recalculation_is_idempotent() {
    let mut sheet = sheet(&[("A1", "3"), ("A2", "=A1*A1"), ("A3", "=A2-A1")]);
    calculate(&mut sheet);
    let first: Vec<Value> = sheet.iter().map(|(_, cell)| cell.value.clone()).collect();

    calculate(&mut sheet);
    let second: Vec<Value> = sheet.iter().map(|(_, cell)| cell.value.clone()).collect();
    assert_eq!(first, second);
    assert_eq!(
        sheet.console().plain_text().matches("Took ").count(),
        1,
        "console is reset between passes"
    );
}

#[test]
fn test_values_cleared_before_pass() {
    let mut sheet = sheet(&[("A1", "=2")]);
    calculate(&mut sheet);
    sheet.set_formula("A1", "=1/0").unwrap();
    calculate(&mut sheet);
    assert!(sheet.value(loc("A1")).is_undefined());
}

// ============================================================================
// Ordering
// ============================================================================

fn wide_sheet(size: i64) -> Worksheet {
    let mut sheet = Worksheet::new();
    for row in 1..=size {
        sheet.set_cell_formula(1, row, &row.to_string()).unwrap();
        sheet
            .set_cell_formula(2, row, &format!("=A{row}+1"))
            .unwrap();
    }
    sheet
}

#[test]
fn test_worker_count_does_not_change_results() {
    let mut single = wide_sheet(1000);
    let mut pooled = single.clone();

    Calculator::new(RecalcConfig::default().with_workers(1))
        .calculate(&mut single, DEFAULT_USERCODE);
    Calculator::new(RecalcConfig::default().with_workers(10))
        .calculate(&mut pooled, DEFAULT_USERCODE);

    for row in 1..=1000u32 {
        let location = CellLocation::new(2, row);
        let expected = Value::Int(i64::from(row) + 1);
        assert_eq!(single.value(location), expected);
        assert_eq!(pooled.value(location), expected);
    }
}

#[test]
fn test_matches_sequential_topological_evaluation() {
    let mut sheet = sheet(&[
        ("A1", "2"),
        ("A2", "=A1*3"),
        ("B1", "=A2+A1"),
        ("B2", "=SUM(A1:B1)"),
        ("C1", "=B2-B1"),
        ("C2", "=MAX(A1:C1)"),
    ]);

    let (graph, _) = build_dependency_graph(&sheet).unwrap();
    let engine = FormulaEngine::new();
    let mut context = EvalContext::default();
    for location in graph.topological_order().unwrap() {
        let cell = sheet.cell(location);
        let value = match (cell.constant(), cell.compiled()) {
            (Some(text), _) => Value::parse_literal(text),
            (None, Some(compiled)) => engine.evaluate(compiled, &context).unwrap(),
            (None, None) => Value::Undefined,
        };
        context.set(location, value);
    }

    calculate(&mut sheet);
    for (location, cell) in sheet.iter() {
        assert_eq!(cell.value, context.get_cell(*location), "{location}");
    }
}

#[test]
fn test_long_chain() {
    let mut sheet = Worksheet::new();
    sheet.set_formula("A1", "0").unwrap();
    for row in 2..=200 {
        sheet
            .set_cell_formula(1, row, &format!("=A{}+1", row - 1))
            .unwrap();
    }
    calculate(&mut sheet);
    assert_eq!(sheet.value(CellLocation::new(1, 200)), Value::Int(199));
}

// ============================================================================
// Cycles
// ============================================================================

#[test]
fn test_cycle_aborts_evaluation() {
    let mut sheet = sheet(&[("A1", "=B1"), ("B1", "=A1"), ("C1", "=1+1")]);
    let err = build_dependency_graph(&sheet).unwrap_err();
    assert_eq!(err.path, vec![loc("A1"), loc("B1"), loc("A1")]);

    calculate(&mut sheet);
    assert_eq!(
        sheet.cell(loc("A1")).error.as_deref(),
        Some("CycleError: A1 -> B1 -> A1")
    );
    assert!(sheet.cell(loc("B1")).error.is_some());
    assert!(
        sheet.value(loc("C1")).is_undefined(),
        "nothing is evaluated when the graph has a cycle"
    );
    assert_eq!(
        sheet.usercode_error,
        Some(UsercodeError {
            message: "CycleError: A1 -> B1 -> A1".to_string(),
            line: 2,
        })
    );
}

#[test]
fn test_self_reference_cycle() {
    let mut sheet = sheet(&[("A1", "=A1+1")]);
    calculate(&mut sheet);
    assert_eq!(
        sheet.cell(loc("A1")).error.as_deref(),
        Some("CycleError: A1 -> A1")
    );
}

// ============================================================================
// Usercode
// ============================================================================

#[test]
fn test_usercode_print_and_assign() {
    let mut sheet = sheet(&[("A1", "4"), ("A2", "=A1*2")]);
    let usercode = "load_constants()\nevaluate_formulae()\nprint(A2 + 1)\nC1 = A2 * 10\n";
    Calculator::default().calculate(&mut sheet, usercode);

    assert_eq!(sheet.value(loc("C1")), Value::Int(80));
    assert!(sheet.console_text().contains("console_output_text"));
    assert!(sheet.console().plain_text().starts_with("9\n"));
}

#[test]
fn test_usercode_syntax_error_runs_nothing() {
    let mut sheet = sheet(&[("A1", "4"), ("A2", "=A1*2")]);
    Calculator::default().calculate(&mut sheet, "load_constants()\nevaluate_formulae(\n");

    assert!(sheet.value(loc("A2")).is_undefined());
    let error = sheet.usercode_error.clone().unwrap();
    assert_eq!(error.line, 2);
    assert!(error.message.starts_with("Syntax error at character"));
    assert!(sheet.console().plain_text().contains("(line 2)"));
}

#[test]
fn test_usercode_runtime_error_keeps_earlier_work() {
    let mut sheet = sheet(&[("A1", "4"), ("A2", "=A1*2")]);
    let usercode = "load_constants()\nevaluate_formulae()\nB1 = A2 / 0\nB2 = 1\n";
    Calculator::default().calculate(&mut sheet, usercode);

    assert_eq!(sheet.value(loc("A2")), Value::Int(8));
    assert!(sheet.get(loc("B2")).is_none());
    assert_eq!(
        sheet.usercode_error,
        Some(UsercodeError {
            message: "ZeroDivisionError: division by zero".to_string(),
            line: 3,
        })
    );
}

#[test]
fn test_formulae_without_constants() {
    let mut sheet = sheet(&[("A1", "4"), ("A2", "=A1*2")]);
    Calculator::default().calculate(&mut sheet, "evaluate_formulae()\n");
    assert!(sheet.value(loc("A1")).is_undefined());
    assert!(sheet.cell(loc("A2")).error.is_some());
}

// ============================================================================
// Cross-sheet composition
// ============================================================================

#[derive(Default)]
struct RecordingRemote {
    calls: Mutex<Vec<(String, Vec<(CellLocation, Value)>, Option<String>)>>,
    fail_with: Option<String>,
}

impl RemoteSheets for RecordingRemote {
    fn run_worksheet(
        &self,
        url: &str,
        overrides: &[(CellLocation, Value)],
        api_key: Option<&str>,
        _timeout: Option<Duration>,
    ) -> CalcResult<Worksheet> {
        self.calls.lock().push((
            url.to_string(),
            overrides.to_vec(),
            api_key.map(str::to_string),
        ));

        let mut sheet = Worksheet::new();
        if let Some(message) = &self.fail_with {
            sheet.usercode_error = Some(UsercodeError {
                message: message.clone(),
                line: 1,
            });
            return Ok(sheet);
        }
        let input = overrides
            .iter()
            .find(|(location, _)| *location == loc("A1"))
            .map_or(Value::Int(1), |(_, value)| value.clone());
        if let Value::Int(n) = input {
            sheet.cell_mut(loc("B2")).set_value(Value::Int(n * 100));
        }
        Ok(sheet)
    }
}

#[test]
fn test_run_worksheet_uses_remote() {
    let remote = Arc::new(RecordingRemote::default());
    let calculator = Calculator::new(RecalcConfig::default().with_api_key("secret"))
        .with_remote(remote.clone());

    let mut sheet = sheet(&[
        ("A1", "7"),
        ("B1", "=RUN_WORKSHEET(\"http://sheets/other/\", \"B2\", \"A1\", A1)"),
    ]);
    calculator.calculate(&mut sheet, DEFAULT_USERCODE);

    assert_eq!(sheet.value(loc("B1")), Value::Int(700));
    let calls = remote.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "http://sheets/other/");
    assert_eq!(calls[0].1, vec![(loc("A1"), Value::Int(7))]);
    assert_eq!(calls[0].2.as_deref(), Some("secret"));
}

#[test]
fn test_run_worksheet_remote_usercode_error() {
    let remote = Arc::new(RecordingRemote {
        fail_with: Some("NameError: FOO".to_string()),
        ..RecordingRemote::default()
    });
    let calculator = Calculator::default().with_remote(remote);

    let mut sheet = sheet(&[("A1", "=RUN_WORKSHEET(\"http://sheets/other/\", \"B2\")")]);
    calculator.calculate(&mut sheet, DEFAULT_USERCODE);
    assert_eq!(
        sheet.cell(loc("A1")).error.as_deref(),
        Some("RunWorksheetError: run_worksheet: NameError: FOO")
    );
}

#[test]
fn test_run_worksheet_without_remote() {
    let mut sheet = sheet(&[("A1", "=RUN_WORKSHEET(\"http://sheets/other/\", \"B2\")")]);
    calculate(&mut sheet);
    assert!(sheet
        .cell(loc("A1"))
        .error
        .as_deref()
        .unwrap()
        .starts_with("RunWorksheetError: "));
}

// ============================================================================
// Timeouts
// ============================================================================

struct SlowRemote {
    delay: Duration,
}

impl RemoteSheets for SlowRemote {
    fn run_worksheet(
        &self,
        _url: &str,
        _overrides: &[(CellLocation, Value)],
        _api_key: Option<&str>,
        _timeout: Option<Duration>,
    ) -> CalcResult<Worksheet> {
        thread::sleep(self.delay);
        let mut sheet = Worksheet::new();
        sheet.cell_mut(loc("A1")).set_value(Value::Int(1));
        Ok(sheet)
    }
}

#[test]
fn test_deadline_leaves_partial_valid_state() {
    let mut config = RecalcConfig::default()
        .with_workers(2)
        .with_grace_period(Duration::from_millis(50));
    config.poll_interval = Duration::from_millis(10);
    let calculator = Calculator::new(config).with_remote(Arc::new(SlowRemote {
        delay: Duration::from_millis(100),
    }));

    let mut sheet = Worksheet::new();
    sheet
        .set_formula("A1", "=RUN_WORKSHEET(\"http://slow/\", \"A1\")")
        .unwrap();
    for row in 2..=30 {
        sheet
            .set_cell_formula(
                1,
                row,
                &format!("=RUN_WORKSHEET(\"http://slow/\", \"A1\") + A{}", row - 1),
            )
            .unwrap();
    }

    let started = Instant::now();
    let status =
        calculator.calculate_with_timeout(&mut sheet, DEFAULT_USERCODE, Duration::from_millis(300));
    let elapsed = started.elapsed();

    assert_eq!(status, CalculationStatus::TimedOut);
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(sheet
        .console()
        .plain_text()
        .contains("calculation did not finish in time"));

    assert_eq!(sheet.value(loc("A1")), Value::Int(1));
    assert!(sheet.value(CellLocation::new(1, 30)).is_undefined());
    for (location, cell) in sheet.iter() {
        match &cell.value {
            Value::Int(n) => {
                assert!(cell.error.is_none(), "{location}");
                assert_eq!(*n, i64::from(location.row));
                assert_eq!(cell.formatted_value, n.to_string());
            }
            Value::Undefined => assert!(cell.formatted_value.is_empty(), "{location}"),
            other => panic!("unexpected value {other:?} in {location}"),
        }
    }
}

#[test]
fn test_generous_deadline_completes() {
    let mut sheet = wide_sheet(50);
    let status = Calculator::default().calculate_with_timeout(
        &mut sheet,
        DEFAULT_USERCODE,
        Duration::from_secs(30),
    );
    assert!(status.is_completed());
    assert_eq!(sheet.value(CellLocation::new(2, 50)), Value::Int(51));
}

#[test]
fn test_syntax_error_type() {
    let err = gridcalc_core::parse_program("print(").unwrap_err();
    assert!(matches!(err, CalcError::Syntax { line: 1, .. }));
    assert!(compile("=1+").dependencies.is_empty());
}
