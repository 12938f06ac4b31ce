//! The recalculation pass.

use crate::cancel::CancellationToken;
use crate::config::RecalcConfig;
use crate::context::{EvalServices, EvaluationContext, WorksheetResolver};
use crate::error::CalcError;
use crate::graph::build_dependency_graph;
use crate::remote::RemoteSheets;
use crate::scheduler::{Scheduler, SchedulerOutcome};
use crate::usercode::{parse_program, Statement};
use gridcalc_formulas::{EvalError, FormulaEngine, FormulaExpr};
use gridcalc_primitives::Value;
use gridcalc_sheet::{ConsoleTextType, UsercodeError, Worksheet};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationStatus {
    Completed,
    /// The deadline passed before the pass finished. Results computed so far
    /// are kept.
    TimedOut,
}

impl CalculationStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, CalculationStatus::Completed)
    }
}

/// Runs recalculation passes over worksheets.
#[derive(Clone)]
pub struct Calculator {
    config: RecalcConfig,
    engine: Arc<FormulaEngine>,
    remote: Option<Arc<dyn RemoteSheets>>,
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new(RecalcConfig::default())
    }
}

impl Calculator {
    pub fn new(config: RecalcConfig) -> Self {
        Self {
            config,
            engine: Arc::new(FormulaEngine::new()),
            remote: None,
        }
    }

    /// Enable `RUN_WORKSHEET` through `remote`.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSheets>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn config(&self) -> &RecalcConfig {
        &self.config
    }

    /// Recalculate `worksheet` by running `usercode`, with no time limit.
    pub fn calculate(&self, worksheet: &mut Worksheet, usercode: &str) -> CalculationStatus {
        self.run_pass(worksheet, usercode, &CancellationToken::new())
    }

    /// Recalculate with a deadline. Cells not evaluated in time keep no
    /// value; the console records the timeout.
    pub fn calculate_with_timeout(
        &self,
        worksheet: &mut Worksheet,
        usercode: &str,
        timeout: Duration,
    ) -> CalculationStatus {
        let token = CancellationToken::with_timeout(timeout);
        let status = self.run_pass(worksheet, usercode, &token);
        if status == CalculationStatus::TimedOut {
            tracing::warn!("calculation did not finish within {:?}", timeout);
            worksheet.add_console_text(
                "TimeoutError: calculation did not finish in time\n",
                ConsoleTextType::Error,
            );
        }
        status
    }

    /// Recalculate using the configured timeout.
    pub fn calculate_with_default_timeout(
        &self,
        worksheet: &mut Worksheet,
        usercode: &str,
    ) -> CalculationStatus {
        self.calculate_with_timeout(worksheet, usercode, self.config.timeout)
    }

    fn services(&self, token: &CancellationToken) -> EvalServices {
        EvalServices {
            engine: Arc::clone(&self.engine),
            remote: self.remote.clone(),
            api_key: self.config.api_key.clone(),
            token: token.clone(),
        }
    }

    fn run_pass(
        &self,
        worksheet: &mut Worksheet,
        usercode: &str,
        token: &CancellationToken,
    ) -> CalculationStatus {
        let started = Instant::now();
        worksheet.clear_values();
        worksheet.clear_console();
        worksheet.usercode_error = None;

        let status = self.run_usercode(worksheet, usercode, token);

        let elapsed = started.elapsed();
        worksheet.add_console_text(
            &format!("Took {:.2}s", elapsed.as_secs_f64()),
            ConsoleTextType::System,
        );
        tracing::info!(
            "recalculated {} cells in {:.2}s",
            worksheet.len(),
            elapsed.as_secs_f64()
        );
        status
    }

    fn run_usercode(
        &self,
        worksheet: &mut Worksheet,
        usercode: &str,
        token: &CancellationToken,
    ) -> CalculationStatus {
        let program = match parse_program(usercode) {
            Ok(program) => program,
            Err(CalcError::Syntax { line, position }) => {
                record_usercode_error(
                    worksheet,
                    format!("Syntax error at character {position}"),
                    line,
                );
                return CalculationStatus::Completed;
            }
            Err(other) => {
                record_usercode_error(worksheet, other.to_string(), 1);
                return CalculationStatus::Completed;
            }
        };

        let services = self.services(token);
        for line in &program.lines {
            if token.is_cancelled() {
                return CalculationStatus::TimedOut;
            }
            let result = match &line.statement {
                Statement::LoadConstants => {
                    load_constants(worksheet);
                    Ok(())
                }
                Statement::EvaluateFormulae => {
                    match self.evaluate_formulae(worksheet, &services) {
                        Ok(outcome) if outcome.is_completed() => Ok(()),
                        Ok(_) => return CalculationStatus::TimedOut,
                        Err(err) => Err(err),
                    }
                }
                Statement::Print(expr) => {
                    let value = self.eval_statement(worksheet, expr, &services);
                    value.map(|value| {
                        worksheet.add_console_text(
                            &format!("{}\n", value.formatted()),
                            ConsoleTextType::Output,
                        );
                    })
                }
                Statement::Assign { target, expr } => {
                    let value = self.eval_statement(worksheet, expr, &services);
                    value.map(|value| worksheet.cell_mut(*target).set_value(value))
                }
            };

            if let Err(err) = result {
                record_usercode_error(worksheet, err.describe(), line.number);
                break;
            }
        }

        if token.is_expired() {
            CalculationStatus::TimedOut
        } else {
            CalculationStatus::Completed
        }
    }

    fn eval_statement(
        &self,
        worksheet: &Worksheet,
        expr: &FormulaExpr,
        services: &EvalServices,
    ) -> Result<Value, EvalError> {
        let resolver = WorksheetResolver {
            worksheet,
            services,
        };
        self.engine.eval_expr(expr, &resolver)
    }

    /// Build the graph over every cell and evaluate it in parallel.
    ///
    /// A cycle aborts before anything is evaluated: each cell on the cycle
    /// gets a `CycleError` and the error is returned to the program.
    pub fn evaluate_formulae(
        &self,
        worksheet: &mut Worksheet,
        services: &EvalServices,
    ) -> Result<SchedulerOutcome, EvalError> {
        let (graph, leaves) = match build_dependency_graph(worksheet) {
            Ok(built) => built,
            Err(cycle) => {
                let description = EvalError::Cycle(cycle.to_string()).describe();
                tracing::warn!("{}", description);
                for location in &cycle.path {
                    worksheet.cell_mut(*location).set_error(description.clone());
                }
                return Err(EvalError::Cycle(cycle.to_string()));
            }
        };

        let context = Arc::new(EvaluationContext::new(worksheet, &graph, services.clone()));
        let worker_context = Arc::clone(&context);
        let outcome = Scheduler::new(&self.config)
            .run(
                &graph,
                &leaves,
                move |location| worker_context.evaluate_cell(location),
                &services.token,
            )
            .map_err(|e| EvalError::Formula(e.to_string()))?;

        if !outcome.is_completed() {
            context.abandon();
        }
        context.apply(worksheet);
        Ok(outcome)
    }
}

/// Interpret every constant (non-`=`) cell as a literal value.
pub fn load_constants(worksheet: &mut Worksheet) {
    for (_, cell) in worksheet.iter_mut() {
        if let Some(text) = cell.constant() {
            let value = Value::parse_literal(text);
            cell.set_value(value);
        }
    }
}

fn record_usercode_error(worksheet: &mut Worksheet, message: String, line: usize) {
    tracing::warn!("usercode error on line {}: {}", line, message);
    worksheet.add_console_text(&format!("{message} (line {line})\n"), ConsoleTextType::Error);
    worksheet.usercode_error = Some(UsercodeError { message, line });
}
