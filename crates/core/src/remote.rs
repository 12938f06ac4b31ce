//! Cross-sheet composition.

use crate::cancel::CancellationToken;
use crate::error::CalcResult;
use gridcalc_formulas::{EvalError, RemoteValues};
use gridcalc_primitives::{CellLocation, Value};
use gridcalc_sheet::Worksheet;
use std::sync::Arc;
use std::time::Duration;

/// API version segment used in published sheet URLs.
pub const API_VERSION: &str = "0.1";

/// Fetches another published sheet, recalculated with overrides applied.
pub trait RemoteSheets: Send + Sync {
    /// `timeout` is the time left before the calling pass's deadline, if any.
    fn run_worksheet(
        &self,
        url: &str,
        overrides: &[(CellLocation, Value)],
        api_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> CalcResult<Worksheet>;
}

/// Run a remote sheet on behalf of a formula and hand back its values.
pub(crate) fn fetch_remote_values(
    remote: Option<&Arc<dyn RemoteSheets>>,
    api_key: Option<&str>,
    token: &CancellationToken,
    url: &str,
    overrides: &[(CellLocation, Value)],
) -> Result<RemoteValues, EvalError> {
    let remote = remote.ok_or_else(|| {
        EvalError::RunWorksheet("run_worksheet: no remote sheet access configured".to_string())
    })?;
    if token.is_cancelled() {
        return Err(EvalError::RunWorksheet(
            "run_worksheet: calculation was cancelled".to_string(),
        ));
    }

    let sheet = remote
        .run_worksheet(url, overrides, api_key, token.remaining())
        .map_err(|e| EvalError::RunWorksheet(format!("run_worksheet: {e}")))?;
    if let Some(error) = &sheet.usercode_error {
        return Err(EvalError::RunWorksheet(format!(
            "run_worksheet: {}",
            error.message
        )));
    }

    Ok(sheet
        .iter()
        .map(|(location, cell)| (*location, cell.value.clone()))
        .collect())
}
