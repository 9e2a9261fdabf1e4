use napi::Result as NapiResult;
use napi_derive::napi;

use anticipation_core::anticipation::{
    self, AnticipationInput, ExpansionInput, InstallmentRecord,
};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

/// Payload for allocating an already-expanded (possibly edited) schedule.
#[derive(Deserialize)]
struct AllocationRequest {
    installments: Vec<InstallmentRecord>,
    target_ratio_percent: Decimal,
}

// ---------------------------------------------------------------------------
// Anticipation
// ---------------------------------------------------------------------------

#[napi]
pub fn expand_portfolio(input_json: String) -> NapiResult<String> {
    let input: ExpansionInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = anticipation::expand_portfolio(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn allocate_installments(input_json: String) -> NapiResult<String> {
    let request: AllocationRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = anticipation::allocate(&request.installments, request.target_ratio_percent)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn run_anticipation(input_json: String) -> NapiResult<String> {
    let input: AnticipationInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = anticipation::run_anticipation(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
