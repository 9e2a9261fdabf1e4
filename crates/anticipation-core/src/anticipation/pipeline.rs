//! End-to-end runs wrapped in the standard computation envelope.
//!
//! [`run_anticipation`] validates the run parameters, expands the portfolio,
//! allocates it and adds funder-side metrics. [`expand_portfolio`] stops after
//! expansion, for schedule previews.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use super::allocation::{allocate, AllocationResult};
use super::installments::{expand, Allocation, InstallmentRecord, PortfolioEntry};
use crate::error::AnticipationError;
use crate::time_value::xirr;
use crate::types::{with_metadata, ComputationOutput, Money, Percent, Rate};
use crate::AnticipationResult;

const YIELD_GUESS: Rate = dec!(0.10);

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// A full anticipation request. Every parameter is explicit; defaults belong
/// to whoever builds the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnticipationInput {
    /// Date the anticipation is accepted; days to due are counted from here.
    pub acceptance_date: NaiveDate,
    /// Discount in percent per day (0.33 = 0.33%/day).
    pub per_diem_rate: Rate,
    /// Required collateral face as a percentage of operation face.
    pub target_ratio_percent: Percent,
    pub entries: Vec<PortfolioEntry>,
}

/// Expansion-only request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionInput {
    pub acceptance_date: NaiveDate,
    pub per_diem_rate: Rate,
    pub entries: Vec<PortfolioEntry>,
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnticipationOutput {
    pub acceptance_date: NaiveDate,
    pub per_diem_rate: Rate,
    pub allocation: AllocationResult,
    /// Annualized XIRR of paying the operation entregue at acceptance and
    /// collecting the operation installments at face on their due dates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funder_yield: Option<Rate>,
    /// Face-weighted average days to due of the operation bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_weighted_days: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionOutput {
    pub installment_count: usize,
    pub total_face: Money,
    /// Discount if every installment were anticipated.
    pub gross_discount: Money,
    pub total_net_value: Money,
    pub past_due_count: usize,
    pub installments: Vec<InstallmentRecord>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Expand, allocate and price a portfolio in one call.
pub fn run_anticipation(
    input: &AnticipationInput,
) -> AnticipationResult<ComputationOutput<AnticipationOutput>> {
    let start = Instant::now();

    let records = expand(&input.entries, input.acceptance_date, input.per_diem_rate)?;
    let allocation = allocate(&records, input.target_ratio_percent)?;

    let mut warnings = allocation.warnings.clone();
    let operation: Vec<&InstallmentRecord> = allocation
        .installments
        .iter()
        .map(|line| &line.record)
        .filter(|r| r.allocation == Allocation::Operation)
        .collect();

    let funder_yield = match funder_yield(
        input.acceptance_date,
        allocation.totals.operation_entregue,
        &operation,
    ) {
        Ok(rate) => Some(rate),
        Err(e) => {
            warn!(error = %e, "funder yield unavailable");
            warnings.push(format!("Funder yield not computed: {e}"));
            None
        }
    };
    let operation_weighted_days = weighted_days(&operation);

    info!(
        installments = records.len(),
        collateral = allocation.totals.collateral_count,
        total_entregue = %allocation.totals.total_entregue,
        "anticipation computed"
    );

    let output = AnticipationOutput {
        acceptance_date: input.acceptance_date,
        per_diem_rate: input.per_diem_rate,
        allocation,
        funder_yield,
        operation_weighted_days,
    };

    let elapsed = start.elapsed().as_micros() as u64;

    Ok(with_metadata(
        "Receivables anticipation -- per-diem simple discount, greedy relative-loss \
         collateral fill with pairwise first-improvement slack reduction",
        &serde_json::json!({
            "acceptance_date": input.acceptance_date,
            "per_diem_rate_percent": input.per_diem_rate.to_string(),
            "target_ratio_percent": input.target_ratio_percent.to_string(),
            "day_count": "actual calendar days",
            "collateral_discount": "none (delivered at face)",
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Expand a portfolio into its installment schedule without allocating.
pub fn expand_portfolio(
    input: &ExpansionInput,
) -> AnticipationResult<ComputationOutput<ExpansionOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let installments = expand(&input.entries, input.acceptance_date, input.per_diem_rate)?;

    let total_face = checked_total(installments.iter().map(|r| r.value), "total_face")?;
    let gross_discount = checked_total(installments.iter().map(|r| r.discount), "gross_discount")?;
    let past_due_count = installments.iter().filter(|r| r.is_past_due()).count();
    if past_due_count > 0 {
        warnings.push(format!(
            "{past_due_count} installment(s) already past due at acceptance"
        ));
    }

    let total_net_value = total_face.checked_sub(gross_discount).ok_or_else(|| {
        AnticipationError::InvalidInput {
            field: "total_net_value".into(),
            reason: "Portfolio net value overflows".into(),
        }
    })?;

    let output = ExpansionOutput {
        installment_count: installments.len(),
        total_face,
        gross_discount,
        total_net_value,
        past_due_count,
        installments,
    };

    let elapsed = start.elapsed().as_micros() as u64;

    Ok(with_metadata(
        "Installment expansion -- calendar-month schedule, per-diem simple discount",
        &serde_json::json!({
            "acceptance_date": input.acceptance_date,
            "per_diem_rate_percent": input.per_diem_rate.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

fn checked_total(values: impl Iterator<Item = Money>, field: &str) -> AnticipationResult<Money> {
    let mut total = Decimal::ZERO;
    for v in values {
        total = total
            .checked_add(v)
            .ok_or_else(|| AnticipationError::InvalidInput {
                field: field.into(),
                reason: "Portfolio total overflows".into(),
            })?;
    }
    Ok(total)
}

/// Without a flow after acceptance every discount factor is 1 and NPV does
/// not depend on the rate, so there is no yield to solve for.
fn funder_yield(
    acceptance_date: NaiveDate,
    paid_out: Money,
    operation: &[&InstallmentRecord],
) -> AnticipationResult<Rate> {
    if !operation.iter().any(|r| r.days_to_due > 0) {
        return Err(AnticipationError::InvalidInput {
            field: "operation".into(),
            reason: "No operation installment falls due after acceptance".into(),
        });
    }
    let mut flows: Vec<(NaiveDate, Money)> = Vec::with_capacity(operation.len() + 1);
    flows.push((acceptance_date, -paid_out));
    flows.extend(operation.iter().map(|r| (r.due_date, r.value)));
    xirr(&flows, YIELD_GUESS)
}

fn weighted_days(operation: &[&InstallmentRecord]) -> Option<Decimal> {
    let face: Money = operation.iter().map(|r| r.value).sum();
    if face.is_zero() {
        return None;
    }
    let weighted: Decimal = operation
        .iter()
        .map(|r| r.value * Decimal::from(r.days_to_due))
        .sum();
    Some(weighted / face)
}
