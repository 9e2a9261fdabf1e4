//! Installment expansion -- turns portfolio entries (one per debtor) into one
//! record per anticipated installment, with due date and per-diem discount.
//!
//! Discount is simple interest on face value:
//! `discount = value * (per_diem_rate / 100) * days_to_due`.
//! Installments already past due get a negative `days_to_due` and therefore a
//! negative discount (a premium). That is deliberate and never clamped.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnticipationError;
use crate::time_value::{add_months, days_between, per_diem_loss, simple_discount};
use crate::types::{Money, Rate};
use crate::AnticipationResult;

/// Highest accepted per-diem rate: the whole face value in a single day.
pub const MAX_PER_DIEM_RATE: Rate = Decimal::ONE_HUNDRED;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Who owes the installments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Debtor {
    pub name: String,
    /// CPF/CNPJ or any other tax identifier, kept verbatim.
    #[serde(default)]
    pub tax_id: String,
}

/// One debtor's open installment plan, as captured from the closing form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub debtor: Debtor,
    /// Face value of every installment in the plan.
    pub installment_value: Money,
    /// Installments still open on the plan.
    pub open_installment_count: u32,
    /// Due date of the first open installment.
    pub first_due_date: NaiveDate,
    /// How many of the open installments (from the first) enter the portfolio.
    pub anticipate_count: u32,
}

impl PortfolioEntry {
    /// Reject malformed entries. `index` is the entry's position in the
    /// portfolio and is carried in the error for the caller's form.
    pub fn validate(&self, index: usize) -> AnticipationResult<()> {
        let invalid = |reason: &str| AnticipationError::InvalidEntry {
            index,
            reason: reason.to_string(),
        };

        if self.installment_value <= Decimal::ZERO {
            return Err(invalid("installment_value must be positive"));
        }
        if self.open_installment_count < 1 {
            return Err(invalid("open_installment_count must be at least 1"));
        }
        if self.anticipate_count < 1 {
            return Err(invalid("anticipate_count must be at least 1"));
        }
        if self.anticipate_count > self.open_installment_count {
            return Err(invalid(
                "anticipate_count cannot exceed open_installment_count",
            ));
        }
        Ok(())
    }

    /// Face value of the anticipated part of the plan.
    pub fn anticipated_face(&self) -> Money {
        self.installment_value * Decimal::from(self.anticipate_count)
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Bucket an installment is assigned to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Allocation {
    /// Backs the anticipated amount; paid out net of discount.
    #[default]
    Operation,
    /// Held as safety margin; paid out at face value.
    Collateral,
}

/// A single anticipated installment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentRecord {
    /// Position of the owning entry in the expanded portfolio.
    pub entry_index: usize,
    pub debtor: Debtor,
    /// 0-based month offset from the entry's first due date.
    pub sequence: u32,
    pub value: Money,
    pub due_date: NaiveDate,
    /// Negative when the installment is already past due.
    pub days_to_due: i64,
    pub discount: Money,
    pub net_value: Money,
    /// `discount / value`, i.e. the fraction of face lost if anticipated.
    pub relative_loss: Rate,
    #[serde(default)]
    pub allocation: Allocation,
}

impl InstallmentRecord {
    /// Cash delivered for this installment under its current allocation.
    pub fn entregue(&self) -> Money {
        match self.allocation {
            Allocation::Operation => self.net_value,
            Allocation::Collateral => self.value,
        }
    }

    /// Discount actually charged; collateral is never discounted.
    pub fn charged_discount(&self) -> Money {
        match self.allocation {
            Allocation::Operation => self.discount,
            Allocation::Collateral => Decimal::ZERO,
        }
    }

    pub fn is_past_due(&self) -> bool {
        self.days_to_due < 0
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Expand portfolio entries into individual installment records.
///
/// Entry `i` contributes `anticipate_count` records with due dates
/// `first_due_date + k months` for `k in 0..anticipate_count`. Every record
/// starts in [`Allocation::Operation`]. `per_diem_rate` is a percentage per
/// day (0.33 means 0.33% per day).
pub fn expand(
    entries: &[PortfolioEntry],
    acceptance_date: NaiveDate,
    per_diem_rate: Rate,
) -> AnticipationResult<Vec<InstallmentRecord>> {
    if per_diem_rate < Decimal::ZERO {
        return Err(AnticipationError::InvalidInput {
            field: "per_diem_rate".into(),
            reason: "Per-diem rate cannot be negative".into(),
        });
    }
    if per_diem_rate > MAX_PER_DIEM_RATE {
        return Err(AnticipationError::InvalidInput {
            field: "per_diem_rate".into(),
            reason: format!("Per-diem rate cannot exceed {MAX_PER_DIEM_RATE}% per day"),
        });
    }

    for (index, entry) in entries.iter().enumerate() {
        entry.validate(index)?;
    }

    let capacity: usize = entries.iter().map(|e| e.anticipate_count as usize).sum();
    let mut records = Vec::with_capacity(capacity);

    for (entry_index, entry) in entries.iter().enumerate() {
        for sequence in 0..entry.anticipate_count {
            let due_date = add_months(entry.first_due_date, sequence)?;
            let days_to_due = days_between(acceptance_date, due_date);
            let discount = simple_discount(entry.installment_value, per_diem_rate, days_to_due)?;
            let net_value = entry.installment_value.checked_sub(discount).ok_or_else(|| {
                AnticipationError::InvalidEntry {
                    index: entry_index,
                    reason: format!("net value of installment {sequence} overflows"),
                }
            })?;

            records.push(InstallmentRecord {
                entry_index,
                debtor: entry.debtor.clone(),
                sequence,
                value: entry.installment_value,
                due_date,
                days_to_due,
                discount,
                net_value,
                // Equal to discount / value without the division round-off
                relative_loss: per_diem_loss(per_diem_rate, days_to_due)?,
                allocation: Allocation::Operation,
            });
        }
    }

    debug!(
        entries = entries.len(),
        installments = records.len(),
        %acceptance_date,
        %per_diem_rate,
        "portfolio expanded"
    );

    Ok(records)
}
