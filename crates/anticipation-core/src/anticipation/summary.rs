//! Bucket aggregation: face, entregue and discount totals for a classified set
//! of installments, plus the per-debtor breakdown.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::installments::{Allocation, Debtor, InstallmentRecord};
use crate::error::AnticipationError;
use crate::types::{Money, Percent};
use crate::AnticipationResult;

const PERCENT: Decimal = dec!(100);

/// Collateral-to-operation ratio of a classified portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "percent", rename_all = "snake_case")]
pub enum RatioOutcome {
    /// `collateral_face / operation_face`, in percent.
    Realized(Percent),
    /// Operation bucket is empty, the ratio has no finite value.
    Unbounded,
}

impl RatioOutcome {
    pub fn percent(&self) -> Option<Percent> {
        match self {
            RatioOutcome::Realized(p) => Some(*p),
            RatioOutcome::Unbounded => None,
        }
    }
}

/// Portfolio-level totals by bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTotals {
    pub operation_face: Money,
    pub collateral_face: Money,
    pub total_face: Money,
    /// Operation face minus the discount charged on it.
    pub operation_entregue: Money,
    /// Always equal to `collateral_face`.
    pub collateral_entregue: Money,
    pub total_entregue: Money,
    /// Discount charged (operation installments only).
    pub operation_discount: Money,
    /// Discount the collateral installments would have carried if anticipated.
    pub waived_discount: Money,
    pub operation_count: usize,
    pub collateral_count: usize,
    pub ratio: RatioOutcome,
    pub target_ratio_percent: Percent,
    /// `ratio - target` in percentage points; None when the ratio is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_percent: Option<Percent>,
}

impl AllocationTotals {
    /// Realized ratio in percent, or `DivideByZeroRatio` when the operation
    /// bucket is empty.
    pub fn realized_ratio(&self) -> AnticipationResult<Percent> {
        self.ratio
            .percent()
            .ok_or_else(|| AnticipationError::DivideByZeroRatio {
                context: "allocation totals".into(),
            })
    }

    /// Whether the collateral bucket covers the target. An unbounded ratio
    /// always does.
    pub fn meets_target(&self) -> bool {
        match self.ratio {
            RatioOutcome::Realized(_) => {
                self.collateral_face * PERCENT >= self.target_ratio_percent * self.operation_face
            }
            RatioOutcome::Unbounded => true,
        }
    }
}

/// Totals for one debtor's installments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAllocation {
    pub entry_index: usize,
    pub debtor: Debtor,
    pub operation_count: usize,
    pub collateral_count: usize,
    pub operation_face: Money,
    pub collateral_face: Money,
    pub discount: Money,
    pub entregue: Money,
}

/// A classified installment together with what it delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedInstallment {
    #[serde(flatten)]
    pub record: InstallmentRecord,
    pub entregue: Money,
    pub charged_discount: Money,
}

impl From<InstallmentRecord> for AllocatedInstallment {
    fn from(record: InstallmentRecord) -> Self {
        AllocatedInstallment {
            entregue: record.entregue(),
            charged_discount: record.charged_discount(),
            record,
        }
    }
}

/// Aggregate a classified record set. Accepts any classification, including
/// ones edited by hand downstream of [`super::allocate`].
pub fn summarize(records: &[InstallmentRecord], target_ratio_percent: Percent) -> AllocationTotals {
    let mut operation_face = Decimal::ZERO;
    let mut collateral_face = Decimal::ZERO;
    let mut operation_entregue = Decimal::ZERO;
    let mut operation_discount = Decimal::ZERO;
    let mut waived_discount = Decimal::ZERO;
    let mut operation_count = 0;
    let mut collateral_count = 0;

    for r in records {
        match r.allocation {
            Allocation::Operation => {
                operation_face += r.value;
                operation_entregue += r.entregue();
                operation_discount += r.charged_discount();
                operation_count += 1;
            }
            Allocation::Collateral => {
                collateral_face += r.value;
                waived_discount += r.discount;
                collateral_count += 1;
            }
        }
    }

    let ratio = if operation_face.is_zero() {
        RatioOutcome::Unbounded
    } else {
        RatioOutcome::Realized(collateral_face * PERCENT / operation_face)
    };
    let slack_percent = ratio.percent().map(|p| p - target_ratio_percent);

    AllocationTotals {
        operation_face,
        collateral_face,
        total_face: operation_face + collateral_face,
        operation_entregue,
        collateral_entregue: collateral_face,
        total_entregue: operation_entregue + collateral_face,
        operation_discount,
        waived_discount,
        operation_count,
        collateral_count,
        ratio,
        target_ratio_percent,
        slack_percent,
    }
}

/// Per-debtor totals, in order of first appearance.
pub fn entry_breakdown(records: &[InstallmentRecord]) -> Vec<EntryAllocation> {
    let mut out: Vec<EntryAllocation> = Vec::new();

    for r in records {
        let pos = match out.iter().position(|e| e.entry_index == r.entry_index) {
            Some(pos) => pos,
            None => {
                out.push(EntryAllocation {
                    entry_index: r.entry_index,
                    debtor: r.debtor.clone(),
                    operation_count: 0,
                    collateral_count: 0,
                    operation_face: Decimal::ZERO,
                    collateral_face: Decimal::ZERO,
                    discount: Decimal::ZERO,
                    entregue: Decimal::ZERO,
                });
                out.len() - 1
            }
        };

        let e = &mut out[pos];
        match r.allocation {
            Allocation::Operation => {
                e.operation_count += 1;
                e.operation_face += r.value;
            }
            Allocation::Collateral => {
                e.collateral_count += 1;
                e.collateral_face += r.value;
            }
        }
        e.discount += r.charged_discount();
        e.entregue += r.entregue();
    }

    out
}
