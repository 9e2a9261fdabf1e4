//! Collateral allocation -- splits anticipated installments into an operation
//! bucket (paid out net of discount) and a collateral bucket (held at face) so
//! that `collateral_face / operation_face` reaches a target ratio with as
//! little overshoot as possible.
//!
//! Three ordered phases over one record set:
//!
//! 1. Greedy fill. Records sorted by relative loss, highest first (stable, so
//!    ties keep input order), move to collateral until the target is met. The
//!    installments that would lose the most to discount are the ones kept at
//!    face value.
//! 2. Local search. Pairwise collateral/operation swaps, first improvement
//!    wins, rescanning after every applied swap. A swap must keep the target
//!    and strictly reduce slack.
//! 3. Aggregation by bucket (see [`super::summary`]).
//!
//! All ratio comparisons are done by cross-multiplication on exact decimals;
//! no division enters the search.

use std::collections::HashSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::installments::{Allocation, InstallmentRecord};
use super::summary::{entry_breakdown, summarize, AllocatedInstallment, AllocationTotals, EntryAllocation};
use crate::error::AnticipationError;
use crate::types::{Money, Percent};
use crate::AnticipationResult;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Lowest accepted target: collateral must at least match the operation.
pub const MIN_TARGET_RATIO_PERCENT: Percent = dec!(100);
/// Highest accepted target.
pub const MAX_TARGET_RATIO_PERCENT: Percent = dec!(1000);

const PERCENT: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// What the local-search phase did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementStats {
    pub swaps_applied: usize,
    /// Upper bound on applied swaps: the number of records.
    pub swap_limit: usize,
    /// True when the bound stopped the search while an improving swap remained.
    pub limit_reached: bool,
}

/// Outcome of one allocation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub target_ratio_percent: Percent,
    /// Ratio right after the greedy phase, before any swap.
    pub greedy_ratio_percent: Percent,
    pub totals: AllocationTotals,
    pub refinement: RefinementStats,
    pub entries: Vec<EntryAllocation>,
    /// Input records, in input order, with their final allocation.
    pub installments: Vec<AllocatedInstallment>,
    pub warnings: Vec<String>,
}

impl AllocationResult {
    /// Indices (into the input slice) of the installments held as collateral.
    pub fn collateral_indices(&self) -> Vec<usize> {
        self.installments
            .iter()
            .enumerate()
            .filter(|(_, line)| line.record.allocation == Allocation::Collateral)
            .map(|(i, _)| i)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Classify every record as operation or collateral so that the collateral
/// face covers `target_ratio_percent` of the operation face.
///
/// The input slice is not modified; the classified copy is returned inside
/// the result. Fails with:
/// - `EmptyPortfolio` when `records` is empty,
/// - `InvalidTarget` when the target lies outside
///   [`MIN_TARGET_RATIO_PERCENT`]..=[`MAX_TARGET_RATIO_PERCENT`],
/// - `InvalidInput` when a value is not positive, or the faces are too large
///   for ratios to be compared exactly,
/// - `TargetUnreachable` when even the best split (all but the smallest
///   installment in collateral) stays below the target.
pub fn allocate(
    records: &[InstallmentRecord],
    target_ratio_percent: Percent,
) -> AnticipationResult<AllocationResult> {
    if records.is_empty() {
        return Err(AnticipationError::EmptyPortfolio);
    }
    validate_target(target_ratio_percent)?;
    for (i, r) in records.iter().enumerate() {
        if r.value <= Decimal::ZERO {
            return Err(AnticipationError::InvalidInput {
                field: format!("records[{i}].value"),
                reason: "Installment value must be positive".into(),
            });
        }
    }
    check_magnitude(records)?;
    check_reachable(records, target_ratio_percent)?;

    debug!(
        records = records.len(),
        %target_ratio_percent,
        "allocation started"
    );

    let mut book = Book::new(records, target_ratio_percent);
    book.greedy_fill()?;
    let greedy_ratio_percent = book.ratio_percent();
    debug!(
        %greedy_ratio_percent,
        collateral = book.count(Allocation::Collateral),
        "greedy fill complete"
    );

    let refinement = book.refine();
    debug!(
        swaps = refinement.swaps_applied,
        ratio_percent = %book.ratio_percent(),
        "local search complete"
    );

    let classified = book.into_records();
    let totals = summarize(&classified, target_ratio_percent);
    let entries = entry_breakdown(&classified);
    let warnings = collect_warnings(&classified, &refinement);

    Ok(AllocationResult {
        target_ratio_percent,
        greedy_ratio_percent,
        totals,
        refinement,
        entries,
        installments: classified.into_iter().map(AllocatedInstallment::from).collect(),
        warnings,
    })
}

/// Best ratio attainable for the record set, in percent: every installment in
/// collateral except the smallest one. Zero for fewer than two records.
pub fn max_attainable_ratio_percent(records: &[InstallmentRecord]) -> AnticipationResult<Percent> {
    if records.len() < 2 {
        return Ok(Decimal::ZERO);
    }
    let total = total_face(records)?;
    match records.iter().map(|r| r.value).min() {
        Some(smallest) if smallest > Decimal::ZERO => (total - smallest)
            .checked_mul(PERCENT)
            .and_then(|c| c.checked_div(smallest))
            .ok_or_else(|| face_too_large(total)),
        _ => Ok(Decimal::ZERO),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_target(target_ratio_percent: Percent) -> AnticipationResult<()> {
    if target_ratio_percent < MIN_TARGET_RATIO_PERCENT {
        return Err(AnticipationError::InvalidTarget {
            target_percent: target_ratio_percent,
            reason: format!("must be at least {MIN_TARGET_RATIO_PERCENT}%"),
        });
    }
    if target_ratio_percent > MAX_TARGET_RATIO_PERCENT {
        return Err(AnticipationError::InvalidTarget {
            target_percent: target_ratio_percent,
            reason: format!("must not exceed {MAX_TARGET_RATIO_PERCENT}%"),
        });
    }
    Ok(())
}

fn total_face(records: &[InstallmentRecord]) -> AnticipationResult<Money> {
    records
        .iter()
        .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.value))
        .ok_or_else(|| AnticipationError::InvalidInput {
            field: "records".into(),
            reason: "Total face value overflows".into(),
        })
}

fn face_too_large(total: Money) -> AnticipationError {
    AnticipationError::InvalidInput {
        field: "records".into(),
        reason: format!("Total face {total} is too large for exact ratio comparison"),
    }
}

/// Ratio tests multiply two bucket faces (each at most the total) or a face
/// by the target; displayed ratios divide by at least the smallest value.
/// All of them must stay inside the decimal range.
fn check_magnitude(records: &[InstallmentRecord]) -> AnticipationResult<()> {
    let total = total_face(records)?;
    let smallest = records
        .iter()
        .map(|r| r.value)
        .min()
        .ok_or(AnticipationError::EmptyPortfolio)?;

    let fits = total.checked_mul(total).is_some()
        && total.checked_mul(MAX_TARGET_RATIO_PERCENT).is_some()
        && total
            .checked_mul(PERCENT)
            .and_then(|t| t.checked_div(smallest))
            .is_some();
    if !fits {
        return Err(face_too_large(total));
    }
    Ok(())
}

fn check_reachable(records: &[InstallmentRecord], target_ratio_percent: Percent) -> AnticipationResult<()> {
    if records.len() >= 2 {
        let total = total_face(records)?;
        let smallest = records
            .iter()
            .map(|r| r.value)
            .min()
            .ok_or(AnticipationError::EmptyPortfolio)?;
        if meets(total - smallest, smallest, target_ratio_percent) {
            return Ok(());
        }
    }
    Err(AnticipationError::TargetUnreachable {
        target_percent: target_ratio_percent,
        max_attainable_percent: max_attainable_ratio_percent(records)?,
    })
}

/// `collateral / operation >= target / 100` without dividing.
fn meets(collateral: Money, operation: Money, target_ratio_percent: Percent) -> bool {
    collateral * PERCENT >= target_ratio_percent * operation
}

fn collect_warnings(records: &[InstallmentRecord], refinement: &RefinementStats) -> Vec<String> {
    let mut warnings = Vec::new();

    let past_due = records.iter().filter(|r| r.is_past_due()).count();
    if past_due > 0 {
        warnings.push(format!(
            "{past_due} installment(s) already past due at acceptance: discount is negative (premium)"
        ));
    }

    let negative = records
        .iter()
        .filter(|r| r.allocation == Allocation::Operation && r.entregue() < Decimal::ZERO)
        .count();
    if negative > 0 {
        warnings.push(format!(
            "{negative} operation installment(s) have a discount larger than face value"
        ));
    }

    if refinement.limit_reached {
        warnings.push(format!(
            "Local search stopped at its bound of {} swaps; slack may not be minimal",
            refinement.swap_limit
        ));
    }

    warnings
}

// ---------------------------------------------------------------------------
// Search state
// ---------------------------------------------------------------------------

/// Working classification over a borrowed record set.
struct Book<'a> {
    records: &'a [InstallmentRecord],
    allocation: Vec<Allocation>,
    collateral_face: Money,
    operation_face: Money,
    target_ratio_percent: Percent,
}

impl<'a> Book<'a> {
    /// Every record starts in the operation bucket.
    fn new(records: &'a [InstallmentRecord], target_ratio_percent: Percent) -> Self {
        Book {
            records,
            allocation: vec![Allocation::Operation; records.len()],
            collateral_face: Decimal::ZERO,
            operation_face: records.iter().map(|r| r.value).sum(),
            target_ratio_percent,
        }
    }

    fn on_target(&self) -> bool {
        meets(self.collateral_face, self.operation_face, self.target_ratio_percent)
    }

    fn ratio_percent(&self) -> Percent {
        if self.operation_face.is_zero() {
            return Decimal::ZERO;
        }
        self.collateral_face * PERCENT / self.operation_face
    }

    fn count(&self, bucket: Allocation) -> usize {
        self.allocation.iter().filter(|a| **a == bucket).count()
    }

    fn indices(&self, bucket: Allocation) -> Vec<usize> {
        (0..self.allocation.len())
            .filter(|&i| self.allocation[i] == bucket)
            .collect()
    }

    fn reclassify(&mut self, i: usize, to: Allocation) {
        if self.allocation[i] == to {
            return;
        }
        let value = self.records[i].value;
        match to {
            Allocation::Collateral => {
                self.collateral_face += value;
                self.operation_face -= value;
            }
            Allocation::Operation => {
                self.operation_face += value;
                self.collateral_face -= value;
            }
        }
        self.allocation[i] = to;
    }

    fn swap(&mut self, collateral: usize, operation: usize) {
        self.reclassify(collateral, Allocation::Operation);
        self.reclassify(operation, Allocation::Collateral);
    }

    /// Highest relative loss first. The operation bucket keeps at least one
    /// record; if the walk runs out one record short, the last operation
    /// record trades places with the smallest collateral record, which is
    /// the best split available.
    fn greedy_fill(&mut self) -> AnticipationResult<()> {
        let records = self.records;
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| records[b].relative_loss.cmp(&records[a].relative_loss));

        let mut in_operation = records.len();
        for i in order {
            if self.on_target() || in_operation == 1 {
                break;
            }
            self.reclassify(i, Allocation::Collateral);
            in_operation -= 1;
        }

        if !self.on_target() {
            let last = self.indices(Allocation::Operation);
            let smallest = self
                .indices(Allocation::Collateral)
                .into_iter()
                .min_by(|&a, &b| records[a].value.cmp(&records[b].value));
            if let ([op], Some(col)) = (last.as_slice(), smallest) {
                if records[col].value < records[*op].value {
                    self.swap(col, *op);
                }
            }
        }

        if !self.on_target() {
            return Err(AnticipationError::TargetUnreachable {
                target_percent: self.target_ratio_percent,
                max_attainable_percent: max_attainable_ratio_percent(records)?,
            });
        }
        Ok(())
    }

    /// First-improvement pairwise local search, at most one applied swap per
    /// record. Applied pairs are never retried.
    fn refine(&mut self) -> RefinementStats {
        let swap_limit = self.records.len();
        let mut applied: HashSet<(usize, usize)> = HashSet::new();

        while applied.len() < swap_limit {
            match self.first_improving_swap(&applied) {
                Some((c, o)) => {
                    self.swap(c, o);
                    debug_assert!(self.on_target(), "swap ({c}, {o}) dropped below target");
                    applied.insert((c, o));
                }
                None => {
                    return RefinementStats {
                        swaps_applied: applied.len(),
                        swap_limit,
                        limit_reached: false,
                    }
                }
            }
        }

        let limit_reached = self.first_improving_swap(&applied).is_some();
        if limit_reached {
            warn!(swap_limit, "local search bound reached with improvements left");
        }
        RefinementStats {
            swaps_applied: applied.len(),
            swap_limit,
            limit_reached,
        }
    }

    /// Scan collateral x operation pairs in input order; return the first
    /// swap that keeps the target and strictly lowers the ratio.
    fn first_improving_swap(&self, applied: &HashSet<(usize, usize)>) -> Option<(usize, usize)> {
        let collateral = self.indices(Allocation::Collateral);
        let operation = self.indices(Allocation::Operation);

        for &c in &collateral {
            for &o in &operation {
                if applied.contains(&(c, o)) {
                    continue;
                }
                let moved = self.records[o].value - self.records[c].value;
                let new_collateral = self.collateral_face + moved;
                let new_operation = self.operation_face - moved;
                if new_operation <= Decimal::ZERO {
                    continue;
                }
                // new_c / new_o < c / o  <=>  new_c * o < c * new_o
                let lowers_slack =
                    new_collateral * self.operation_face < self.collateral_face * new_operation;
                if lowers_slack && meets(new_collateral, new_operation, self.target_ratio_percent) {
                    return Some((c, o));
                }
            }
        }
        None
    }

    fn into_records(self) -> Vec<InstallmentRecord> {
        self.records
            .iter()
            .zip(self.allocation)
            .map(|(r, allocation)| InstallmentRecord {
                allocation,
                ..r.clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anticipation::installments::{expand, Debtor, PortfolioEntry};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(name: &str, value: Decimal, first_due: NaiveDate, anticipate: u32) -> PortfolioEntry {
        PortfolioEntry {
            debtor: Debtor {
                name: name.into(),
                tax_id: String::new(),
            },
            installment_value: value,
            open_installment_count: 12,
            first_due_date: first_due,
            anticipate_count: anticipate,
        }
    }

    fn records(entries: &[PortfolioEntry]) -> Vec<InstallmentRecord> {
        expand(entries, date(2025, 10, 15), dec!(0.33)).unwrap()
    }

    /// 3 x 300 from 2025-11-10 and 7 x 1300 from 2025-10-25; face 10,000.
    fn two_debtor_book() -> Vec<InstallmentRecord> {
        records(&[
            entry("Ana", dec!(300), date(2025, 11, 10), 3),
            entry("Bruno", dec!(1300), date(2025, 10, 25), 7),
        ])
    }

    #[test]
    fn test_single_entry_greedy_split() {
        let recs = records(&[entry("Maria", dec!(500), date(2025, 10, 20), 8)]);
        let result = allocate(&recs, dec!(130)).unwrap();

        // Farthest five installments go to collateral: 2500 / 1500
        assert_eq!(result.collateral_indices(), vec![3, 4, 5, 6, 7]);
        assert_eq!(result.totals.collateral_face, dec!(2500));
        assert_eq!(result.totals.operation_face, dec!(1500));
        assert_eq!(result.totals.operation_discount, dec!(8.25) + dec!(59.4) + dec!(108.9));
        assert_eq!(result.totals.operation_entregue, dec!(1323.45));
        assert_eq!(result.refinement.swaps_applied, 0);
    }

    #[test]
    fn test_greedy_then_swap_reduces_slack() {
        let recs = two_debtor_book();
        let result = allocate(&recs, dec!(130)).unwrap();

        // Greedy stops at 6800 / 3200
        assert_eq!(result.greedy_ratio_percent, dec!(212.5));
        // One swap: a 1300 collateral for a 300 operation
        assert_eq!(result.refinement.swaps_applied, 1);
        assert!(!result.refinement.limit_reached);
        assert_eq!(result.totals.collateral_face, dec!(5800));
        assert_eq!(result.totals.operation_face, dec!(4200));
        assert_eq!(result.collateral_indices(), vec![0, 2, 6, 7, 8, 9]);
    }

    #[test]
    fn test_fill_stops_at_first_index_reaching_target() {
        let recs = two_debtor_book();
        let mut book = Book::new(&recs, dec!(130));
        book.greedy_fill().unwrap();
        // Order by relative loss: 9, 8, 7, 6, 2, 5, ... -> stops after 5
        assert_eq!(book.indices(Allocation::Collateral), vec![2, 5, 6, 7, 8, 9]);
        assert!(book.on_target());
    }

    #[test]
    fn test_greedy_repair_when_last_record_is_large() {
        // Nearest installment is the big one, so it is the last left in
        // operation; the repair hands that slot to the smallest installment.
        let recs = records(&[
            entry("Carla", dec!(900), date(2025, 10, 20), 1),
            entry("Davi", dec!(100), date(2025, 12, 20), 2),
        ]);
        let mut book = Book::new(&recs, dec!(400));
        book.greedy_fill().unwrap();
        assert_eq!(book.indices(Allocation::Operation), vec![1]);
        assert_eq!(book.collateral_face, dec!(1000));
        assert_eq!(book.operation_face, dec!(100));
    }

    #[test]
    fn test_target_unreachable() {
        let recs = records(&[entry("Maria", dec!(500), date(2025, 10, 20), 8)]);
        // Best split is 3500 / 500 = 700%
        assert_eq!(max_attainable_ratio_percent(&recs).unwrap(), dec!(700));
        let err = allocate(&recs, dec!(800)).unwrap_err();
        assert_eq!(
            err,
            AnticipationError::TargetUnreachable {
                target_percent: dec!(800),
                max_attainable_percent: dec!(700),
            }
        );
        // Exactly the bound is fine
        let result = allocate(&recs, dec!(700)).unwrap();
        assert_eq!(result.totals.operation_count, 1);
    }

    #[test]
    fn test_single_installment_unreachable() {
        let recs = records(&[entry("Maria", dec!(500), date(2025, 10, 20), 1)]);
        let err = allocate(&recs, dec!(100)).unwrap_err();
        assert!(matches!(err, AnticipationError::TargetUnreachable { .. }));
    }

    #[test]
    fn test_oversized_faces_rejected() {
        // 10 x 1e14: the product of the two bucket faces leaves the decimal range
        let recs = records(&[entry("Fundo", dec!(100000000000000), date(2025, 11, 15), 10)]);
        let err = allocate(&recs, dec!(130)).unwrap_err();
        assert!(
            matches!(err, AnticipationError::InvalidInput { ref field, .. } if field == "records"),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn test_tiny_smallest_value_rejected() {
        // 2e8 * 100 / 1e-20 cannot be represented as a ratio
        let recs = records(&[
            entry("Fundo", dec!(100000000), date(2025, 11, 15), 2),
            entry("Centavo", dec!(0.00000000000000000001), date(2025, 11, 15), 1),
        ]);
        let err = allocate(&recs, dec!(130)).unwrap_err();
        assert!(matches!(err, AnticipationError::InvalidInput { ref field, .. } if field == "records"));
        assert!(max_attainable_ratio_percent(&recs).is_err());
    }

    #[test]
    fn test_refinement_swaps_keep_target() {
        // Each applied swap is checked against the target in debug builds
        let recs = records(&[
            entry("Ana", dec!(300), date(2025, 11, 10), 3),
            entry("Bruno", dec!(1300), date(2025, 10, 25), 7),
            entry("Caio", dec!(450), date(2025, 12, 1), 4),
        ]);
        for target in [dec!(100), dec!(130), dec!(175), dec!(250)] {
            let result = allocate(&recs, target).unwrap();
            assert!(result.totals.meets_target(), "target {target}");
        }
    }

    #[test]
    fn test_empty_portfolio() {
        assert_eq!(allocate(&[], dec!(130)).unwrap_err(), AnticipationError::EmptyPortfolio);
    }

    #[test]
    fn test_target_range() {
        let recs = two_debtor_book();
        for bad in [dec!(0), dec!(99.99), dec!(-130), dec!(1000.01), dec!(50000)] {
            let err = allocate(&recs, bad).unwrap_err();
            assert!(matches!(err, AnticipationError::InvalidTarget { .. }), "{bad}: {err:?}");
        }
        assert!(allocate(&recs, dec!(100)).is_ok());
    }

    #[test]
    fn test_non_positive_record_value_rejected() {
        let mut recs = two_debtor_book();
        recs[3].value = Decimal::ZERO;
        let err = allocate(&recs, dec!(130)).unwrap_err();
        assert!(matches!(err, AnticipationError::InvalidInput { .. }));
    }

    #[test]
    fn test_input_slice_untouched() {
        let recs = two_debtor_book();
        let before = recs.clone();
        let _ = allocate(&recs, dec!(130)).unwrap();
        assert_eq!(recs, before);
    }

    #[test]
    fn test_equal_values_terminate_without_swaps() {
        // Any swap between equal installments leaves the ratio unchanged
        let recs = records(&[entry("Eva", dec!(100), date(2025, 11, 1), 12)]);
        let result = allocate(&recs, dec!(100)).unwrap();
        assert_eq!(result.refinement.swaps_applied, 0);
        assert_eq!(result.totals.collateral_face, dec!(600));
        assert_eq!(result.totals.operation_face, dec!(600));
        assert_eq!(result.totals.slack_percent, Some(Decimal::ZERO));
    }

    #[test]
    fn test_past_due_warning() {
        let recs = records(&[
            entry("Fabio", dec!(500), date(2025, 10, 1), 4),
            entry("Gil", dec!(500), date(2025, 11, 1), 4),
        ]);
        let result = allocate(&recs, dec!(130)).unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("past due")));
    }
}
