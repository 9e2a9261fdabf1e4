//! Receivables anticipation: expand debtors' open installment plans, split the
//! installments into an operation bucket and a collateral bucket against a
//! target collateral ratio, and total what gets delivered.

pub mod allocation;
pub mod installments;
pub mod pipeline;
pub mod summary;

pub use allocation::{
    allocate, max_attainable_ratio_percent, AllocationResult, RefinementStats,
    MAX_TARGET_RATIO_PERCENT, MIN_TARGET_RATIO_PERCENT,
};
pub use installments::{
    expand, Allocation, Debtor, InstallmentRecord, PortfolioEntry, MAX_PER_DIEM_RATE,
};
pub use pipeline::{
    expand_portfolio, run_anticipation, AnticipationInput, AnticipationOutput, ExpansionInput,
    ExpansionOutput,
};
pub use summary::{
    entry_breakdown, summarize, AllocatedInstallment, AllocationTotals, EntryAllocation,
    RatioOutcome,
};
