use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::AnticipationError;
use crate::types::{Money, Rate};
use crate::AnticipationResult;

const CONVERGENCE_THRESHOLD: Decimal = dec!(0.0000001);
const STEP_THRESHOLD: Decimal = dec!(0.00000001);
const MAX_IRR_ITERATIONS: u32 = 100;
const DAYS_PER_YEAR: Decimal = dec!(365.25);
const PERCENT: Decimal = dec!(100);

/// Calendar-month shift. A day of month missing from the target month is
/// clamped to that month's last day (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(date: NaiveDate, months: u32) -> AnticipationResult<NaiveDate> {
    date.checked_add_months(Months::new(months)).ok_or_else(|| {
        AnticipationError::DateError(format!("{date} + {months} months is out of range"))
    })
}

/// Whole calendar days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Simple per-diem discount: `value * (per_diem_percent / 100) * days`.
///
/// Negative `days` produce a negative discount (a premium on past-due paper).
pub fn simple_discount(value: Money, per_diem_percent: Rate, days: i64) -> AnticipationResult<Money> {
    let loss = per_diem_loss(per_diem_percent, days)?;
    value
        .checked_mul(loss)
        .ok_or_else(|| AnticipationError::InvalidInput {
            field: "discount".into(),
            reason: format!("{value} at {per_diem_percent}%/day over {days} days overflows"),
        })
}

/// Fraction of face value lost to the per-diem discount over `days`.
pub fn per_diem_loss(per_diem_percent: Rate, days: i64) -> AnticipationResult<Rate> {
    (per_diem_percent / PERCENT)
        .checked_mul(Decimal::from(days))
        .ok_or_else(|| AnticipationError::InvalidInput {
            field: "per_diem_rate".into(),
            reason: format!("{per_diem_percent}%/day over {days} days overflows"),
        })
}

/// Extended IRR for irregular cash flow dates using Newton-Raphson.
///
/// Flows are measured in years of 365.25 days from the first flow's date.
/// Converges on either a vanishing NPV or a vanishing Newton step.
pub fn xirr(dated_flows: &[(NaiveDate, Money)], guess: Rate) -> AnticipationResult<Rate> {
    if dated_flows.len() < 2 {
        return Err(AnticipationError::InvalidInput {
            field: "dated_flows".into(),
            reason: "XIRR requires at least 2 cash flows".into(),
        });
    }
    let has_inflow = dated_flows.iter().any(|(_, a)| *a > Decimal::ZERO);
    let has_outflow = dated_flows.iter().any(|(_, a)| *a < Decimal::ZERO);
    if !has_inflow || !has_outflow {
        return Err(AnticipationError::InvalidInput {
            field: "dated_flows".into(),
            reason: "XIRR requires at least one inflow and one outflow".into(),
        });
    }

    let base_date = dated_flows[0].0;
    let mut rate = guess;

    for i in 0..MAX_IRR_ITERATIONS {
        let mut npv_val = Decimal::ZERO;
        let mut dnpv = Decimal::ZERO;
        let one_plus_r = Decimal::ONE + rate;

        for (date, amount) in dated_flows {
            let years = Decimal::from(days_between(base_date, *date)) / DAYS_PER_YEAR;

            let discount = match one_plus_r.checked_powd(years) {
                Some(d) if !d.is_zero() => d,
                _ => {
                    return Err(AnticipationError::ConvergenceFailure {
                        function: "XIRR".into(),
                        iterations: i,
                        last_delta: npv_val,
                    })
                }
            };

            npv_val += amount / discount;
            dnpv -= years * amount / (one_plus_r * discount);
        }

        if npv_val.abs() < CONVERGENCE_THRESHOLD {
            return Ok(rate);
        }

        if dnpv.is_zero() {
            return Err(AnticipationError::ConvergenceFailure {
                function: "XIRR".into(),
                iterations: i,
                last_delta: npv_val,
            });
        }

        let step = npv_val / dnpv;
        rate -= step;

        if rate < dec!(-0.99) {
            rate = dec!(-0.99);
        } else if rate > dec!(100.0) {
            rate = dec!(100.0);
        }

        if step.abs() < STEP_THRESHOLD {
            return Ok(rate);
        }
    }

    Err(AnticipationError::ConvergenceFailure {
        function: "XIRR".into(),
        iterations: MAX_IRR_ITERATIONS,
        last_delta: Decimal::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_add_months_plain() {
        assert_eq!(add_months(date(2025, 10, 20), 0).unwrap(), date(2025, 10, 20));
        assert_eq!(add_months(date(2025, 10, 20), 3).unwrap(), date(2026, 1, 20));
        assert_eq!(add_months(date(2025, 10, 20), 14).unwrap(), date(2026, 12, 20));
    }

    #[test]
    fn test_add_months_clamps_to_month_end() {
        assert_eq!(add_months(date(2025, 1, 31), 1).unwrap(), date(2025, 2, 28));
        assert_eq!(add_months(date(2024, 1, 31), 1).unwrap(), date(2024, 2, 29));
        assert_eq!(add_months(date(2025, 8, 31), 1).unwrap(), date(2025, 9, 30));
        // Clamping does not carry over into later months
        assert_eq!(add_months(date(2025, 1, 31), 2).unwrap(), date(2025, 3, 31));
    }

    #[test]
    fn test_add_months_out_of_range() {
        let err = add_months(NaiveDate::MAX, 1).unwrap_err();
        assert!(matches!(err, AnticipationError::DateError(_)));
    }

    #[test]
    fn test_days_between_signed() {
        assert_eq!(days_between(date(2025, 10, 15), date(2025, 10, 20)), 5);
        assert_eq!(days_between(date(2025, 10, 15), date(2025, 10, 15)), 0);
        assert_eq!(days_between(date(2025, 10, 15), date(2025, 10, 1)), -14);
    }

    #[test]
    fn test_simple_discount() {
        assert_eq!(simple_discount(dec!(500), dec!(0.33), 5).unwrap(), dec!(8.25));
        assert_eq!(simple_discount(dec!(500), dec!(0.33), 0).unwrap(), Decimal::ZERO);
        assert_eq!(simple_discount(dec!(500), dec!(0.33), -2).unwrap(), dec!(-3.30));
    }

    #[test]
    fn test_simple_discount_overflow_is_an_error() {
        let err = simple_discount(Decimal::MAX, dec!(100), 365).unwrap_err();
        assert!(matches!(err, AnticipationError::InvalidInput { .. }));
        let err = per_diem_loss(Decimal::MAX, 365).unwrap_err();
        assert!(matches!(err, AnticipationError::InvalidInput { .. }));
    }

    #[test]
    fn test_xirr_one_year_ten_percent() {
        let flows = vec![(date(2024, 1, 1), dec!(-1000)), (date(2025, 1, 1), dec!(1100))];
        let rate = xirr(&flows, dec!(0.05)).unwrap();
        // 366 days / 365.25 is marginally over one year
        assert!((rate - dec!(0.10)).abs() < dec!(0.001), "got {rate}");
    }

    #[test]
    fn test_xirr_rejects_single_sign() {
        let flows = vec![(date(2024, 1, 1), dec!(100)), (date(2025, 1, 1), dec!(100))];
        assert!(xirr(&flows, dec!(0.1)).is_err());
    }

    #[test]
    fn test_xirr_requires_two_flows() {
        let flows = vec![(date(2024, 1, 1), dec!(-100))];
        assert!(xirr(&flows, dec!(0.1)).is_err());
    }
}
