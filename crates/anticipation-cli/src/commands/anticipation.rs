use std::str::FromStr;

use anticipation_core::anticipation::{
    expand_portfolio, run_anticipation, AnticipationInput, Debtor, ExpansionInput, PortfolioEntry,
};
use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::input;

/// Business default discount: 0.33% per day.
pub const DEFAULT_PER_DIEM_RATE: Decimal = dec!(0.33);
/// Business default collateral coverage: 130% of the operation.
pub const DEFAULT_TARGET_RATIO: Decimal = dec!(130);

/// Where the portfolio comes from and how it is priced
#[derive(Args)]
pub struct PortfolioArgs {
    /// Path to a JSON or YAML portfolio file
    #[arg(long)]
    pub input: Option<String>,

    /// Inline entry "name;tax_id;value;open;first_due;anticipate" (repeatable)
    #[arg(long = "entry")]
    pub entries: Vec<EntryArg>,

    /// Acceptance date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub acceptance_date: Option<NaiveDate>,

    /// Discount in percent per day (e.g. 0.33)
    #[arg(long)]
    pub per_diem_rate: Option<Decimal>,
}

/// Arguments for installment expansion
#[derive(Args)]
pub struct ExpandArgs {
    #[command(flatten)]
    pub portfolio: PortfolioArgs,
}

/// Arguments for operation/collateral allocation
#[derive(Args)]
pub struct AllocateArgs {
    #[command(flatten)]
    pub portfolio: PortfolioArgs,

    /// Target collateral ratio in percent of the operation (e.g. 130)
    #[arg(long)]
    pub target_ratio: Option<Decimal>,
}

/// Portfolio file layout. Every parameter is optional; command-line flags
/// win over file values, file values win over the built-in defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PortfolioFile {
    #[serde(default)]
    pub acceptance_date: Option<NaiveDate>,
    #[serde(default)]
    pub per_diem_rate: Option<Decimal>,
    #[serde(default)]
    pub target_ratio_percent: Option<Decimal>,
    #[serde(default)]
    pub entries: Vec<PortfolioEntry>,
}

/// A portfolio entry given on the command line.
#[derive(Debug, Clone)]
pub struct EntryArg(pub PortfolioEntry);

impl FromStr for EntryArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(';').map(str::trim).collect();
        if parts.len() != 6 {
            return Err(format!(
                "expected 6 ';'-separated fields (name;tax_id;value;open;first_due;anticipate), got {}",
                parts.len()
            ));
        }

        let installment_value = parts[2]
            .parse::<Decimal>()
            .map_err(|e| format!("invalid value '{}': {}", parts[2], e))?;
        let open_installment_count = parts[3]
            .parse::<u32>()
            .map_err(|e| format!("invalid open count '{}': {}", parts[3], e))?;
        let first_due_date = parts[4]
            .parse::<NaiveDate>()
            .map_err(|e| format!("invalid first due date '{}': {}", parts[4], e))?;
        let anticipate_count = parts[5]
            .parse::<u32>()
            .map_err(|e| format!("invalid anticipate count '{}': {}", parts[5], e))?;

        Ok(EntryArg(PortfolioEntry {
            debtor: Debtor {
                name: parts[0].to_string(),
                tax_id: parts[1].to_string(),
            },
            installment_value,
            open_installment_count,
            first_due_date,
            anticipate_count,
        }))
    }
}

/// Parameters after flag/file/default resolution.
#[derive(Debug)]
struct Resolved {
    acceptance_date: NaiveDate,
    per_diem_rate: Decimal,
    target_ratio_percent: Decimal,
    entries: Vec<PortfolioEntry>,
}

fn load_file(args: &PortfolioArgs) -> Result<PortfolioFile, Box<dyn std::error::Error>> {
    if let Some(ref path) = args.input {
        input::file::read_structured(path)
    } else if args.entries.is_empty() {
        match input::stdin::read_stdin()? {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => Ok(PortfolioFile::default()),
        }
    } else {
        Ok(PortfolioFile::default())
    }
}

fn resolve(
    args: &PortfolioArgs,
    target_ratio: Option<Decimal>,
) -> Result<Resolved, Box<dyn std::error::Error>> {
    let file = load_file(args)?;

    let mut entries = file.entries;
    entries.extend(args.entries.iter().map(|e| e.0.clone()));
    if entries.is_empty() {
        return Err("Provide --entry, --input file or pipe a JSON portfolio via stdin".into());
    }

    let resolved = Resolved {
        acceptance_date: args
            .acceptance_date
            .or(file.acceptance_date)
            .unwrap_or_else(|| chrono::Local::now().date_naive()),
        per_diem_rate: args
            .per_diem_rate
            .or(file.per_diem_rate)
            .unwrap_or(DEFAULT_PER_DIEM_RATE),
        target_ratio_percent: target_ratio
            .or(file.target_ratio_percent)
            .unwrap_or(DEFAULT_TARGET_RATIO),
        entries,
    };
    debug!(?resolved, "parameters resolved");
    Ok(resolved)
}

pub fn run_expand(args: ExpandArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let resolved = resolve(&args.portfolio, None)?;
    let input = ExpansionInput {
        acceptance_date: resolved.acceptance_date,
        per_diem_rate: resolved.per_diem_rate,
        entries: resolved.entries,
    };
    let output = expand_portfolio(&input)?;
    Ok(serde_json::to_value(output)?)
}

pub fn run_allocate(args: AllocateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let resolved = resolve(&args.portfolio, args.target_ratio)?;
    let input = AnticipationInput {
        acceptance_date: resolved.acceptance_date,
        per_diem_rate: resolved.per_diem_rate,
        target_ratio_percent: resolved.target_ratio_percent,
        entries: resolved.entries,
    };
    let output = run_anticipation(&input)?;
    Ok(serde_json::to_value(output)?)
}
