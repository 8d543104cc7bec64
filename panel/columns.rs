//! # Tolerant Column Resolution
//!
//! Every logical field the pipeline understands (firm identifier, year,
//! sector, scores, outcomes and controls) is declared once, together with an
//! ordered list of acceptable header aliases. Headers are resolved a single
//! time at load, after which the rest of the crate only ever sees the
//! canonical names returned by [`LogicalField::canonical`].
//!
//! Matching runs three passes over the alias lists:
//! 1. case-insensitive exact match,
//! 2. punctuation-insensitive match (only ASCII letters and digits compared),
//! 3. substring match of the lower-cased alias inside a lower-cased header.
//!
//! Every unresolved field is tried in one pass before the next, looser pass
//! runs, and a header claimed by one field is never offered to another.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A role a column can play in the analysis, independent of its header text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    Firm,
    Year,
    Sector,
    Roa,
    Niat,
    Esg,
    Environmental,
    Social,
    Governance,
    Employees,
    Debt,
    Assets,
}

impl LogicalField {
    pub const ALL: [LogicalField; 12] = [
        LogicalField::Firm,
        LogicalField::Year,
        LogicalField::Sector,
        LogicalField::Roa,
        LogicalField::Niat,
        LogicalField::Esg,
        LogicalField::Environmental,
        LogicalField::Social,
        LogicalField::Governance,
        LogicalField::Employees,
        LogicalField::Debt,
        LogicalField::Assets,
    ];

    /// The column name used for this field everywhere after loading.
    pub fn canonical(self) -> &'static str {
        match self {
            Self::Firm => "Company_Code",
            Self::Year => "Year",
            Self::Sector => "Sector",
            Self::Roa => "ROA",
            Self::Niat => "NIAT",
            Self::Esg => "ESG_Score",
            Self::Environmental => "Environmental_Score",
            Self::Social => "Social_Score",
            Self::Governance => "Governance_Score",
            Self::Employees => "Employees",
            Self::Debt => "Debt",
            Self::Assets => "Assets",
        }
    }

    /// Whether the field holds labels rather than numbers.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Firm | Self::Sector)
    }

    fn default_aliases(self) -> &'static [&'static str] {
        match self {
            Self::Firm => &[
                "Company_Code",
                "Company",
                "Firm",
                "Organisation",
                "Organization",
                "Org",
                "GVKEY",
                "Ticker",
                "ISIN",
                "CompanyName",
            ],
            Self::Year => &["Year", "FY", "FiscalYear", "Fiscal_Year", "fyear"],
            Self::Sector => &[
                "Sector",
                "Industry",
                "GICS",
                "GICS_Sector",
                "SIC_Desc",
                "Subsector",
                "Sub-industry",
            ],
            Self::Roa => &["ROA", "Return_on_Assets", "ReturnOnAssets"],
            Self::Niat => &["NIAT", "Net_Income_After_Tax", "NetIncome", "NI"],
            Self::Esg => &["ESG_Score", "ESG", "ESGTotal", "ESGCombined", "Refinitiv_ESG"],
            Self::Environmental => &["Environmental_Score", "Environmental", "Env_Score", "Env"],
            Self::Social => &["Social_Score", "Social", "Soc_Score", "Soc"],
            Self::Governance => &["Governance_Score", "Governance", "Gov_Score", "Gov"],
            Self::Employees => &["Employees", "EmployeeCount", "Headcount"],
            Self::Debt => &["Debt", "TotalDebt", "Total_Debt", "Leverage"],
            Self::Assets => &["Assets", "TotalAssets", "Total_Assets"],
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// A required logical field could not be matched against any header.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColumnError {
    #[error(
        "No column found for '{field}'. Tried aliases: [{}]. Available headers: [{}]",
        .aliases.iter().join(", "),
        .headers.iter().join(", ")
    )]
    NotFound {
        field: LogicalField,
        aliases: Vec<String>,
        headers: Vec<String>,
    },
}

/// Declarative mapping from logical field to its ordered aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable(BTreeMap<LogicalField, Vec<String>>);

impl Default for AliasTable {
    fn default() -> Self {
        Self(
            LogicalField::ALL
                .iter()
                .map(|&field| {
                    let aliases = field
                        .default_aliases()
                        .iter()
                        .map(|alias| alias.to_string())
                        .collect();
                    (field, aliases)
                })
                .collect(),
        )
    }
}

impl AliasTable {
    /// Aliases for `field`; falls back to the canonical name when the table
    /// was loaded from a configuration that omits the field.
    pub fn aliases(&self, field: LogicalField) -> Vec<String> {
        match self.0.get(&field) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => vec![field.canonical().to_string()],
        }
    }

    /// Replaces the alias list for one field.
    pub fn set(&mut self, field: LogicalField, aliases: Vec<String>) {
        self.0.insert(field, aliases);
    }

    /// Resolves every field that can be matched. Unmatched fields are simply
    /// absent from the result; callers decide which ones are required.
    pub fn resolve(&self, headers: &[String]) -> ResolvedColumns {
        let mut found: BTreeMap<LogicalField, String> = BTreeMap::new();
        for pass in [Pass::Exact, Pass::Normalised, Pass::Substring] {
            for field in LogicalField::ALL {
                if found.contains_key(&field) {
                    continue;
                }
                let open: Vec<&String> = headers
                    .iter()
                    .filter(|header| !found.values().any(|claimed| claimed == *header))
                    .collect();
                if let Some(header) = match_alias(&open, &self.aliases(field), pass) {
                    found.insert(field, header);
                }
            }
        }
        ResolvedColumns {
            found,
            headers: headers.to_vec(),
            aliases: self.clone(),
        }
    }
}

/// The outcome of matching headers against the alias table.
#[derive(Debug, Clone)]
pub struct ResolvedColumns {
    found: BTreeMap<LogicalField, String>,
    headers: Vec<String>,
    aliases: AliasTable,
}

impl ResolvedColumns {
    /// The source header that matched `field`, if any.
    pub fn get(&self, field: LogicalField) -> Option<&str> {
        self.found.get(&field).map(String::as_str)
    }

    pub fn require(&self, field: LogicalField) -> Result<&str, ColumnError> {
        self.get(field).ok_or_else(|| ColumnError::NotFound {
            field,
            aliases: self.aliases.aliases(field),
            headers: self.headers.clone(),
        })
    }

    /// Fields that resolved, in declaration order, with their source headers.
    pub fn iter(&self) -> impl Iterator<Item = (LogicalField, &str)> {
        self.found.iter().map(|(field, header)| (*field, header.as_str()))
    }
}

fn normalise(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Exact,
    Normalised,
    Substring,
}

fn match_alias(headers: &[&String], aliases: &[String], pass: Pass) -> Option<String> {
    let hit = match pass {
        Pass::Exact => aliases
            .iter()
            .find_map(|alias| headers.iter().find(|h| h.eq_ignore_ascii_case(alias))),
        Pass::Normalised => aliases
            .iter()
            .map(|alias| normalise(alias))
            .filter(|key| !key.is_empty())
            .find_map(|key| headers.iter().find(|h| normalise(h) == key)),
        Pass::Substring => headers.iter().find(|header| {
            let lowered = header.to_lowercase();
            aliases
                .iter()
                .any(|alias| !alias.is_empty() && lowered.contains(&alias.to_lowercase()))
        }),
    };
    hit.map(|header| header.to_string())
}
