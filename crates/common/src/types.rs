//! Shared domain types for the cache-building pipeline.

use serde::{Deserialize, Serialize};

/// An RxNorm concept identifier.
pub type Rxcui = i64;

/// Term types counted as ingredients.
pub const INGREDIENT_TTYS: &[&str] = &["IN", "MIN", "PIN"];

/// Term types counted as drugs (clinical/branded drugs and packs).
pub const DRUG_TTYS: &[&str] = &["SCD", "SBD", "GPCK", "BPCK"];

/// Status categories the history endpoint partitions the code universe by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeStatus {
    Active,
    Retired,
    NeverActive,
    NonRxnorm,
}

impl CodeStatus {
    /// All categories, in the order the enumeration phase fetches them.
    pub const ALL: &'static [CodeStatus] = &[
        CodeStatus::Active,
        CodeStatus::Retired,
        CodeStatus::NeverActive,
        CodeStatus::NonRxnorm,
    ];

    /// The RxNorm categories, i.e. everything except NON-RXNORM.
    pub const RXNORM: &'static [CodeStatus] = &[
        CodeStatus::Active,
        CodeStatus::Retired,
        CodeStatus::NeverActive,
    ];

    /// The literal `type=` value the status endpoint expects.
    pub fn query_value(self) -> &'static str {
        match self {
            CodeStatus::Active => "ACTIVE",
            CodeStatus::Retired => "RETIRED",
            CodeStatus::NeverActive => "NEVER%20ACTIVE",
            CodeStatus::NonRxnorm => "NON-RXNORM",
        }
    }
}

impl std::fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CodeStatus::Active => "ACTIVE",
            CodeStatus::Retired => "RETIRED",
            CodeStatus::NeverActive => "NEVER ACTIVE",
            CodeStatus::NonRxnorm => "NON-RXNORM",
        };
        f.write_str(label)
    }
}

/// Message sent to the cache writer task.
///
/// Workers only ever produce `Write`; the orchestrator sends exactly one
/// `Stop` once every phase has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMessage {
    Write { key: String, payload: String },
    Stop,
}

/// One remote operation a worker performs per code in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOp {
    AllRelated,
    ConceptHistory,
    NdcCodes,
}

/// Typed projection of the history endpoint's concept record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptHistory {
    pub rxcui: Rxcui,
    pub name: String,
    pub tty: String,
    pub status: String,
    pub start_date: String,
    pub end_date: String,
    /// Generic (SCD) counterpart, when the concept has one.
    pub scd_rxcui: Option<Rxcui>,
    /// Basis-of-strength substance codes.
    pub boss_rxcuis: Vec<Rxcui>,
}

impl ConceptHistory {
    pub fn is_drug(&self) -> bool {
        DRUG_TTYS.contains(&self.tty.as_str())
    }

    pub fn is_ingredient(&self) -> bool {
        INGREDIENT_TTYS.contains(&self.tty.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_query_values() {
        assert_eq!(CodeStatus::Active.query_value(), "ACTIVE");
        assert_eq!(CodeStatus::NeverActive.query_value(), "NEVER%20ACTIVE");
        assert_eq!(CodeStatus::NonRxnorm.query_value(), "NON-RXNORM");
    }

    #[test]
    fn test_tty_category_split() {
        let history = ConceptHistory {
            rxcui: 991041,
            name: "Chlorpromazine hydrochloride 10 MG Oral Tablet".into(),
            tty: "SBD".into(),
            status: "Retired".into(),
            start_date: "062010".into(),
            end_date: "022013".into(),
            scd_rxcui: Some(991039),
            boss_rxcuis: vec![104728],
        };
        assert!(history.is_drug());
        assert!(!history.is_ingredient());
    }
}
