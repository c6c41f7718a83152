use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four academic tracks, each backed by its own table family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Program {
    #[serde(rename = "PGP")]
    Pgp,
    #[serde(rename = "PhD")]
    Phd,
    #[serde(rename = "EPhD")]
    Ephd,
    #[serde(rename = "EMBA")]
    Emba,
}

impl Program {
    pub const ALL: [Program; 4] = [Program::Pgp, Program::Phd, Program::Ephd, Program::Emba];

    pub fn label(self) -> &'static str {
        match self {
            Program::Pgp => "PGP",
            Program::Phd => "PhD",
            Program::Ephd => "EPhD",
            Program::Emba => "EMBA",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Program::Pgp => "pgp",
            Program::Phd => "phd",
            Program::Ephd => "ephd",
            Program::Emba => "emba",
        }
    }

    /// Prefix shared by `<prefix>_application`, `<prefix>_slot`,
    /// `<prefix>_slot_student` and `<prefix>_registered`.
    pub fn table_prefix(self) -> &'static str {
        match self {
            Program::Pgp => "iim_pgpmci",
            Program::Phd => "iim_phd",
            Program::Ephd => "iim_ephd",
            Program::Emba => "iim_emba",
        }
    }

    pub fn table(self, suffix: &str) -> String {
        format!("{}_{}", self.table_prefix(), suffix)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown program `{0}`; expected one of pgp, phd, ephd, emba")]
pub struct UnknownProgram(pub String);

impl FromStr for Program {
    type Err = UnknownProgram;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pgp" | "pgpmci" => Ok(Program::Pgp),
            "phd" => Ok(Program::Phd),
            "ephd" | "executive-phd" => Ok(Program::Ephd),
            "emba" => Ok(Program::Emba),
            _ => Err(UnknownProgram(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortlistStatus {
    Pending,
    Shortlisted,
    Rejected,
}

impl ShortlistStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ShortlistStatus::Pending => "pending",
            ShortlistStatus::Shortlisted => "shortlisted",
            ShortlistStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    VerificationPending,
    Verified,
}

impl ProgressStatus {
    pub const ALL: [ProgressStatus; 5] = [
        ProgressStatus::NotStarted,
        ProgressStatus::InProgress,
        ProgressStatus::Completed,
        ProgressStatus::VerificationPending,
        ProgressStatus::Verified,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::VerificationPending => "verification_pending",
            ProgressStatus::Verified => "verified",
        }
    }
}
