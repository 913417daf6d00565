use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Follow-up state of an unmatched provider event.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    sqlx::Type,
    AsRefStr,
    Display,
    EnumString,
)]
#[sqlx(type_name = "reconciliation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReconciliationStatus {
    #[default]
    Open,
    Resolved,
    Ignored,
}
