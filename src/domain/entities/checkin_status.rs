use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

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
#[sqlx(type_name = "checkin_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CheckinStatus {
    /// Row written before the face comparison result is known.
    #[default]
    Provisional,
    Confirmed,
    Rejected,
    Expired,
}

impl CheckinStatus {
    pub fn valid_transitions(&self) -> &'static [CheckinStatus] {
        match self {
            CheckinStatus::Provisional => &[
                CheckinStatus::Confirmed,
                CheckinStatus::Rejected,
                CheckinStatus::Expired,
            ],
            CheckinStatus::Confirmed | CheckinStatus::Rejected | CheckinStatus::Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: CheckinStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}
