use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle of a user's entitlement to a tier.
///
/// `PastDue` is part of the machine but only a renewal job would produce it.
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
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SubscriptionStatus {
    #[default]
    Pending,
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status holds the per-user active/pending uniqueness slot.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, SubscriptionStatus::Pending | SubscriptionStatus::Active)
    }

    pub fn valid_transitions(&self) -> &'static [SubscriptionStatus] {
        match self {
            SubscriptionStatus::Pending => {
                &[SubscriptionStatus::Active, SubscriptionStatus::Cancelled]
            }
            SubscriptionStatus::Active => {
                &[SubscriptionStatus::PastDue, SubscriptionStatus::Cancelled]
            }
            SubscriptionStatus::PastDue => {
                &[SubscriptionStatus::Active, SubscriptionStatus::Cancelled]
            }
            SubscriptionStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SubscriptionStatus::Pending.can_transition_to(SubscriptionStatus::Active));
        assert!(SubscriptionStatus::Pending.can_transition_to(SubscriptionStatus::Cancelled));
        assert!(!SubscriptionStatus::Pending.can_transition_to(SubscriptionStatus::PastDue));

        assert!(SubscriptionStatus::Active.can_transition_to(SubscriptionStatus::PastDue));
        assert!(!SubscriptionStatus::Active.can_transition_to(SubscriptionStatus::Pending));

        assert!(SubscriptionStatus::PastDue.can_transition_to(SubscriptionStatus::Active));
        assert!(SubscriptionStatus::Cancelled.valid_transitions().is_empty());
    }

    #[test]
    fn only_pending_and_active_hold_the_slot() {
        assert!(SubscriptionStatus::Pending.occupies_slot());
        assert!(SubscriptionStatus::Active.occupies_slot());
        assert!(!SubscriptionStatus::PastDue.occupies_slot());
        assert!(!SubscriptionStatus::Cancelled.occupies_slot());
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "past_due".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::PastDue
        );
        assert_eq!(SubscriptionStatus::Cancelled.as_ref(), "cancelled");
        assert!("canceled".parse::<SubscriptionStatus>().is_err());
    }
}
