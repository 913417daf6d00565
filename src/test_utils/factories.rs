//! Test data factories. Each returns a valid object; the closure overrides fields.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    application::{
        jwt::Caller,
        use_cases::subscription_payments::{PaymentSettings, SubscriberProfile, TierProfile},
        validators::CallbackAllowList,
    },
    domain::entities::user_role::{TierType, UserRole},
};

pub const TEST_CALLBACK_ORIGIN: &str = "https://app.gymhub.test";

pub fn create_test_tier(overrides: impl FnOnce(&mut TierProfile)) -> TierProfile {
    let mut tier = TierProfile {
        id: Uuid::new_v4(),
        name: "Standard".to_string(),
        tier_type: TierType::User,
        price_monthly: Decimal::new(10_000, 2),
        duration_days: None,
        is_active: true,
    };
    overrides(&mut tier);
    tier
}

pub fn create_test_subscriber(overrides: impl FnOnce(&mut SubscriberProfile)) -> SubscriberProfile {
    let id = Uuid::new_v4();
    let mut subscriber = SubscriberProfile {
        id,
        email: format!("member-{}@gymhub.test", id.simple()),
        role: UserRole::GymUser,
        current_subscription_tier_id: None,
    };
    overrides(&mut subscriber);
    subscriber
}

pub fn create_test_caller(user_id: Uuid, role: UserRole) -> Caller {
    Caller { user_id, role }
}

pub fn test_payment_settings() -> PaymentSettings {
    PaymentSettings {
        currency: "GHS".to_string(),
        channels: vec!["card".to_string(), "mobile_money".to_string()],
        callback_allow_list: CallbackAllowList::parse(TEST_CALLBACK_ORIGIN),
        pending_threshold_hours: 24,
        default_duration_days: 30,
    }
}
