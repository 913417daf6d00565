pub mod checkin;
pub mod reconciliation;
pub mod subscription_payments;
