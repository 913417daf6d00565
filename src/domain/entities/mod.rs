pub mod checkin_status;
pub mod money;
pub mod payment_audit;
pub mod payment_status;
pub mod reconciliation_status;
pub mod subscription_status;
pub mod user_role;
