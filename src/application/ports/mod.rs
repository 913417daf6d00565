pub mod face_matcher;
pub mod payment_gateway;
