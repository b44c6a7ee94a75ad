mod health;
mod home;

pub use health::{HealthResponse, health_check};
pub use home::{count, home};
