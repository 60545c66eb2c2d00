pub mod debt;
pub mod models;
pub mod money;
pub mod session;
pub mod validation;
