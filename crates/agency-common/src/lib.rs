pub mod api;
pub mod error;
pub mod policy;

pub use error::{CommonError, CommonResult};
pub use policy::{PolicyName, RatePolicy};
