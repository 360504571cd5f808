pub mod cost;
pub mod sampler;

pub use cost::{CostController, CostControllerConfig, Enforcement};
pub use sampler::{AdaptiveSampler, Decision, SamplerConfig};
