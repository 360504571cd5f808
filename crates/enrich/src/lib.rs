pub mod correlator;
pub mod plan;

pub use correlator::{BlockingPoint, BlockingSample, CorrelatorConfig, QueryCorrelator, WaitEventSample, WaitProfilePoint};
pub use plan::{PlanChangeEvent, PlanChangeSeverity, PlanExtractor, PlanExtractorConfig};
