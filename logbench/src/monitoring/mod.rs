pub mod metrics;
pub mod sampler;

pub use metrics::{CycleParser, MetricEvent, MetricRecord, ParseAnomaly, Parsed, FIELD_ORDER};
pub use sampler::{MetricsSampler, SamplerCommand, SamplerStats};
