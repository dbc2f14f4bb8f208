// =============================================================================
// Collection Module
// =============================================================================
//
// Fixed-cadence sampling of the order book into a `SnapshotSeries`.

pub mod sampler;
pub mod schedule;

pub use sampler::{CollectionSummary, Sampler, SamplerSettings};
