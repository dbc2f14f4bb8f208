//! Persistence: snapshot datasets as CSV, test results as JSON.

pub mod dataset;
pub mod keyed;
pub mod results;

pub use dataset::{find_latest_dataset, load_dataset, save_dataset};
pub use results::{load_results, save_results, EFFICIENCY_DOCUMENT, IMBALANCE_DOCUMENT};
