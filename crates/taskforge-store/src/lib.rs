mod decompose;
mod paths;
mod persist;
mod store;

pub use decompose::{decompose, DecomposeProposal, DecomposeRisk};
pub use paths::StorePaths;
pub use persist::{atomic_write_json, read_json};
pub use store::Store;
