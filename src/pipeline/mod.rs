pub mod composite;
pub mod registration;
pub mod search;
pub mod traits;
pub mod types;

pub use composite::Compositor;
pub use registration::{Aligner, FeatureRegistration};
pub use search::{SearchState, SearchStatus, ThresholdGrid, ThresholdSearchController};
pub use traits::ThresholdProbe;
pub use types::*;
