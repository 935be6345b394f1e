pub mod fleet_progress;
pub mod icons;

pub use fleet_progress::{FleetUI, UiMode};
