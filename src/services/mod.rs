pub mod health;
pub mod poller;
pub mod reaper;

pub use health::HealthService;
pub use poller::{AvailabilityPoller, PollerService};
pub use reaper::ReaperService;
