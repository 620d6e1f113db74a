mod registry;
mod server;

pub use registry::TrackerRegistry;
pub use server::spawn_tracker_server;
