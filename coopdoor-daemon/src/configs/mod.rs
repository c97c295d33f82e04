mod open_cap;
mod settings;

pub use open_cap::OpenCap;
pub use settings::{Channel, Device, Link, LinkMode, Logger, Paths, Settings, Transport};
