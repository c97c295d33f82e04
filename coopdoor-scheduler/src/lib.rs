pub mod configs;
pub mod engine;
pub mod errors;
pub mod fire;
pub mod installer;
pub mod resolver;
pub mod store;
