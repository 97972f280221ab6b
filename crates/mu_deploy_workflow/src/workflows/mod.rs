pub mod deployer;
pub mod environment;
pub mod params;
pub mod pipeline;
pub mod priority;
pub mod state;
pub mod waiter;
