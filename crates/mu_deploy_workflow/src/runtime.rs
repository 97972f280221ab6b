pub use mu_deploy_core::{contract, naming, priority, service};
