//! Shared service deployment domain primitives.
//!
//! This crate owns stack naming, the stack/rule/parameter data model, and the
//! listener-rule priority arithmetic. It intentionally excludes AWS SDK and
//! async runtime concerns; those live in `mu_deploy_workflow`.

pub mod contract;
pub mod naming;
pub mod priority;
pub mod service;
