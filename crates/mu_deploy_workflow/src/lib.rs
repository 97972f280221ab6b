//! Service deployment pipeline for mu environments.
//!
//! Collaborator traits and their CloudFormation, ELBv2 and SSM
//! implementations live in `adapters`; the poll loop and the ordered deploy
//! steps live in `workflows`. Naming, stack contract and priority primitives
//! from `mu_deploy_core` are reachable through `runtime`.

pub mod adapters;
pub mod config;
pub mod error;
pub mod runtime;
pub mod workflows;
