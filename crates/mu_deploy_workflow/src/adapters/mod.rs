pub mod aws;
pub mod cloudformation;
pub mod elb;
pub mod memory;
pub mod params;
pub mod rules;
pub mod ssm;
pub mod stack;
