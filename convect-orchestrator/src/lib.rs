// Library entry point for tests and external usage

pub mod api;
pub mod audit;
pub mod boot_source;
pub mod lifecycle;
pub mod migrations;
pub mod poll;
pub mod precreate;
pub mod provision;
pub mod request;
pub mod store;
