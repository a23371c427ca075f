//! tempmail: disposable mailboxes with a tolerant inbound mail pipeline.

pub mod api;
pub mod config;
pub mod display;
pub mod edge;
pub mod error;
pub mod ingest;
pub mod mailbox;
pub mod mime;
pub mod retention;
pub mod store;
