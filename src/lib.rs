pub mod aggregate;
pub mod backend;
pub mod calendar;
pub mod completion;
pub mod config;
pub mod domain;
pub mod logging;
pub mod storage;
pub mod toggle;
