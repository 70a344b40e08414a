pub mod csv_log;
pub mod record;
mod service;

pub use service::Poller;
