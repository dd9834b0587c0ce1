pub mod api;
pub mod config;
pub mod mtbfile;
pub mod prometheus;
pub mod pseudonym;
pub mod record;
pub mod retry;
pub mod router;
pub mod server;
pub mod sinks;
pub mod time;
