mod image_codec;
mod routes;
mod server;
mod tally;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
