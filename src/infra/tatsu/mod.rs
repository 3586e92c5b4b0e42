pub mod tatsu_client;

pub use tatsu_client::TatsuClient;
