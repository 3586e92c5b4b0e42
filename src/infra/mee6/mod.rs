pub mod mee6_client;

pub use mee6_client::Mee6Client;
