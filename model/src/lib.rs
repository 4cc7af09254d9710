pub mod config;
pub mod query;
pub mod record;

#[cfg(feature = "testing")]
pub mod testing;
