pub mod fetch;
pub mod metrics;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
