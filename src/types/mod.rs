pub mod anomaly;
pub mod record;
pub mod summary;
