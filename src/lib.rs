// SpiritStream Failover
// Multi-destination relay channels with primary/backup failover

pub mod models;
pub mod services;
