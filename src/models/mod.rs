// SpiritStream Failover Models
// Data structures for channels, destinations and configuration

mod destination;
mod channel;
mod error;
mod template;
mod settings;

pub use destination::*;
pub use channel::*;
pub use error::*;
pub use template::*;
pub use settings::*;
