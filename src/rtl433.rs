mod model;
mod reading;
pub mod syslog;

pub use model::*;
pub use reading::*;
