pub mod influx;
pub mod mapping;
pub mod point;
pub mod relay;
pub mod rtl433;
