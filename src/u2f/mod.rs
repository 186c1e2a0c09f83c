pub mod device;
pub mod error;
pub mod hid;
pub mod proto;
pub mod store;
pub mod token;
