pub mod constants;
pub mod der;
pub mod raw_message;
