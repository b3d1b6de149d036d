pub mod otp_reader;

pub use otp_reader::*;
