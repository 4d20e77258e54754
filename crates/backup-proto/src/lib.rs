mod errors;
pub mod proto;

pub use errors::ControlError;

pub const PROTOCOL_VERSION: u32 = 1;
