pub mod message;
pub mod socket;
