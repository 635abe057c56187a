pub mod channel;
pub mod correlator;
pub mod protocol;
pub mod transports;
