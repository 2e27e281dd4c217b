pub mod decode;
pub mod features;
#[cfg(feature = "live")]
pub mod live;
pub mod source;
