pub mod releaser;

pub use releaser::*;
