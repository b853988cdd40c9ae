pub mod paths;
pub mod v1;

pub use v1::create_router;
