pub mod batch;
pub mod sync;
pub mod versions;
