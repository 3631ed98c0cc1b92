//service/mod.rs
pub mod completion_worker;
