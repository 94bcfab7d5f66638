pub mod engine;
pub mod entity;
pub mod kernel;
pub mod objects;
pub mod sequence;
pub mod worker;

pub fn version() -> &'static str {
    "0.1.0"
}
