pub mod context;
pub mod engine;
pub mod handlers;
pub mod outcome;
pub mod relations;
pub mod summary;

pub use engine::Reconciler;
