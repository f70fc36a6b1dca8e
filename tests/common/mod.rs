pub mod builders;
pub mod fakes;

// Re-export commonly used test utilities
pub use fakes::init_tracing;
