pub mod capture_delegate;
pub mod pipeline_backend;
