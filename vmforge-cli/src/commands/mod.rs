pub mod build;
pub mod validate;
pub mod version;
