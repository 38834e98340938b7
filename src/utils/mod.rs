pub mod stream;
pub mod validation;
