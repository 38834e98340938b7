pub mod completion;
pub mod dispatcher;
pub mod download;
pub mod permission;
pub mod session;
pub mod staging;
