pub mod host;
pub mod logging;
pub mod simulated;
