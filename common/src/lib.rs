pub mod config;
pub mod plot;
pub mod results;
pub mod util;
