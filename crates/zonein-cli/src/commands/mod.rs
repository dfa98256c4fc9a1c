pub mod classify;
pub mod helpers;
pub mod history;
pub mod monitor;
pub mod rules;
pub mod transport;
