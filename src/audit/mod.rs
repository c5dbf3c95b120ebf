pub mod handlers;
mod services;

pub use services::record;
