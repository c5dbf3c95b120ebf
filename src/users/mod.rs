mod dto;
pub mod handlers;
pub mod services;

pub use dto::Pagination;
