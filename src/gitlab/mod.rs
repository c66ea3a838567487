mod api;
mod client;
mod pagination;
mod transport;

pub use api::*;
pub use client::*;
pub use pagination::*;
pub use transport::*;
