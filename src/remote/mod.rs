pub mod api;
pub mod fetcher;
pub mod types;

pub use api::BacklogApi;
pub use fetcher::{FetchError, FetchOptions, PaginatedFetcher};
pub use types::*;
