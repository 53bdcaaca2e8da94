pub mod cache;

pub use cache::MissingIndexCache;
