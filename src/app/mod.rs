pub mod engagement;
pub mod feed;
pub mod notify;
pub mod optimistic;
pub mod posts;
pub mod store;
