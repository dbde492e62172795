pub mod feed_sync;
