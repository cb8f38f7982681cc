pub mod feed;
pub mod item;

pub use feed::{CacheHeaders, Feed, FeedErrorClass, FeedUpdate};
pub use item::Item;
