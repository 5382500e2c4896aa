pub mod checkpoint;
pub mod error;
pub mod event;
pub mod feed;
pub mod output;
pub mod sink;
pub mod window;
