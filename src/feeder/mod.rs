pub mod bucket;
pub mod config;
pub mod destination;
pub mod directory;
pub mod lock;
pub mod metadata;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod share;
pub mod stats;
pub mod upsert;
pub mod util;
pub mod warn;
pub mod window;

#[cfg(test)]
pub mod testing;
