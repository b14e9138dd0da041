pub mod auth;
pub mod google;
pub mod local;

pub use google::DriveDestination;
pub use local::LocalDestination;
