//! Identification captured by the build script

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const BUILD_PROFILE: &str = env!("BUILD_PROFILE");

/// One-line description for startup banners
pub fn describe() -> String {
    format!("{} ({}, built {}, {})", VERSION, GIT_HASH, BUILD_TIMESTAMP, BUILD_PROFILE)
}
