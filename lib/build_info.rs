//! Build identity stamped by `build.rs`, reported by `--version`, startup logs and the
//! `sync_build_info` metric.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("LEGISLATIVE_SYNC_GIT_COMMIT_HASH");
pub const BUILD_PROFILE: &str = env!("LEGISLATIVE_SYNC_BUILD_PROFILE");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("LEGISLATIVE_SYNC_GIT_COMMIT_HASH")
);

/// First 12 characters of the commit, or `"unknown"` when git metadata was missing.
pub fn short_commit_hash() -> &'static str {
    GIT_COMMIT_HASH.get(..12).unwrap_or(GIT_COMMIT_HASH)
}
