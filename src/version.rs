//! Build identification from Cargo and the git checkout.

use std::fmt;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What was built, and from which commit when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub branch: Option<&'static str>,
    pub commit: Option<&'static str>,
    pub dirty: bool,
}

impl BuildInfo {
    /// Info for this build. Git fields are `None` outside a git checkout.
    pub fn current() -> Self {
        Self {
            version: PKG_VERSION,
            branch: option_env!("VERGEN_GIT_BRANCH"),
            commit: option_env!("VERGEN_GIT_SHA"),
            dirty: option_env!("VERGEN_GIT_DIRTY") == Some("true"),
        }
    }

    /// Commit abbreviated to 7 characters.
    pub fn short_commit(&self) -> Option<&'static str> {
        self.commit.map(|sha| sha.get(..7).unwrap_or(sha))
    }
}

/// `{version}`, or `{version}+{branch}.{commit}[.dirty]` when git info
/// was captured.
impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version)?;
        if let (Some(branch), Some(commit)) = (self.branch, self.short_commit()) {
            write!(f, "+{branch}.{commit}")?;
            if self.dirty {
                f.write_str(".dirty")?;
            }
        }
        Ok(())
    }
}

/// Version string for logs and `--version` banners.
pub fn version_string() -> String {
    BuildInfo::current().to_string()
}
