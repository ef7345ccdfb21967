//! Build metadata embedded by `build.rs`

use std::fmt;

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    git_dirty: &'static str,
    pub built_at: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("CHATLINK_GIT_HASH"),
            git_dirty: env!("CHATLINK_GIT_DIRTY"),
            built_at: env!("CHATLINK_BUILD_TIMESTAMP"),
            target: env!("CHATLINK_TARGET"),
            profile: env!("CHATLINK_PROFILE"),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// `0.1.0-abcd1234`, with `-dirty` appended for modified trees
    pub fn full_version(&self) -> String {
        let mut v = format!("{}-{}", self.version, self.git_hash);
        if self.is_dirty() {
            v.push_str("-dirty");
        }
        v
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f, "  built:   {}", self.built_at)?;
        writeln!(f, "  target:  {}", self.target)?;
        writeln!(f, "  profile: {}", self.profile)
    }
}
