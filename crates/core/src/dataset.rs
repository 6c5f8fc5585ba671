use std::fmt;

use zfs_io::Location;

/// Joins a pool and a dataset path.
///
/// A path that already names the pool (`tank` or `tank/...`) is used as is;
/// anything else is placed under the pool. Surrounding slashes are ignored.
#[must_use]
pub fn join_pool_path(pool: &str, path: &str) -> String {
    let pool = pool.trim_matches('/');
    let path = path.trim_matches('/');

    if path.is_empty() {
        return pool.to_owned();
    }
    if pool.is_empty() || path == pool || path.starts_with(&format!("{pool}/")) {
        return path.to_owned();
    }
    format!("{pool}/{path}")
}

/// A dataset and the machine it lives on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    name: String,
    location: Location,
}

impl Dataset {
    /// Creates a dataset from its pool and path.
    #[must_use]
    pub fn new(pool: &str, path: &str, location: Location) -> Self {
        Self::named(join_pool_path(pool, path), location)
    }

    /// Creates a dataset from its full name.
    pub fn named(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }

    /// Full dataset name (`pool/path`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where commands for this dataset execute.
    #[must_use]
    pub const fn location(&self) -> &Location {
        &self.location
    }

    /// Full name of the snapshot `suffix` of this dataset.
    #[must_use]
    pub fn snapshot(&self, suffix: &str) -> String {
        format!("{}@{suffix}", self.name)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location.remote() {
            None => f.write_str(&self.name),
            Some(remote) => write!(f, "{}:{}", remote.host(), self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zfs_io::RemoteHost;

    #[test]
    fn path_is_placed_under_pool() {
        assert_eq!(join_pool_path("tank", "data"), "tank/data");
        assert_eq!(join_pool_path("backup", "/nas01/data/"), "backup/nas01/data");
    }

    #[test]
    fn path_already_naming_pool_is_verbatim() {
        assert_eq!(join_pool_path("tank", "tank/data"), "tank/data");
        assert_eq!(join_pool_path("tank", "tank"), "tank");
    }

    #[test]
    fn prefix_must_match_whole_component() {
        assert_eq!(join_pool_path("tank", "tankdata"), "tank/tankdata");
    }

    #[test]
    fn empty_path_is_the_pool() {
        assert_eq!(join_pool_path("tank", ""), "tank");
        assert_eq!(join_pool_path("", "tank/data"), "tank/data");
    }

    #[test]
    fn snapshot_names_use_at_separator() {
        let dataset = Dataset::new("tank", "data", Location::Local);
        assert_eq!(dataset.snapshot("daily-2024.05.01-00.00.00"), "tank/data@daily-2024.05.01-00.00.00");
    }

    #[test]
    fn display_includes_remote_host() {
        let dataset = Dataset::new(
            "backup",
            "data",
            Location::Remote(RemoteHost::new("root", "nas02", 22)),
        );
        assert_eq!(dataset.to_string(), "nas02:backup/data");
        assert_eq!(Dataset::named("tank/a", Location::Local).to_string(), "tank/a");
    }
}
