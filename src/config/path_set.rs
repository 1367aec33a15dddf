use crate::error::ConfigError;
use std::fmt;
use std::sync::Arc;

/// Immutable, ordered list of filesystem paths to measure
///
/// Built once at startup and handed to the collector. Clones share the
/// same backing slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    paths: Arc<[String]>,
}

impl PathSet {
    /// Create a path set from configured paths
    ///
    /// # Arguments
    ///
    /// * `paths` - Paths in measurement order; duplicates are kept
    ///
    /// # Returns
    ///
    /// A `PathSet` preserving the given order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the list is empty or any
    /// entry is blank.
    pub fn new<I, S>(paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();

        if paths.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one path to monitor is required".to_string(),
            ));
        }
        if let Some(position) = paths.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "monitored path #{} is empty",
                position + 1
            )));
        }

        Ok(Self {
            paths: paths.into(),
        })
    }

    /// Iterate over the paths in the order they will be measured
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl fmt::Display for PathSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.paths.join(", "))
    }
}
