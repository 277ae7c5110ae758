//! Partition naming for a cache generation.

/// Names the two partitions of one cache generation.
///
/// Partitions are `{prefix}-shell-{generation}` and `{prefix}-api-{generation}`,
/// so the activation cleanup can tell current from stale partitions by name
/// alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespace {
  prefix: String,
  generation: String,
}

impl CacheNamespace {
  pub fn new(prefix: impl Into<String>, generation: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      generation: generation.into(),
    }
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  /// The generation tag (e.g. "v2")
  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Static shell/asset partition
  pub fn shell(&self) -> String {
    format!("{}-shell-{}", self.prefix, self.generation)
  }

  /// API response partition
  pub fn api(&self) -> String {
    format!("{}-api-{}", self.prefix, self.generation)
  }

  /// Whether `name` is one of this generation's partitions
  pub fn is_current(&self, name: &str) -> bool {
    name == self.shell() || name == self.api()
  }

  /// Whether `name` was produced by any generation of this namespace
  pub fn owns(&self, name: &str) -> bool {
    name
      .strip_prefix(&self.prefix)
      .is_some_and(|rest| rest.starts_with("-shell-") || rest.starts_with("-api-"))
  }
}
