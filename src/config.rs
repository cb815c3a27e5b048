// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attribution configuration.
//!
//! [`AttributionConfig`] is read once at startup and handed to the
//! attributors at construction; nothing re-reads it per call.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |---|---|
//! | `attribute_include_query` | `"False"` drops the query terms; anything else (or unset) keeps them |
//! | `force_cpu` | `"True"` runs the embedding model on CPU |
//! | `attribute_llm` | embedding model id (defaults to [`DEFAULT_EMBEDDING_MODEL`]) |
//!
//! ```
//! use candle_attrib::AttributionConfig;
//!
//! let config = AttributionConfig::from_lookup(|key| match key {
//!     "attribute_include_query" => Some("False".to_owned()),
//!     _ => None,
//! });
//! assert!(!config.include_query);
//! assert!(!config.force_cpu);
//! ```

use std::fmt;

/// Environment variable toggling the query terms.
pub const ENV_INCLUDE_QUERY: &str = "attribute_include_query";
/// Environment variable forcing CPU execution.
pub const ENV_FORCE_CPU: &str = "force_cpu";
/// Environment variable naming the embedding model.
pub const ENV_EMBEDDING_MODEL: &str = "attribute_llm";
/// Embedding model used when [`ENV_EMBEDDING_MODEL`] is unset.
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Options shared by both attributors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Add query-to/from-document terms to each document's raw score.
    pub include_query: bool,
    /// Run the embedding model on CPU even if an accelerator is present.
    pub force_cpu: bool,
    /// `HuggingFace` model id (or local directory) of the embedding model.
    pub embedding_model_name: String,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            include_query: true,
            force_cpu: false,
            embedding_model_name: DEFAULT_EMBEDDING_MODEL.to_owned(),
        }
    }
}

impl AttributionConfig {
    /// Read the configuration from process environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup, using the same
    /// rules as [`from_env`](Self::from_env).
    ///
    /// Flag values are compared exactly: only `"False"` disables the query
    /// terms and only `"True"` forces CPU.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let include_query = lookup(ENV_INCLUDE_QUERY).as_deref() != Some("False");
        let force_cpu = lookup(ENV_FORCE_CPU).as_deref() == Some("True");
        let embedding_model_name =
            lookup(ENV_EMBEDDING_MODEL).unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_owned());
        Self {
            include_query,
            force_cpu,
            embedding_model_name,
        }
    }

    /// Set whether query terms are included.
    #[must_use]
    pub fn with_include_query(mut self, include_query: bool) -> Self {
        self.include_query = include_query;
        self
    }

    /// Set whether the embedding model is forced onto the CPU.
    #[must_use]
    pub fn with_force_cpu(mut self, force_cpu: bool) -> Self {
        self.force_cpu = force_cpu;
        self
    }

    /// Set the embedding model id.
    #[must_use]
    pub fn with_embedding_model(mut self, name: impl Into<String>) -> Self {
        self.embedding_model_name = name.into();
        self
    }
}

impl fmt::Display for AttributionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "include_query={} force_cpu={} embedding_model={}",
            self.include_query, self.force_cpu, self.embedding_model_name
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn unset_means_defaults() {
        let config = AttributionConfig::from_lookup(|_| None);
        assert_eq!(config, AttributionConfig::default());
        assert!(config.include_query);
        assert!(!config.force_cpu);
        assert_eq!(config.embedding_model_name, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn only_exact_false_disables_query() {
        for (value, expected) in [
            ("False", false),
            ("false", true),
            ("0", true),
            ("", true),
            ("True", true),
        ] {
            let config = AttributionConfig::from_lookup(lookup_from(&[(ENV_INCLUDE_QUERY, value)]));
            assert_eq!(config.include_query, expected, "value {value:?}");
        }
    }

    #[test]
    fn only_exact_true_forces_cpu() {
        for (value, expected) in [("True", true), ("true", false), ("1", false)] {
            let config = AttributionConfig::from_lookup(lookup_from(&[(ENV_FORCE_CPU, value)]));
            assert_eq!(config.force_cpu, expected, "value {value:?}");
        }
    }

    #[test]
    fn model_name_from_lookup() {
        let config = AttributionConfig::from_lookup(lookup_from(&[(
            ENV_EMBEDDING_MODEL,
            "BAAI/bge-small-en-v1.5",
        )]));
        assert_eq!(config.embedding_model_name, "BAAI/bge-small-en-v1.5");
    }

    #[test]
    fn builder_setters() {
        let config = AttributionConfig::default()
            .with_include_query(false)
            .with_force_cpu(true)
            .with_embedding_model("local/model");
        assert!(!config.include_query);
        assert!(config.force_cpu);
        assert_eq!(
            config.to_string(),
            "include_query=false force_cpu=true embedding_model=local/model"
        );
    }

    #[test]
    fn deserialize_fills_missing_fields() {
        let config: AttributionConfig =
            serde_json::from_str(r#"{"include_query": false}"#).unwrap();
        assert!(!config.include_query);
        assert_eq!(config.embedding_model_name, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    #[serial_test::serial]
    #[allow(unsafe_code)]
    fn from_env_reads_process_environment() {
        // SAFETY: serialized with every other test touching these variables.
        unsafe {
            std::env::set_var(ENV_INCLUDE_QUERY, "False");
            std::env::set_var(ENV_FORCE_CPU, "True");
            std::env::remove_var(ENV_EMBEDDING_MODEL);
        }
        let config = AttributionConfig::from_env();
        // SAFETY: as above.
        unsafe {
            std::env::remove_var(ENV_INCLUDE_QUERY);
            std::env::remove_var(ENV_FORCE_CPU);
        }
        assert!(!config.include_query);
        assert!(config.force_cpu);
        assert_eq!(config.embedding_model_name, DEFAULT_EMBEDDING_MODEL);
    }
}
