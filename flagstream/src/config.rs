// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! Configuration builders for the pieces assembled by this crate: which data
//! plane transport to run, the big segment manager, hooks, and the metadata
//! tag sent on every connection.

pub use flagstream_transport::{BackoffConfig, PollingConfig, StreamingConfig};

use crate::big_segments::BigSegmentsConfig;

/// Identifies the calling application and SDK to the origin service, sent as
/// request headers on every polling and streaming connection.
#[derive(Debug, Clone, Default)]
pub struct ApplicationTags {
    /// Application identifier, e.g. `"my-service"`.
    pub id: Option<String>,
    /// Application version, e.g. `"1.4.2"`.
    pub version: Option<String>,
}

impl ApplicationTags {
    /// Start building a tag set.
    pub fn builder() -> ApplicationTagsBuilder {
        ApplicationTagsBuilder::default()
    }
}

/// Builder for [`ApplicationTags`].
#[derive(Debug, Clone, Default)]
pub struct ApplicationTagsBuilder {
    tags: ApplicationTags,
}

impl ApplicationTagsBuilder {
    /// Set the application identifier.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.tags.id = Some(id.into());
        self
    }

    /// Set the application version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.tags.version = Some(version.into());
        self
    }

    /// Finish building, producing the [`ApplicationTags`].
    pub fn build(self) -> ApplicationTags {
        self.tags
    }
}

/// Which transport to run for keeping the store in sync.
#[derive(Debug, Clone)]
pub enum DataPlaneConfig {
    /// Poll an HTTP endpoint on an interval.
    Polling(PollingConfig),
    /// Hold a long-lived server-sent-events connection.
    Streaming(StreamingConfig),
}

/// Hook registration is intentionally left to the caller: [`crate::hooks::HookRunner::add_hook`]
/// takes an `Arc<dyn Hook>` directly, since hooks are arbitrary trait objects
/// rather than data this crate can construct from a config value. This type
/// exists only to carry the few knobs that do apply uniformly to hook
/// execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct HooksConfig {
    /// Whether hooks participate at all. Callers assembling an
    /// [`crate::evaluation_glue::EvaluationGlue`] should pass this through to
    /// its `hooks_enabled` constructor argument; when `false`,
    /// [`crate::evaluation_glue::EvaluationGlue::evaluate`] runs the supplied
    /// closure without invoking any hook stage.
    pub enabled: bool,
}

/// Top level configuration tying together the data plane transport, big
/// segment membership, hook execution, and application tags.
#[derive(Debug, Clone)]
pub struct Config {
    /// The transport used to keep the store in sync.
    pub data_plane: DataPlaneConfig,
    /// Reconnect backoff shared by whichever transport is in use.
    pub backoff: BackoffConfig,
    /// Big segment membership configuration; `None` disables big segment
    /// support entirely (every membership check returns `Unknown`).
    pub big_segments: Option<BigSegmentsConfig>,
    /// Hook execution configuration.
    pub hooks: HooksConfig,
    /// Application identification tags sent with every connection.
    pub application_tags: ApplicationTags,
}

impl Config {
    /// Start building a configuration for the polling transport.
    pub fn polling(config: PollingConfig) -> ConfigBuilder {
        ConfigBuilder::new(DataPlaneConfig::Polling(config))
    }

    /// Start building a configuration for the streaming transport.
    pub fn streaming(config: StreamingConfig) -> ConfigBuilder {
        ConfigBuilder::new(DataPlaneConfig::Streaming(config))
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    data_plane: DataPlaneConfig,
    backoff: BackoffConfig,
    big_segments: Option<BigSegmentsConfig>,
    hooks: HooksConfig,
    application_tags: ApplicationTags,
}

impl ConfigBuilder {
    fn new(data_plane: DataPlaneConfig) -> Self {
        ConfigBuilder {
            data_plane,
            backoff: BackoffConfig::default(),
            big_segments: None,
            hooks: HooksConfig::default(),
            application_tags: ApplicationTags::default(),
        }
    }

    /// Override the default reconnect backoff policy.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable big segment membership support with the given configuration.
    pub fn big_segments(mut self, config: BigSegmentsConfig) -> Self {
        self.big_segments = Some(config);
        self
    }

    /// Override hook execution configuration.
    pub fn hooks(mut self, hooks: HooksConfig) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the application identification tags.
    pub fn application_tags(mut self, tags: ApplicationTags) -> Self {
        self.application_tags = tags;
        self
    }

    /// Finish building, producing the [`Config`].
    pub fn build(self) -> Config {
        Config {
            data_plane: self.data_plane,
            backoff: self.backoff,
            big_segments: self.big_segments,
            hooks: self.hooks,
            application_tags: self.application_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn builder_defaults_backoff_and_disables_big_segments() {
        let config = Config::polling(PollingConfig::new(Url::parse("https://example.test").unwrap()))
            .build();
        assert!(config.big_segments.is_none());
        assert!(!config.hooks.enabled);
    }

    #[test]
    fn application_tags_builder_sets_both_fields() {
        let tags = ApplicationTags::builder().id("svc").version("1.0.0").build();
        assert_eq!(tags.id.as_deref(), Some("svc"));
        assert_eq!(tags.version.as_deref(), Some("1.0.0"));
    }
}
