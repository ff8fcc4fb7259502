//! Engine configuration is fixed when the engine is created: the
//! evaluation strategy decides which mailboxes and maintenance
//! algorithms every node uses, and mixing strategies within one
//! network is not supported.
use crate::error::ReteResult;
use serde::Deserialize;
use serde::Serialize;

/// How node memories remember the history of each tuple.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineRepresentation {
    /// Only the earliest timestamp at which a tuple was present.
    FirstOnly,
    /// Every appearance and disappearance.
    Faithful,
}

/// How aggregators lay out their timestamp buckets.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregatorArchitecture {
    /// Aggregands are copied forward into every later bucket.
    Parallel,
    /// Aggregands live at their insertion timestamp only; folded
    /// results are carried forward.
    Sequential,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimelyConfiguration {
    pub representation: TimelineRepresentation,
    pub architecture: AggregatorArchitecture,
}

/// The six supported evaluation setups.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EnginePreset {
    Naive,
    DeleteAndRederive,
    TimelyFirstOnlyParallel,
    TimelyFirstOnlySequential,
    TimelyFaithfulParallel,
    TimelyFaithfulSequential,
}

impl EnginePreset {
    pub const ALL: [EnginePreset; 6] = [
        EnginePreset::Naive,
        EnginePreset::DeleteAndRederive,
        EnginePreset::TimelyFirstOnlyParallel,
        EnginePreset::TimelyFirstOnlySequential,
        EnginePreset::TimelyFaithfulParallel,
        EnginePreset::TimelyFaithfulSequential,
    ];
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of worker threads; 0 drains on the caller's thread.
    pub threads: usize,
    /// Repair deletions with delete-and-rederive.
    pub delete_and_rederive: bool,
    /// Timestamped evaluation, when set.
    pub timely: Option<TimelyConfiguration>,
}

impl EngineConfig {
    #[must_use]
    pub fn preset(preset: EnginePreset) -> Self {
        let timely = |representation, architecture| {
            Some(TimelyConfiguration {
                representation,
                architecture,
            })
        };

        match preset {
            EnginePreset::Naive => Self::default(),
            EnginePreset::DeleteAndRederive => Self {
                delete_and_rederive: true,
                ..Self::default()
            },
            EnginePreset::TimelyFirstOnlyParallel => Self {
                timely: timely(TimelineRepresentation::FirstOnly, AggregatorArchitecture::Parallel),
                ..Self::default()
            },
            EnginePreset::TimelyFirstOnlySequential => Self {
                timely: timely(
                    TimelineRepresentation::FirstOnly,
                    AggregatorArchitecture::Sequential,
                ),
                ..Self::default()
            },
            EnginePreset::TimelyFaithfulParallel => Self {
                timely: timely(TimelineRepresentation::Faithful, AggregatorArchitecture::Parallel),
                ..Self::default()
            },
            EnginePreset::TimelyFaithfulSequential => Self {
                timely: timely(
                    TimelineRepresentation::Faithful,
                    AggregatorArchitecture::Sequential,
                ),
                ..Self::default()
            },
        }
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Parses a configuration from TOML; missing fields take their
    /// default value.
    ///
    /// # Errors
    ///
    /// Returns `Err` on malformed TOML or unknown fields.
    pub fn from_toml_str(text: &str) -> ReteResult<Self> {
        Ok(toml::from_str(text)?)
    }

    #[must_use]
    pub fn is_timely(&self) -> bool {
        self.timely.is_some()
    }

    /// Representation of node memories.  Timeless networks only ever
    /// see the neutral timestamp, so they use the compact one.
    #[must_use]
    pub fn representation(&self) -> TimelineRepresentation {
        self.timely
            .map_or(TimelineRepresentation::FirstOnly, |timely| timely.representation)
    }

    #[must_use]
    pub fn architecture(&self) -> AggregatorArchitecture {
        self.timely
            .map_or(AggregatorArchitecture::Parallel, |timely| timely.architecture)
    }
}

#[test]
fn test_presets() {
    assert_eq!(EngineConfig::preset(EnginePreset::Naive), EngineConfig::default());
    assert!(EngineConfig::preset(EnginePreset::DeleteAndRederive).delete_and_rederive);

    let faithful = EngineConfig::preset(EnginePreset::TimelyFaithfulSequential);
    assert!(faithful.is_timely());
    assert_eq!(faithful.representation(), TimelineRepresentation::Faithful);
    assert_eq!(faithful.architecture(), AggregatorArchitecture::Sequential);
}

#[test]
fn test_from_toml() {
    let config = EngineConfig::from_toml_str(
        r#"
threads = 2

[timely]
representation = "FIRST_ONLY"
architecture = "PARALLEL"
"#,
    )
    .expect("ok");

    assert_eq!(config.threads, 2);
    assert!(!config.delete_and_rederive);
    assert_eq!(
        config,
        EngineConfig::preset(EnginePreset::TimelyFirstOnlyParallel).with_threads(2)
    );

    assert_eq!(EngineConfig::from_toml_str("").expect("ok"), EngineConfig::default());
    assert!(EngineConfig::from_toml_str("workers = 3").is_err());
}
