//! Analysis configuration.
//!
//! Every threshold the engine uses lives here with a documented default.
//! Files are TOML; every key is optional.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub thresholds: Thresholds,
    pub tier: TierRules,
    pub trend: TrendConfig,
    pub similarity: SimilarityConfig,
    pub mentor: MentorConfig,
    pub normalize: NormalizeConfig,
    pub catalog: CatalogConfig,
}

/// Percentage boundaries for per-course tags and recommendation priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Mean at or above this is Strong.
    pub strong: f64,
    /// Mean below this is Weak.
    pub weak: f64,
    /// Mean below this makes a recommendation High priority.
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            strong: 75.0,
            weak: 60.0,
            critical: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRules {
    /// High requires a Strong fraction strictly above this.
    pub high_strong_fraction: f64,
    /// High allows at most this many Weak tags.
    pub high_max_weak: usize,
    /// Low when the Weak fraction reaches this.
    pub low_weak_fraction: f64,
}

impl Default for TierRules {
    fn default() -> Self {
        Self {
            high_strong_fraction: 0.5,
            high_max_weak: 1,
            low_weak_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Slope (pct per attempt) that separates Stable from a direction.
    pub epsilon: f64,
    /// Fits over fewer samples are flagged low-confidence.
    pub min_confident_samples: usize,
    /// Average first-to-last change (pct) needed for an overall trend.
    pub improvement_band: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            min_confident_samples: 3,
            improvement_band: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Neighbours consulted by the recommender.
    pub top_k: usize,
    /// Keep only pairs inside some student's top-K neighbours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbor_limit: Option<usize>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            neighbor_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentorConfig {
    pub top_k: usize,
    pub similarity_weight: f64,
    pub strength_weight: f64,
}

impl Default for MentorConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_weight: 0.5,
            strength_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Used when a row has no max score.
    pub default_max_score: f64,
    /// Reject rows with no max score instead of using the default.
    pub require_max_score: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            default_max_score: 100.0,
            require_max_score: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub default_course: String,
    /// Subject key to remedial course ids.
    pub remedial: BTreeMap<String, Vec<String>>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let entries: [(&str, [&str; 2]); 10] = [
            ("Python", ["Python Fundamentals", "Data Structures in Python"]),
            ("Java", ["Java Programming I", "Object Oriented Programming"]),
            ("SQL", ["Database Design", "SQL Masterclass"]),
            ("Data Science", ["Statistics for DS", "Intro to ML"]),
            ("Computer Networks", ["Networking Basics", "TCP/IP Protocols"]),
            ("Math", ["Linear Algebra", "Calculus Refresher"]),
            ("Web Development", ["HTML/CSS Bootcamp", "JavaScript Essentials"]),
            ("Algorithms", ["Algorithms I", "Competitive Programming"]),
            ("Operating Systems", ["OS Concepts", "Linux Admin"]),
            ("Security", ["Cybersecurity Basics", "Ethical Hacking"]),
        ];
        Self {
            default_course: "General Study Skills Workshop".to_string(),
            remedial: entries
                .into_iter()
                .map(|(key, courses)| {
                    (
                        key.to_string(),
                        courses.iter().map(|c| c.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml(&raw)?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialise config")
    }

    /// Check every value before any computation uses it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        percent("thresholds.strong", t.strong)?;
        percent("thresholds.weak", t.weak)?;
        percent("thresholds.critical", t.critical)?;
        if t.weak > t.strong {
            return Err(ConfigError::WeakAboveStrong {
                weak: t.weak,
                strong: t.strong,
            });
        }
        if t.critical > t.weak {
            return Err(ConfigError::CriticalAboveWeak {
                critical: t.critical,
                weak: t.weak,
            });
        }
        // The strength margin divides by (100 - strong).
        if t.strong >= 100.0 {
            return Err(ConfigError::OutOfRange {
                field: "thresholds.strong",
                value: t.strong,
                min: 0.0,
                max: 100.0,
            });
        }

        fraction("tier.high_strong_fraction", self.tier.high_strong_fraction)?;
        fraction("tier.low_weak_fraction", self.tier.low_weak_fraction)?;

        in_range("trend.epsilon", self.trend.epsilon, 0.0, f64::MAX)?;
        in_range(
            "trend.improvement_band",
            self.trend.improvement_band,
            0.0,
            f64::MAX,
        )?;
        if self.trend.min_confident_samples == 0 {
            return Err(ConfigError::ZeroCount {
                field: "trend.min_confident_samples",
            });
        }

        if self.similarity.top_k == 0 {
            return Err(ConfigError::ZeroCount {
                field: "similarity.top_k",
            });
        }
        if self.similarity.neighbor_limit == Some(0) {
            return Err(ConfigError::ZeroCount {
                field: "similarity.neighbor_limit",
            });
        }

        if self.mentor.top_k == 0 {
            return Err(ConfigError::ZeroCount {
                field: "mentor.top_k",
            });
        }
        in_range(
            "mentor.similarity_weight",
            self.mentor.similarity_weight,
            0.0,
            f64::MAX,
        )?;
        in_range(
            "mentor.strength_weight",
            self.mentor.strength_weight,
            0.0,
            f64::MAX,
        )?;
        if self.mentor.similarity_weight == 0.0 && self.mentor.strength_weight == 0.0 {
            return Err(ConfigError::ZeroWeights);
        }

        let max = self.normalize.default_max_score;
        if !max.is_finite() {
            return Err(ConfigError::NotFinite {
                field: "normalize.default_max_score",
                value: max,
            });
        }
        if max <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "normalize.default_max_score",
                value: max,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }

        Ok(())
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite { field, value });
    }
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn percent(field: &'static str, value: f64) -> Result<(), ConfigError> {
    in_range(field, value, 0.0, 100.0)
}

fn fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    in_range(field, value, 0.0, 1.0)
}
