//! Request and result validation settings.

use serde::{Deserialize, Serialize};

use crate::error::QueryGateError;

/// How a result below the confidence threshold is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LowConfidenceMode {
    /// Fail the request with `LOW_CONFIDENCE`
    Fail,
    /// Return the data with a warning attached
    #[default]
    Warn,
}

/// Request and result validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum question length in characters
    pub max_question_length: usize,
    /// Whether executed results are scored by the result validator
    pub result_validation_enabled: bool,
    /// Confidence below this value is treated as low
    pub min_confidence_score: u8,
    /// Treatment of low-confidence results
    pub low_confidence_mode: LowConfidenceMode,
    /// Rows passed to the result validator
    pub sample_rows: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_question_length: 10_000,
            result_validation_enabled: true,
            min_confidence_score: 70,
            low_confidence_mode: LowConfidenceMode::Warn,
            sample_rows: 10,
        }
    }
}

impl ValidationConfig {
    /// Builder method to set the low-confidence treatment.
    #[must_use]
    pub const fn with_low_confidence_mode(mut self, mode: LowConfidenceMode) -> Self {
        self.low_confidence_mode = mode;
        self
    }

    /// Builder method to set the confidence threshold.
    #[must_use]
    pub const fn with_min_confidence_score(mut self, score: u8) -> Self {
        self.min_confidence_score = score;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns a configuration error for out-of-range values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_question_length == 0 {
            return Err(QueryGateError::configuration(
                "validation.max_question_length must be greater than 0",
            ));
        }

        if self.min_confidence_score > 100 {
            return Err(QueryGateError::configuration(
                "validation.min_confidence_score must be between 0 and 100",
            ));
        }

        if self.result_validation_enabled && self.sample_rows == 0 {
            return Err(QueryGateError::configuration(
                "validation.sample_rows must be greater than 0 when result validation is enabled",
            ));
        }

        Ok(())
    }
}
