//! Sampling parameters passed to provider adapters

use serde::{Deserialize, Serialize};

/// Sampling parameters for one completion (provider-agnostic).
///
/// Unset fields are left to the backend's own defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.95),
            max_tokens: None,
        }
    }
}

impl GenerationParams {
    /// Params with every field unset.
    pub fn unset() -> Self {
        Self {
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Fill unset fields from `defaults`; explicitly set values win.
    pub fn or(self, defaults: GenerationParams) -> Self {
        Self {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
        }
    }
}
