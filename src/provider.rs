//! Provider identification
//!
//! Providers are addressed through `provider/model-name` composites. Only the
//! wire dialect matters to the rest of the crate, so the tag collapses into a
//! closed [`ProviderKind`]; named OpenAI-compatible hosts keep their default
//! base URLs through [`ModelId::default_base_url`].

use serde::{Deserialize, Serialize};

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI Chat Completions and compatible hosts.
    OpenAi,
    Anthropic,
    Gemini,
    /// Unrecognized provider tag; spoken as OpenAI-compatible.
    Generic,
}

impl ProviderKind {
    /// Map a provider tag. Unknown tags fall back to [`ProviderKind::Generic`].
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "openai" | "groq" | "openrouter" | "sambanova" | "cerebras" | "mistral" => {
                Self::OpenAi
            }
            "anthropic" | "claude" => Self::Anthropic,
            "gemini" | "google" => Self::Gemini,
            _ => Self::Generic,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Generic => "generic",
        }
    }

    /// Environment variable conventionally holding this dialect's key.
    pub const fn default_env_var(&self) -> &'static str {
        match self {
            Self::OpenAi | Self::Generic => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `provider/model-name` composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    /// Provider tag as written (`groq`, `openai`, ...), lowercased.
    pub provider_tag: String,
    pub kind: ProviderKind,
    /// Model name with the provider prefix stripped.
    pub name: String,
}

impl ModelId {
    /// Split on the first `/` only: `groq/moonshotai/kimi-k2` keeps
    /// `moonshotai/kimi-k2` as the model name. A bare name maps to `openai`.
    pub fn parse(model: &str) -> Self {
        match model.split_once('/') {
            Some((tag, name)) => Self {
                provider_tag: tag.to_ascii_lowercase(),
                kind: ProviderKind::from_tag(tag),
                name: name.to_string(),
            },
            None => Self {
                provider_tag: "openai".to_string(),
                kind: ProviderKind::OpenAi,
                name: model.to_string(),
            },
        }
    }

    /// Default API base for the provider tag.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self.provider_tag.as_str() {
            "openai" => Some("https://api.openai.com/v1"),
            "anthropic" | "claude" => Some("https://api.anthropic.com/v1"),
            "gemini" | "google" => Some("https://generativelanguage.googleapis.com/v1beta"),
            "groq" => Some("https://api.groq.com/openai/v1"),
            "openrouter" => Some("https://openrouter.ai/api/v1"),
            "sambanova" => Some("https://api.sambanova.ai/v1"),
            "cerebras" => Some("https://api.cerebras.ai/v1"),
            "mistral" => Some("https://api.mistral.ai/v1"),
            _ => None,
        }
    }

    /// Environment variable for the provider tag's API key.
    pub fn env_var(&self) -> String {
        match self.kind {
            ProviderKind::Anthropic | ProviderKind::Gemini => {
                self.kind.default_env_var().to_string()
            }
            ProviderKind::OpenAi | ProviderKind::Generic => format!(
                "{}_API_KEY",
                self.provider_tag.to_ascii_uppercase().replace('-', "_")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_splits_on_first_slash() {
        let id = ModelId::parse("groq/moonshotai/kimi-k2-instruct");
        assert_eq!(id.provider_tag, "groq");
        assert_eq!(id.kind, ProviderKind::OpenAi);
        assert_eq!(id.name, "moonshotai/kimi-k2-instruct");
        assert_eq!(id.env_var(), "GROQ_API_KEY");
    }

    #[test]
    fn unknown_tag_is_generic() {
        let id = ModelId::parse("acme/turbo-1");
        assert_eq!(id.kind, ProviderKind::Generic);
        assert_eq!(id.default_base_url(), None);
    }

    #[test]
    fn bare_model_defaults_to_openai() {
        let id = ModelId::parse("gpt-4o-mini");
        assert_eq!(id.kind, ProviderKind::OpenAi);
        assert_eq!(id.name, "gpt-4o-mini");
    }

    #[test]
    fn env_vars_per_dialect() {
        assert_eq!(ModelId::parse("gemini/gemini-2.0-flash").env_var(), "GEMINI_API_KEY");
        assert_eq!(ModelId::parse("anthropic/claude-3-5-haiku").env_var(), "ANTHROPIC_API_KEY");
        assert_eq!(ModelId::parse("openai/gpt-4o").env_var(), "OPENAI_API_KEY");
    }
}
