use crate::api_types::Message;
use crate::extraction::{extract_json_as, extract_json_object};
use crate::intent::{Intent, IntentContext};
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts::{self, render, Intensity};
use crate::retry::{with_retry, RetryPolicy};
use anyhow::{Context, Result};
use quickpersona_core::config::TemplateOverrides;
use quickpersona_core::{ConfigSource, PromptFormat};
use serde::Deserialize;
use std::sync::Arc;

/// A setting the user's description left out.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MissingField {
    pub field: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub hint: String,
}

impl MissingField {
    /// Label for display, falling back to the raw field name.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.field
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FieldAnalysis {
    #[serde(default)]
    pub provided: Vec<String>,
    #[serde(default)]
    pub missing: Vec<MissingField>,
}

/// Profile fields returned by the analysis model. Absent keys leave the
/// stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileAnalysis {
    pub profile_text: Option<String>,
    pub traits: Option<Vec<String>>,
    pub interests: Option<Vec<String>>,
    pub speaking_style: Option<String>,
    pub emotional_tendency: Option<String>,
}

/// LLM glue for every persona and profile operation.
///
/// Reads configuration through the [`ConfigSource`] on each call.
pub struct ArchitectService {
    client: Arc<dyn LlmClient>,
    config: Arc<dyn ConfigSource>,
}

impl ArchitectService {
    pub fn new(client: Arc<dyn LlmClient>, config: Arc<dyn ConfigSource>) -> Self {
        Self { client, config }
    }

    /// One prompt in, trimmed text out. Each attempt is bounded by
    /// `llm.timeout_secs`; empty output counts as a failed attempt.
    pub async fn call_architect(&self, prompt: &str) -> Result<String> {
        let cfg = self.config.current();
        let llm = &cfg.llm;
        let timeout = llm.timeout();
        let params = CompletionParams {
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            model: (!llm.provider_id.is_empty()).then(|| llm.provider_id.clone()),
        };
        let policy = RetryPolicy::with_attempts(llm.max_attempts);

        with_retry(&policy, "Architect call", |_| {
            let params = params.clone();
            let messages = vec![Message::user(prompt)];
            async move {
                let response = tokio::time::timeout(timeout, self.client.complete("", messages, params))
                    .await
                    .map_err(|_| anyhow::anyhow!("LLM call timed out after {}s", timeout.as_secs()))??;
                let text = strip_code_fence(&response.text());
                if text.is_empty() {
                    anyhow::bail!("LLM returned an empty response");
                }
                Ok(text)
            }
        })
        .await
    }

    pub async fn generate_persona(&self, description: &str, format: PromptFormat) -> Result<String> {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.generate, prompts::generate_template(format));
        let prompt = render(
            template,
            &[("description", description), ("format", format.display_name()), ("format_hint", prompts::format_hint(format))],
        );
        self.call_architect(&prompt).await.context("Persona generation failed")
    }

    pub async fn refine_persona(&self, current_prompt: &str, feedback: &str, format: PromptFormat) -> Result<String> {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.refine, prompts::REFINE);
        let prompt = render(
            template,
            &[("current_prompt", current_prompt), ("feedback", feedback), ("format", format.display_name())],
        );
        self.call_architect(&prompt).await.context("Persona refinement failed")
    }

    pub async fn shrink_persona(&self, original: &str, intensity: Intensity, format: PromptFormat) -> Result<String> {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.shrink, prompts::SHRINK);
        let prompt = render(
            template,
            &[("original_prompt", original), ("intensity", intensity.label()), ("format", format.display_name())],
        );
        self.call_architect(&prompt).await.context("Persona compression failed")
    }

    pub async fn convert_format(&self, original: &str, from: PromptFormat, to: PromptFormat) -> Result<String> {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.convert, prompts::CONVERT);
        let prompt = render(
            template,
            &[
                ("original_prompt", original),
                ("source_format", from.display_name()),
                ("target_format", to.display_name()),
                ("format_hint", prompts::format_hint(to)),
            ],
        );
        self.call_architect(&prompt).await.context("Format conversion failed")
    }

    pub async fn generate_with_supplements(
        &self,
        description: &str,
        supplements: &str,
        auto_fields: &[String],
        format: PromptFormat,
    ) -> Result<String> {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.guided_generate, prompts::GENERATE_WITH_SUPPLEMENTS);
        let supplements = if supplements.trim().is_empty() { "无" } else { supplements };
        let auto = if auto_fields.is_empty() { "无".to_string() } else { auto_fields.join("、") };
        let prompt = render(
            template,
            &[
                ("description", description),
                ("supplements", supplements),
                ("auto_fields", &auto),
                ("format", format.display_name()),
                ("format_hint", prompts::format_hint(format)),
            ],
        );
        self.call_architect(&prompt).await.context("Guided generation failed")
    }

    /// Never fails: any LLM or parse error means "nothing missing" so the
    /// caller proceeds with plain generation.
    pub async fn analyze_missing_fields(&self, description: &str) -> FieldAnalysis {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.missing_analysis, prompts::MISSING_ANALYSIS);
        let prompt = render(template, &[("description", description)]);

        let raw = match self.call_architect(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Missing-field analysis failed: {:#}", e);
                return FieldAnalysis::default();
            }
        };
        match extract_json_as::<FieldAnalysis>(&raw) {
            Ok(mut analysis) => {
                analysis.missing.retain(|f| !f.field.trim().is_empty());
                analysis
            }
            Err(e) => {
                tracing::warn!("Missing-field analysis unparsable: {}", e);
                FieldAnalysis::default()
            }
        }
    }

    /// Classify a free-text request. Failures become [`Intent::Unrecognized`].
    pub async fn recognize_intent(&self, query: &str, context: &IntentContext) -> Intent {
        let cfg = self.config.current();
        let template = TemplateOverrides::pick(&cfg.templates.intent, prompts::INTENT);
        let current = context.current_persona_id.as_deref().unwrap_or("无");
        let prompt = render(
            template,
            &[
                ("query", query),
                ("current_persona_id", current),
                ("persona_list", &context.persona_list_text()),
                ("has_pending", if context.has_pending { "是" } else { "否" }),
            ],
        );

        let raw = match self.call_architect(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Intent recognition failed: {:#}", e);
                return Intent::Unrecognized { action: None };
            }
        };
        match extract_json_object(&raw) {
            Ok(obj) => {
                let intent = Intent::from_json(&obj, query);
                tracing::info!(?intent, "Intent recognized");
                intent
            }
            Err(e) => {
                tracing::warn!("Intent reply unparsable: {}", e);
                Intent::Unrecognized { action: None }
            }
        }
    }

    /// Run a rendered profile prompt and parse the reply.
    pub async fn analyze_profile(&self, prompt: &str) -> Result<ProfileAnalysis> {
        let raw = self.call_architect(prompt).await.context("Profile analysis call failed")?;
        extract_json_as::<ProfileAnalysis>(&raw).context("Profile analysis reply unparsable")
    }
}

/// Drop a surrounding Markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed.to_string();
    };
    // Skip the language tag line
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim().to_string(),
        None => body.trim().to_string(),
    }
}
