use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::formats::{GenerationContext, SectionPlanEntry, SectionResult};
use crate::llm::{JsonRequest, MeteredModel, ModelTier};
use crate::rag::{ContextFilter, ContextQuery, ExclusionFilter, SectionContext};

pub const TASK_SECTION: &str = "section";

const SOLUTION_WORDS: [&str; 8] = [
    "solution",
    "benefit",
    "guide",
    "how",
    "tip",
    "choose",
    "best",
    "recommend",
];

/// Everything one section call needs. The context is shared with every other
/// section of the run and never mutated while writers hold it.
#[derive(Debug, Clone)]
pub struct SectionRequest {
    pub index: usize,
    pub title: String,
    pub specific_plan: Option<Vec<String>>,
    pub previous_titles: Vec<String>,
    pub future_titles: Vec<String>,
    pub covered_points: Vec<String>,
    pub injected_so_far: u32,
    pub context: Arc<GenerationContext>,
}

impl SectionRequest {
    pub fn from_plan(
        entries: &[SectionPlanEntry],
        index: usize,
        covered_points: &[String],
        injected_so_far: u32,
        context: Arc<GenerationContext>,
    ) -> Option<Self> {
        let entry = entries.get(index)?;
        Some(Self {
            index,
            title: entry.title.clone(),
            specific_plan: entry.specific_plan.clone(),
            previous_titles: entries[..index].iter().map(|e| e.title.clone()).collect(),
            future_titles: entries[index + 1..]
                .iter()
                .map(|e| e.title.clone())
                .collect(),
            covered_points: covered_points.to_vec(),
            injected_so_far,
            context,
        })
    }

    fn empty_result(&self) -> SectionResult {
        SectionResult {
            index: self.index,
            title: self.title.clone(),
            ..SectionResult::default()
        }
    }

    /// The inline placeholder shown when this section could not be written.
    pub fn failed_result(&self) -> SectionResult {
        SectionResult {
            content: format!("Error generating section: {}", self.title),
            ..self.empty_result()
        }
    }
}

#[async_trait]
pub trait SectionWriter: Send + Sync {
    /// Never fails: errors become a placeholder section. A cancelled request
    /// yields an empty section.
    async fn write(&self, request: SectionRequest, cancel: &CancellationToken) -> SectionResult;
}

/// Whether the product pitch belongs in this section.
pub fn should_inject(
    context: &GenerationContext,
    title: &str,
    future_sections: usize,
    injected_so_far: u32,
) -> bool {
    if context
        .product_brief
        .as_ref()
        .is_none_or(|brief| !brief.has_product_name())
    {
        return false;
    }

    let forced = future_sections <= 1 && injected_so_far <= 2;
    if forced {
        return true;
    }

    let lower = title.to_lowercase();
    let keyword_hit = context
        .product_mapping
        .iter()
        .flat_map(|mapping| &mapping.relevance_keywords)
        .map(|keyword| keyword.trim().to_lowercase())
        .any(|keyword| !keyword.is_empty() && lower.contains(&keyword));

    keyword_hit || has_solution_word(&lower)
}

fn has_solution_word(lower_title: &str) -> bool {
    lower_title
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| SOLUTION_WORDS.iter().any(|w| word.starts_with(w)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionDraft {
    content: String,
    #[serde(default)]
    used_points: Vec<String>,
    #[serde(default)]
    injected_count: u32,
    #[serde(default)]
    comment: Option<String>,
}

pub struct LlmSectionWriter {
    model: MeteredModel,
    filter: Arc<dyn ContextFilter>,
}

impl LlmSectionWriter {
    pub fn new(model: MeteredModel, filter: Arc<dyn ContextFilter>) -> Self {
        Self { model, filter }
    }

    async fn section_context(&self, request: &SectionRequest) -> anyhow::Result<SectionContext> {
        let all_key_points = request.context.all_key_points();
        let query = ContextQuery {
            section_title: &request.title,
            all_key_points: &all_key_points,
            covered_points: &request.covered_points,
            reference_content: &request.context.config.reference_content,
        };
        match self.filter.select(query).await {
            Ok(context) => Ok(context),
            Err(err) => {
                tracing::warn!(
                    section = %request.title,
                    ?err,
                    "context filter failed; using uncovered key points only"
                );
                ExclusionFilter.select(query).await
            }
        }
    }

    async fn draft(
        &self,
        request: &SectionRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<SectionResult>> {
        let section_context = self.section_context(request).await?;
        let inject = should_inject(
            &request.context,
            &request.title,
            request.future_titles.len(),
            request.injected_so_far,
        );
        let prompt = build_section_prompt(request, &section_context, inject);
        let call = self.model.json::<SectionDraft>(JsonRequest::new(
            TASK_SECTION,
            ModelTier::Quality,
            prompt,
            "section_draft",
            section_schema(),
        ));

        let draft = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            draft = call => draft?,
        };
        if let Some(comment) = draft.comment.as_deref().filter(|c| !c.trim().is_empty()) {
            tracing::debug!(section = %request.title, comment, "writer comment");
        }

        Ok(Some(SectionResult {
            index: request.index,
            title: request.title.clone(),
            content: with_heading(&request.title, &draft.content),
            used_points: draft.used_points,
            injected_count: draft.injected_count,
        }))
    }
}

#[async_trait]
impl SectionWriter for LlmSectionWriter {
    async fn write(&self, request: SectionRequest, cancel: &CancellationToken) -> SectionResult {
        if cancel.is_cancelled() {
            return request.empty_result();
        }

        match self.draft(&request, cancel).await {
            Ok(Some(result)) => {
                tracing::info!(
                    index = request.index,
                    section = %request.title,
                    used_points = result.used_points.len(),
                    injected = result.injected_count,
                    "section written"
                );
                result
            }
            Ok(None) => request.empty_result(),
            Err(err) => {
                tracing::warn!(
                    index = request.index,
                    section = %request.title,
                    error = %format!("{err:#}"),
                    "section generation failed"
                );
                request.failed_result()
            }
        }
    }
}

/// Prefixes `## <title>` unless the draft already opens with that heading.
pub fn with_heading(title: &str, content: &str) -> String {
    let heading = format!("## {}", title.trim());
    let content = content.trim();
    let first_line = content.lines().next().map(str::trim).unwrap_or_default();
    if first_line == heading {
        return content.to_owned();
    }
    if content.is_empty() {
        return heading;
    }
    format!("{heading}\n\n{content}")
}

fn push_list(prompt: &mut String, header: &str, items: &[String]) {
    let items = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>();
    if items.is_empty() {
        return;
    }
    prompt.push_str(header);
    prompt.push('\n');
    for item in items {
        prompt.push_str("- ");
        prompt.push_str(item);
        prompt.push('\n');
    }
    prompt.push('\n');
}

fn build_section_prompt(
    request: &SectionRequest,
    section_context: &SectionContext,
    inject: bool,
) -> String {
    let context = &request.context;
    let config = &context.config;

    let mut prompt = format!(
        "You are a professional long-form writer.\n\
\n\
Task: Write ONE section of the article below in Markdown.\n\
\n\
Context:\n\
- Article title: {article}\n\
- Section title: {section}\n\
- Section position: {position} of {total}\n\
- Target audience: {audience}\n\
- Website type: {website_type}\n\
\n",
        article = config.title,
        section = request.title,
        position = request.index + 1,
        total = request.previous_titles.len() + request.future_titles.len() + 1,
        audience = config.target_audience,
        website_type = config.website_type,
    );

    push_list(&mut prompt, "General writing plan:", &context.structure.general_plan);
    if let Some(plan) = &request.specific_plan {
        push_list(&mut prompt, "Plan for this section (in order):", plan);
    }
    push_list(
        &mut prompt,
        "Sections already written (do NOT repeat their content):",
        &request.previous_titles,
    );
    push_list(
        &mut prompt,
        "Sections written later (do NOT cover their topics here):",
        &request.future_titles,
    );
    push_list(
        &mut prompt,
        "Key facts not yet covered (use only those that fit this section):",
        &section_context.key_points,
    );

    if let Some(excerpt) = &section_context.reference_excerpt {
        prompt.push_str("BEGIN_REFERENCE_EXCERPT\n");
        prompt.push_str(excerpt.trim());
        prompt.push_str("\nEND_REFERENCE_EXCERPT\n\n");
    }

    let keyword_lines = context
        .keyword_plans
        .iter()
        .map(|plan| format!("{}: {}", plan.word, plan.plan.join("; ")))
        .collect::<Vec<_>>();
    push_list(&mut prompt, "Keyword usage plan:", &keyword_lines);

    if !context.authority.is_empty() {
        push_list(
            &mut prompt,
            "Trust signals you may cite:",
            &context.authority.relevant_terms,
        );
        push_list(
            &mut prompt,
            "How to combine trust signals:",
            &context.authority.combination_strategies,
        );
    }

    if inject && let Some(knowledge) = &config.brand_knowledge {
        prompt.push_str("Commercial injection plan:\n");
        prompt.push_str(
            "- Mention the product naturally as one answer to a reader problem. No hard sell.\n",
        );
        for mapping in &context.product_mapping {
            prompt.push_str(&format!(
                "- Pain point \"{}\" is addressed by \"{}\".\n",
                mapping.pain_point, mapping.product_feature
            ));
        }
        prompt.push('\n');
        push_list(
            &mut prompt,
            "Conversion plan:",
            &context.structure.conversion_plan,
        );
        prompt.push_str(knowledge.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "Hard rules:\n\
- Start with the heading `## <section title>` and do not add other H2 headings.\n\
- Do not invent statistics, prices or certifications.\n\
- Stay within this section's topic.\n\
\n\
Output JSON fields:\n\
- content: the section Markdown\n\
- usedPoints: the key facts you actually used, copied verbatim\n\
- injectedCount: how many times you mentioned the product (0 if none)\n\
- comment: optional note for the editor\n",
    );
    prompt
}

fn section_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": { "type": "string" },
            "usedPoints": { "type": "array", "items": { "type": "string" } },
            "injectedCount": { "type": "integer", "minimum": 0 },
            "comment": { "type": "string" }
        },
        "required": ["content", "usedPoints", "injectedCount"]
    })
}
