use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::formats::{
    ArticleConfig, AuthorityAnalysis, GenerationContext, KeywordPlan, ProblemProductMapping,
    ProductBrief, ReferenceStructure, ScrapedImage,
};
use crate::keywords::{Keyword, KeywordExtractor};
use crate::llm::{JsonRequest, MeteredModel, ModelTier, TextRequest};

pub const TASK_PRODUCT_BRIEF: &str = "product_brief";
pub const TASK_PRODUCT_MAPPING: &str = "product_mapping";
pub const TASK_KEYWORD_PLAN: &str = "keyword_plan";
pub const TASK_STRUCTURE: &str = "structure";
pub const TASK_AUTHORITY: &str = "authority";
pub const TASK_IMAGE_DESCRIPTION: &str = "image_description";
pub const TASK_VISUAL_STYLE: &str = "visual_style";

pub const DEFAULT_VISUAL_STYLE: &str = "Clean, modern professional photography with natural lighting and a neutral color palette.";

const MAX_ANALYZED_IMAGES: usize = 5;
/// Image descriptions should stay literal.
const IMAGE_DESCRIPTION_TEMPERATURE: f32 = 0.2;
const VISUAL_STYLE_TEMPERATURE: f32 = 0.7;
const MAX_REFERENCE_CHARS: usize = 30_000;
const MIN_PRODUCT_TEXT_CHARS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ProductAnalysis {
    pub brief: Option<ProductBrief>,
    pub mapping: Vec<ProblemProductMapping>,
}

#[derive(Debug, Clone, Default)]
pub struct StructureAnalysis {
    pub structure: ReferenceStructure,
    pub authority: AuthorityAnalysis,
}

#[derive(Debug, Clone)]
pub struct AnalysisResults {
    pub product: ProductAnalysis,
    pub keyword_plans: Vec<KeywordPlan>,
    pub structure: StructureAnalysis,
    pub visual_style: String,
}

impl AnalysisResults {
    /// Folds the task outputs into the context shared with every writer.
    pub fn into_context(self, config: &ArticleConfig) -> GenerationContext {
        GenerationContext {
            config: config.with_brand_knowledge(self.product.brief.as_ref()),
            product_brief: self.product.brief,
            product_mapping: self.product.mapping,
            structure: self.structure.structure,
            authority: self.structure.authority,
            keyword_plans: self.keyword_plans,
            visual_style: self.visual_style,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MappingResponse {
    #[serde(default)]
    mappings: Vec<ProblemProductMapping>,
}

#[derive(Debug, Deserialize)]
struct KeywordPlanResponse {
    #[serde(default)]
    plans: Vec<KeywordPlan>,
}

pub struct AnalysisTaskRunner {
    model: MeteredModel,
    extractor: Arc<dyn KeywordExtractor>,
}

impl AnalysisTaskRunner {
    pub fn new(model: MeteredModel, extractor: Arc<dyn KeywordExtractor>) -> Self {
        Self { model, extractor }
    }

    /// Runs all four tasks together and waits for every one of them. Only a
    /// structure failure is returned as an error.
    pub async fn run(
        &self,
        config: &ArticleConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<AnalysisResults> {
        let (product, keyword_plans, structure, visual_style) = tokio::join!(
            self.product_task(config, cancel),
            self.keyword_task(config, cancel),
            self.structure_task(config, cancel),
            self.visual_task(config, cancel),
        );
        let structure = structure.context("structure analysis")?;

        tracing::info!(
            product = product.brief.as_ref().map(|b| b.product_name.as_str()),
            mappings = product.mapping.len(),
            keyword_plans = keyword_plans.len(),
            sections = structure.structure.structure.len(),
            authority_terms = structure.authority.relevant_terms.len(),
            "analysis settled"
        );

        Ok(AnalysisResults {
            product,
            keyword_plans,
            structure,
            visual_style,
        })
    }

    pub async fn product_task(
        &self,
        config: &ArticleConfig,
        cancel: &CancellationToken,
    ) -> ProductAnalysis {
        let mut analysis = ProductAnalysis {
            brief: config.product_brief.clone(),
            mapping: Vec::new(),
        };
        if let Err(err) = self.try_product_task(config, cancel, &mut analysis).await {
            tracing::warn!(?err, "product analysis failed; continuing without product mapping");
            analysis.mapping.clear();
        }
        analysis
    }

    async fn try_product_task(
        &self,
        config: &ArticleConfig,
        cancel: &CancellationToken,
        analysis: &mut ProductAnalysis,
    ) -> anyhow::Result<()> {
        let raw = config.product_raw_text.trim();
        if analysis.brief.is_none() && raw.chars().count() > MIN_PRODUCT_TEXT_CHARS {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let brief: ProductBrief = self
                .model
                .json(JsonRequest::new(
                    TASK_PRODUCT_BRIEF,
                    ModelTier::Fast,
                    product_brief_prompt(raw),
                    "product_brief",
                    product_brief_schema(),
                ))
                .await
                .context("parse product brief")?;
            analysis.brief = Some(brief);
        }

        let Some(brief) = analysis.brief.clone().filter(ProductBrief::has_product_name) else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Ok(());
        }

        let response: MappingResponse = self
            .model
            .json(JsonRequest::new(
                TASK_PRODUCT_MAPPING,
                ModelTier::Fast,
                product_mapping_prompt(config, &brief),
                "problem_product_mapping",
                product_mapping_schema(),
            ))
            .await
            .context("map pain points to product features")?;

        analysis.mapping = response
            .mappings
            .into_iter()
            .filter(|m| !m.pain_point.trim().is_empty())
            .take(5)
            .collect();
        Ok(())
    }

    pub async fn keyword_task(
        &self,
        config: &ArticleConfig,
        cancel: &CancellationToken,
    ) -> Vec<KeywordPlan> {
        let keywords = match self.extractor.extract(&config.reference_content) {
            Ok(keywords) => keywords,
            Err(err) => {
                tracing::warn!(?err, "keyword extraction failed; skipping keyword plans");
                return Vec::new();
            }
        };
        if keywords.is_empty() || cancel.is_cancelled() {
            return Vec::new();
        }

        match self.plan_keywords(config, &keywords).await {
            Ok(plans) => plans,
            Err(err) => {
                tracing::warn!(?err, "keyword planning failed; skipping keyword plans");
                Vec::new()
            }
        }
    }

    async fn plan_keywords(
        &self,
        config: &ArticleConfig,
        keywords: &[Keyword],
    ) -> anyhow::Result<Vec<KeywordPlan>> {
        let response: KeywordPlanResponse = self
            .model
            .json(JsonRequest::new(
                TASK_KEYWORD_PLAN,
                ModelTier::Fast,
                keyword_plan_prompt(config, keywords),
                "keyword_plans",
                keyword_plan_schema(),
            ))
            .await?;
        Ok(response
            .plans
            .into_iter()
            .filter(|plan| !plan.word.trim().is_empty())
            .collect())
    }

    pub async fn structure_task(
        &self,
        config: &ArticleConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<StructureAnalysis> {
        if cancel.is_cancelled() {
            return Ok(StructureAnalysis::default());
        }
        let (structure, authority) =
            tokio::try_join!(self.analyze_structure(config), self.analyze_authority(config))?;
        Ok(StructureAnalysis {
            structure,
            authority,
        })
    }

    async fn analyze_structure(&self, config: &ArticleConfig) -> anyhow::Result<ReferenceStructure> {
        self.model
            .json(JsonRequest::new(
                TASK_STRUCTURE,
                ModelTier::Quality,
                structure_prompt(config),
                "reference_structure",
                structure_schema(),
            ))
            .await
            .context("analyze reference structure")
    }

    async fn analyze_authority(&self, config: &ArticleConfig) -> anyhow::Result<AuthorityAnalysis> {
        if config.authority_terms.trim().is_empty() {
            return Ok(AuthorityAnalysis::default());
        }
        self.model
            .json(JsonRequest::new(
                TASK_AUTHORITY,
                ModelTier::Fast,
                authority_prompt(config),
                "authority_analysis",
                authority_schema(),
            ))
            .await
            .context("analyze authority terms")
    }

    pub async fn visual_task(&self, config: &ArticleConfig, cancel: &CancellationToken) -> String {
        let descriptions = futures::future::join_all(
            config
                .scraped_images
                .iter()
                .take(MAX_ANALYZED_IMAGES)
                .map(|image| self.describe_image(image, cancel)),
        )
        .await
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        if descriptions.is_empty() || cancel.is_cancelled() {
            tracing::debug!("no image descriptions; using default visual style");
            return DEFAULT_VISUAL_STYLE.to_owned();
        }

        let request = TextRequest::new(
            TASK_VISUAL_STYLE,
            ModelTier::Fast,
            visual_style_prompt(&descriptions, &config.website_type),
        )
        .with_temperature(VISUAL_STYLE_TEMPERATURE);
        match self.model.text(request).await {
            Ok(style) if !style.trim().is_empty() => style.trim().to_owned(),
            Ok(_) => DEFAULT_VISUAL_STYLE.to_owned(),
            Err(err) => {
                tracing::warn!(?err, "visual style synthesis failed; using default style");
                DEFAULT_VISUAL_STYLE.to_owned()
            }
        }
    }

    async fn describe_image(
        &self,
        image: &ScrapedImage,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if cancel.is_cancelled() {
            return None;
        }
        let request =
            TextRequest::new(TASK_IMAGE_DESCRIPTION, ModelTier::Fast, image_description_prompt(image))
                .with_image(&image.url)
                .with_temperature(IMAGE_DESCRIPTION_TEMPERATURE);
        match self.model.text(request).await {
            Ok(description) if !description.trim().is_empty() => {
                Some(description.trim().to_owned())
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(url = %image.url, ?err, "image analysis failed; skipping image");
                None
            }
        }
    }
}

fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn product_brief_prompt(raw: &str) -> String {
    format!(
        "You are a product marketing analyst.\n\
\n\
Task: Extract a structured product brief from the raw product description below.\n\
\n\
Rules:\n\
- Use ONLY information present in the description.\n\
- Leave a field empty when the description does not mention it.\n\
\n\
BEGIN_PRODUCT_TEXT\n\
{raw}\n\
END_PRODUCT_TEXT\n"
    )
}

fn product_mapping_prompt(config: &ArticleConfig, brief: &ProductBrief) -> String {
    format!(
        "You are a content strategist.\n\
\n\
Article topic: {title}\n\
Target audience: {audience}\n\
\n\
{product}\n\
Task: List 3 to 5 reader pain points that naturally come up in this topic and map each \
one to the product feature that addresses it. For every mapping give short relevance \
keywords that would appear in a section title where mentioning the product fits.\n",
        title = config.title,
        audience = config.target_audience,
        product = brief.render(),
    )
}

fn keyword_plan_prompt(config: &ArticleConfig, keywords: &[Keyword]) -> String {
    let words = keywords
        .iter()
        .map(|k| format!("- {} ({} mentions)", k.token, k.count))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an SEO editor.\n\
\n\
Article topic: {title}\n\
Target audience: {audience}\n\
\n\
Keywords found in the reference material:\n\
{words}\n\
\n\
Task: For each keyword worth using, write 1 to 3 concrete usage actions describing how a \
writer should weave it into the article for this audience. Skip keywords that are noise.\n",
        title = config.title,
        audience = config.target_audience,
    )
}

fn structure_prompt(config: &ArticleConfig) -> String {
    format!(
        "You are a senior editor analyzing a reference article.\n\
\n\
New article title: {title}\n\
Target audience: {audience}\n\
\n\
Task:\n\
- Derive an ordered section outline (H2 level) for the new article.\n\
- For each section give a narrative plan (ordered steps), the key facts it should cover, \
its difficulty (basic, intermediate, advanced) and the core reader questions it answers.\n\
- A key fact MUST belong to exactly one section.\n\
- Also give a general writing plan for the whole article and, if the reference sells \
something, a conversion plan.\n\
\n\
BEGIN_REFERENCE\n\
{reference}\n\
END_REFERENCE\n",
        title = config.title,
        audience = config.target_audience,
        reference = truncate_chars(&config.reference_content, MAX_REFERENCE_CHARS),
    )
}

fn authority_prompt(config: &ArticleConfig) -> String {
    format!(
        "You are a fact-checking editor.\n\
\n\
Article topic: {title}\n\
Website type: {website_type}\n\
\n\
Candidate trust signals (certifications, institutions, standards, awards):\n\
{terms}\n\
\n\
Task: Keep only the signals relevant to this topic and describe how to combine them \
credibly in the article. Do not invent new signals.\n",
        title = config.title,
        website_type = config.website_type,
        terms = config.authority_terms.trim(),
    )
}

fn image_description_prompt(image: &ScrapedImage) -> String {
    let alt = image.alt.as_deref().unwrap_or("(none)");
    format!(
        "Describe the visual style of this image in 2 sentences: medium, lighting, color \
palette, composition and mood. Alt text: {alt}\n"
    )
}

fn visual_style_prompt(descriptions: &[String], website_type: &str) -> String {
    format!(
        "You are an art director.\n\
\n\
Website type: {website_type}\n\
\n\
Image style notes from the reference site:\n\
{notes}\n\
\n\
Task: Write ONE cohesive visual style description (max 60 words) that new article \
illustrations should follow. Output only the description.\n",
        notes = bullet_list(descriptions),
    )
}

fn string_array() -> serde_json::Value {
    serde_json::json!({ "type": "array", "items": { "type": "string" } })
}

fn product_brief_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "product_name": { "type": "string" },
            "usp": { "type": "string" },
            "features": string_array(),
            "target_pain_points": string_array(),
            "cta": { "type": "string" }
        },
        "required": ["product_name"]
    })
}

fn product_mapping_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "mappings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "pain_point": { "type": "string" },
                        "product_feature": { "type": "string" },
                        "relevance_keywords": string_array()
                    },
                    "required": ["pain_point", "product_feature", "relevance_keywords"]
                }
            }
        },
        "required": ["mappings"]
    })
}

fn keyword_plan_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "plans": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "word": { "type": "string" },
                        "plan": string_array()
                    },
                    "required": ["word", "plan"]
                }
            }
        },
        "required": ["plans"]
    })
}

fn structure_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "structure": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "narrative_plan": string_array(),
                        "key_facts": string_array(),
                        "difficulty": { "type": "string" },
                        "core_questions": string_array()
                    },
                    "required": ["title", "narrative_plan", "key_facts"]
                }
            },
            "general_plan": string_array(),
            "conversion_plan": string_array()
        },
        "required": ["structure", "general_plan"]
    })
}

fn authority_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "relevant_terms": string_array(),
            "combination_strategies": string_array()
        },
        "required": ["relevant_terms", "combination_strategies"]
    })
}
