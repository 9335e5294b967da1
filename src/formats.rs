use std::collections::HashSet;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleConfig {
    pub title: String,
    pub reference_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
    pub target_audience: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_outline: Option<String>,
    pub product_raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_brief: Option<ProductBrief>,
    pub authority_terms: String,
    pub website_type: String,
    pub scraped_images: Vec<ScrapedImage>,
    pub turbo_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_knowledge: Option<String>,
}

impl ArticleConfig {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read article config: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse article config: {}", path.display()))
    }

    /// Accepts YAML or JSON (JSON is a YAML subset).
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: ArticleConfig = serde_yaml::from_str(raw).context("deserialize config")?;
        if config.title.trim().is_empty() {
            anyhow::bail!("article config title is empty");
        }
        Ok(config)
    }

    /// Derived copy carrying a rendered product brief for the section prompts.
    pub fn with_brand_knowledge(&self, brief: Option<&ProductBrief>) -> Self {
        let mut derived = self.clone();
        derived.brand_knowledge = brief
            .filter(|brief| brief.has_product_name())
            .map(ProductBrief::render);
        derived
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductBrief {
    pub product_name: String,
    pub usp: String,
    pub features: Vec<String>,
    pub target_pain_points: Vec<String>,
    pub cta: String,
}

impl ProductBrief {
    pub fn has_product_name(&self) -> bool {
        !self.product_name.trim().is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = format!("Product: {}\n", self.product_name.trim());
        if !self.usp.trim().is_empty() {
            out.push_str(&format!("USP: {}\n", self.usp.trim()));
        }
        if !self.features.is_empty() {
            out.push_str(&format!("Features: {}\n", self.features.join("; ")));
        }
        if !self.target_pain_points.is_empty() {
            out.push_str(&format!(
                "Pain points solved: {}\n",
                self.target_pain_points.join("; ")
            ));
        }
        if !self.cta.trim().is_empty() {
            out.push_str(&format!("Call to action: {}\n", self.cta.trim()));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemProductMapping {
    pub pain_point: String,
    pub product_feature: String,
    pub relevance_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceStructure {
    pub structure: Vec<StructureSection>,
    pub general_plan: Vec<String>,
    pub conversion_plan: Vec<String>,
}

impl ReferenceStructure {
    /// Every key fact across all sections, first occurrence wins.
    pub fn all_key_points(&self) -> Vec<String> {
        let mut points = CoveredPoints::new();
        for section in &self.structure {
            points.extend(section.key_facts.iter().cloned());
        }
        points.into_vec()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureSection {
    pub title: String,
    pub narrative_plan: Vec<String>,
    pub key_facts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub core_questions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityAnalysis {
    pub relevant_terms: Vec<String>,
    pub combination_strategies: Vec<String>,
}

impl AuthorityAnalysis {
    pub fn is_empty(&self) -> bool {
        self.relevant_terms.is_empty() && self.combination_strategies.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordPlan {
    pub word: String,
    pub plan: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub title: String,
    pub content: String,
    pub images: Vec<ScrapedImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeFrontMatter {
    pub title: String,
    pub url: String,
    pub retrieved_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ScrapedImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationContext {
    pub config: ArticleConfig,
    pub product_brief: Option<ProductBrief>,
    pub product_mapping: Vec<ProblemProductMapping>,
    pub structure: ReferenceStructure,
    pub authority: AuthorityAnalysis,
    pub keyword_plans: Vec<KeywordPlan>,
    pub visual_style: String,
}

impl GenerationContext {
    pub fn all_key_points(&self) -> Vec<String> {
        self.structure.all_key_points()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPlanEntry {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_plan: Option<Vec<String>>,
}

impl SectionPlanEntry {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            specific_plan: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPlan {
    pub entries: Vec<SectionPlanEntry>,
    pub is_using_custom_outline: bool,
}

impl SectionPlan {
    pub fn titles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.title.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionResult {
    pub index: usize,
    pub title: String,
    pub content: String,
    pub used_points: Vec<String>,
    pub injected_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Analyzing,
    Streaming,
    Completed,
    Error,
}

/// Insertion-ordered, de-duplicated set of key facts already written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CoveredPoints {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl CoveredPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, point: impl Into<String>) -> bool {
        let point = point.into();
        if point.trim().is_empty() || self.seen.contains(&point) {
            return false;
        }
        self.seen.insert(point.clone());
        self.order.push(point);
        true
    }

    pub fn extend<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = String>,
    {
        for point in points {
            self.insert(point);
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

impl From<Vec<String>> for CoveredPoints {
    fn from(points: Vec<String>) -> Self {
        let mut covered = Self::new();
        covered.extend(points);
        covered
    }
}

impl From<CoveredPoints> for Vec<String> {
    fn from(points: CoveredPoints) -> Self {
        points.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covered_points_keep_first_insertion_order() {
        let mut points = CoveredPoints::new();
        assert!(points.insert("b"));
        assert!(points.insert("a"));
        assert!(!points.insert("b"));
        assert!(!points.insert("  "));
        points.extend(vec!["c".to_owned(), "a".to_owned()]);

        assert_eq!(points.as_slice(), ["b", "a", "c"]);
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn article_config_parses_yaml_with_defaults() -> anyhow::Result<()> {
        let config = ArticleConfig::parse(
            "title: Solar panels\n\
target_audience: homeowners\n\
sample_outline: |\n  Why solar\n  Costs\n",
        )?;
        assert_eq!(config.title, "Solar panels");
        assert!(!config.turbo_mode);
        assert!(config.scraped_images.is_empty());
        assert_eq!(config.sample_outline.as_deref(), Some("Why solar\nCosts\n"));
        Ok(())
    }

    #[test]
    fn article_config_requires_title() {
        let err = ArticleConfig::parse("{\"reference_content\": \"x\"}").unwrap_err();
        assert!(format!("{err:#}").contains("title is empty"));
    }

    #[test]
    fn brand_knowledge_is_only_derived_from_named_products() {
        let config = ArticleConfig {
            title: "t".to_owned(),
            ..ArticleConfig::default()
        };
        let unnamed = ProductBrief::default();
        assert!(config.with_brand_knowledge(Some(&unnamed)).brand_knowledge.is_none());

        let named = ProductBrief {
            product_name: "SunKit".to_owned(),
            features: vec!["fast install".to_owned()],
            ..ProductBrief::default()
        };
        let derived = config.with_brand_knowledge(Some(&named));
        let knowledge = derived.brand_knowledge.unwrap_or_default();
        assert!(knowledge.contains("Product: SunKit"));
        assert!(knowledge.contains("fast install"));
        assert!(config.brand_knowledge.is_none());
    }
}
