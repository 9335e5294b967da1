use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::cli::PlanArgs;
use crate::formats::{ArticleConfig, ReferenceStructure, SectionPlan, SectionPlanEntry};

/// Prints the plan that is known before analysis, one title per line.
pub fn run(args: PlanArgs) -> anyhow::Result<()> {
    let config = ArticleConfig::from_path(Path::new(&args.config))?;
    let plan = build_section_plan(config.sample_outline.as_deref(), None);

    let mut stdout = std::io::stdout().lock();
    for title in plan.titles() {
        writeln!(stdout, "{title}").context("write plan")?;
    }
    stdout.flush().context("flush plan")?;
    Ok(())
}

pub const FALLBACK_SECTIONS: [&str; 5] = [
    "Introduction",
    "Core Concepts",
    "Benefits",
    "Applications",
    "Conclusion",
];

/// Chooses the sections to write. A user outline wins over the analyzed
/// structure, which wins over the fixed skeleton.
pub fn build_section_plan(
    sample_outline: Option<&str>,
    structure: Option<&ReferenceStructure>,
) -> SectionPlan {
    let custom = sample_outline.map(parse_outline).unwrap_or_default();
    if !custom.is_empty() {
        return SectionPlan {
            entries: custom,
            is_using_custom_outline: true,
        };
    }

    if let Some(structure) = structure
        && !structure.structure.is_empty()
    {
        let entries = structure
            .structure
            .iter()
            .map(|section| SectionPlanEntry {
                title: section.title.clone(),
                specific_plan: Some(section.narrative_plan.clone()),
            })
            .collect();
        return SectionPlan {
            entries,
            is_using_custom_outline: false,
        };
    }

    SectionPlan {
        entries: FALLBACK_SECTIONS
            .iter()
            .map(|title| SectionPlanEntry::titled(*title))
            .collect(),
        is_using_custom_outline: false,
    }
}

fn parse_outline(outline: &str) -> Vec<SectionPlanEntry> {
    outline
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(SectionPlanEntry::titled)
        .collect()
}
