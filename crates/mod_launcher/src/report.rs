//! Rendering of the final load report.

use crate::cli::ReportFormat;
use mod_loader::{Environment, LoadReport, LoaderError, ModuleRegistry};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleEntry {
    pub id: String,
    pub version: String,
    pub origin: String,
}

/// Everything worth showing about a successful load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary {
    pub environment: Environment,
    pub candidates: usize,
    pub modules: Vec<ModuleEntry>,
    pub disabled: Vec<String>,
    pub not_applicable: Vec<String>,
    pub warnings: Vec<String>,
    pub parse_errors: Vec<String>,
}

impl LoadSummary {
    pub fn new(environment: Environment, report: &LoadReport, registry: &ModuleRegistry) -> Self {
        let modules = registry
            .modules()
            .iter()
            .map(|module| ModuleEntry {
                id: module.id().to_string(),
                version: module.version().to_string(),
                origin: module.origin().to_string(),
            })
            .collect();

        Self {
            environment,
            candidates: report.candidates,
            modules,
            disabled: report.disabled.clone(),
            not_applicable: report.not_applicable.clone(),
            warnings: report.warnings.iter().map(ToString::to_string).collect(),
            parse_errors: report.parse_errors.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Loaded {} of {} candidate(s) for {}:",
            self.modules.len(),
            self.candidates,
            self.environment
        );
        for module in &self.modules {
            let _ = writeln!(out, "  - {} {} ({})", module.id, module.version, module.origin);
        }

        section(&mut out, "Disabled", &self.disabled);
        section(&mut out, "Not applicable to this environment", &self.not_applicable);
        section(&mut out, "Warnings", &self.warnings);
        section(&mut out, "Ignored descriptors", &self.parse_errors);
        out
    }

    pub fn render(&self, format: ReportFormat) -> anyhow::Result<String> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

fn section(out: &mut String, title: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for line in lines {
        let _ = writeln!(out, "  - {line}");
    }
}

/// Renders a failed load as a status tree.
pub fn render_failure(error: &LoaderError, format: ReportFormat) -> anyhow::Result<String> {
    let tree = error.to_status_tree();
    match format {
        ReportFormat::Text => Ok(tree.render_text()),
        ReportFormat::Json => Ok(tree.to_json()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mod_loader::{
        CandidatePool, DependencyOverrides, LoaderConfig, LoaderContext, ModuleCandidate, ModuleMetadata,
        Origin,
    };

    fn load(modules: Vec<ModuleMetadata>) -> (LoaderContext, Result<LoadReport, LoaderError>) {
        let pool = CandidatePool::new();
        for metadata in modules {
            let origin = Origin::new(format!("mods/{}.json", metadata.id()));
            pool.add(ModuleCandidate::new(metadata, origin));
        }
        let context = LoaderContext::new(LoaderConfig::default(), DependencyOverrides::new());
        let result = context.load_from_pool(&pool);
        (context, result)
    }

    #[test]
    fn test_summary_lists_modules_and_warnings() {
        let (context, result) = load(vec![
            ModuleMetadata::builder("core", "1.0.0").build().unwrap(),
            ModuleMetadata::builder("extras", "0.2.0")
                .recommends("shiny", "*")
                .build()
                .unwrap(),
        ]);
        let report = result.unwrap();
        let summary = LoadSummary::new(Environment::Client, &report, context.registry().unwrap());

        assert_eq!(summary.modules.len(), 2);
        assert_eq!(summary.warnings.len(), 1);

        let text = summary.render(ReportFormat::Text).unwrap();
        assert!(text.starts_with("Loaded 2 of 2 candidate(s) for client:"));
        assert!(text.contains("  - core 1.0.0 (mods/core.json)"));
        assert!(text.contains("Warnings:"));
        assert!(!text.contains("Disabled:"));

        let json: serde_json::Value =
            serde_json::from_str(&summary.render(ReportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["environment"], "client");
        assert_eq!(json["modules"][1]["id"], "extras");
    }

    #[test]
    fn test_failure_renders_status_tree() {
        let (_, result) = load(vec![ModuleMetadata::builder("app", "1.0.0")
            .depends("missing", ">=1.0.0")
            .build()
            .unwrap()]);
        let error = result.unwrap_err();

        let text = render_failure(&error, ReportFormat::Text).unwrap();
        assert!(text.contains("[x]"));
        assert!(text.contains("missing"));

        let json: serde_json::Value =
            serde_json::from_str(&render_failure(&error, ReportFormat::Json).unwrap()).unwrap();
        assert!(json.is_object());
    }
}
