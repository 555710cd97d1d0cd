// src/analyzer.rs

//! Analyzer (§4.6): read-only symbol/import/export extraction, optional
//! dependency graph construction, and complexity metrics over a glob of
//! paths.

use crate::ast::{AstParser, Symbol};
use crate::cache::{CacheContent, FileCache};
use crate::depgraph::{Cycle, DependencyGraph};
use crate::error::Result;
use crate::fs_service::{FileSystemService, GlobOptions};
use crate::types::ExtractKind;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

/// Cyclomatic + cognitive-heuristic + LOC complexity for one file.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ComplexityMetrics {
    pub lines_of_code: usize,
    pub cyclomatic: usize,
    pub cognitive: usize,
}

/// Per-file analysis output (§4.6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileAnalysis {
    pub path: String,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub pattern_matches: Vec<String>,
    pub complexity: ComplexityMetrics,
    pub parse_errors: Vec<String>,
}

/// Aggregate result of an `Analyze` operation.
#[derive(Debug, Default, Serialize)]
pub struct AnalysisReport {
    pub files: Vec<FileAnalysis>,
    pub dependency_cycles: Vec<Cycle>,
}

/// Expands globs, retrieves cached content, and extracts the requested
/// facets (§4.6). Read-only: never writes through the File System Service.
pub struct Analyzer<'a> {
    fs: &'a FileSystemService,
    cache: &'a FileCache,
    ast: &'a dyn AstParser,
}

impl<'a> Analyzer<'a> {
    pub fn new(fs: &'a FileSystemService, cache: &'a FileCache, ast: &'a dyn AstParser) -> Self {
        Self { fs, cache, ast }
    }

    pub fn analyze(
        &self,
        paths: &[String],
        extract: &HashSet<ExtractKind>,
        patterns: &[String],
        build_dependency_graph: bool,
    ) -> Result<AnalysisReport> {
        let files = self.fs.glob(paths, &GlobOptions::default())?;
        let compiled_patterns: Vec<Regex> = patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        let mut report = AnalysisReport::default();
        let mut graph = DependencyGraph::new();

        for file in &files {
            let content = match self.cache.get(self.fs, file)? {
                CacheContent::Text(t) => t,
                CacheContent::Binary => continue,
            };

            let parsed = self.ast.parse(file, &content);

            let mut analysis = FileAnalysis { path: file.clone(), ..Default::default() };
            if extract.is_empty() || extract.contains(&ExtractKind::Symbols) {
                analysis.symbols = parsed.symbols.clone();
            }
            if extract.is_empty() || extract.contains(&ExtractKind::Imports) {
                analysis.imports = parsed.imports.clone();
            }
            if extract.is_empty() || extract.contains(&ExtractKind::Exports) {
                analysis.exports = parsed.exports.clone();
            }
            analysis.parse_errors = parsed.errors;
            analysis.complexity = compute_complexity(&content);

            for pattern in &compiled_patterns {
                if pattern.is_match(&content) {
                    analysis.pattern_matches.push(pattern.as_str().to_string());
                }
            }

            if build_dependency_graph {
                graph.node(file);
                for import in &parsed.imports {
                    let resolved = resolve_relative_import(file, import);
                    if files.contains(&resolved) {
                        graph.add_edge(file, &resolved);
                    }
                }
            }

            report.files.push(analysis);
        }

        if build_dependency_graph {
            report.dependency_cycles = graph.find_cycles();
        }

        Ok(report)
    }
}

/// Best-effort resolution of a `./relative` or `../relative` import against
/// the importing file's directory, appending a `.rs` extension heuristic
/// when the import is extensionless (mirrors `RegexAstParser`'s narrow
/// single-language-agnostic scope).
fn resolve_relative_import(from: &str, import: &str) -> String {
    if !import.starts_with('.') {
        return import.to_string();
    }
    let base = std::path::Path::new(from).parent().unwrap_or(std::path::Path::new(""));
    let joined = base.join(import);
    let normalized = path_clean(&joined);
    if std::path::Path::new(&normalized).extension().is_none() {
        format!("{normalized}.rs")
    } else {
        normalized
    }
}

fn path_clean(path: &std::path::Path) -> String {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                parts.pop();
            }
            std::path::Component::Normal(c) => parts.push(c.to_os_string()),
            _ => {}
        }
    }
    parts
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// LOC plus a cyclomatic approximation (branch keyword count + 1) and a
/// cognitive-heuristic approximation (branch keywords weighted by nesting
/// depth via brace counting).
fn compute_complexity(content: &str) -> ComplexityMetrics {
    const BRANCH_KEYWORDS: &[&str] = &["if ", "else if", "for ", "while ", "match ", "case ", "catch", "&&", "||", "?"];

    let lines_of_code = content.lines().filter(|l| !l.trim().is_empty()).count();

    let mut cyclomatic = 1;
    let mut cognitive = 0;
    let mut depth: usize = 0;

    for line in content.lines() {
        let trimmed = line.trim();
        for kw in BRANCH_KEYWORDS {
            if trimmed.contains(kw) {
                cyclomatic += 1;
                cognitive += 1 + depth;
            }
        }
        depth = depth.saturating_add(trimmed.matches('{').count());
        depth = depth.saturating_sub(trimmed.matches('}').count());
    }

    ComplexityMetrics { lines_of_code, cyclomatic, cognitive }
}
