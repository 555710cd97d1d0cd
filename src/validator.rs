// src/validator.rs

//! Validator (§4.6, §6): a registry of read-only rules plus external
//! command validators, producing `ValidationIssue`s.
//!
//! Mirrors the aggregate-result shape of a batch editor's `MultiEditResult`,
//! adapted from "edits applied" to "issues found" bookkeeping.

use crate::ast::{AstParser, ParseResult, SymbolKind};
use crate::cache::{CacheContent, FileCache};
use crate::error::{Error, Result};
use crate::fs_service::FileSystemService;
use serde::Serialize;
use std::ops::Range;
use std::process::Command;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One finding produced by a rule or external command (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub severity: Severity,
    pub message: String,
    pub rule: String,
}

/// Everything a rule needs to inspect one file.
pub struct RuleContext<'a> {
    pub file_path: &'a str,
    pub content: &'a str,
    pub parse_result: &'a ParseResult,
}

/// A single validation rule. Built-ins below; callers may register more.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &RuleContext) -> Vec<ValidationIssue>;

    /// Byte-range replacements that would resolve this rule's findings for
    /// `ctx`. Default is no autofix; a rule opts in by overriding this.
    fn fix(&self, _ctx: &RuleContext) -> Vec<(Range<usize>, String)> {
        Vec::new()
    }
}

/// Rejects `console.*` calls left in source (built-in `no-console`).
pub struct NoConsole;
impl Rule for NoConsole {
    fn name(&self) -> &'static str {
        "no-console"
    }
    fn check(&self, ctx: &RuleContext) -> Vec<ValidationIssue> {
        ctx.content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains("console."))
            .map(|(idx, _)| ValidationIssue {
                file: ctx.file_path.to_string(),
                line: Some(idx + 1),
                column: None,
                severity: Severity::Warning,
                message: "console statement left in source".to_string(),
                rule: self.name().to_string(),
            })
            .collect()
    }

    fn fix(&self, ctx: &RuleContext) -> Vec<(Range<usize>, String)> {
        lines_matching(ctx.content, |line| line.contains("console."))
    }
}

/// Rejects `debugger` statements (built-in `no-debugger`).
pub struct NoDebugger;
impl Rule for NoDebugger {
    fn name(&self) -> &'static str {
        "no-debugger"
    }
    fn check(&self, ctx: &RuleContext) -> Vec<ValidationIssue> {
        ctx.content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.trim() == "debugger;" || line.trim() == "debugger")
            .map(|(idx, _)| ValidationIssue {
                file: ctx.file_path.to_string(),
                line: Some(idx + 1),
                column: None,
                severity: Severity::Error,
                message: "debugger statement left in source".to_string(),
                rule: self.name().to_string(),
            })
            .collect()
    }

    fn fix(&self, ctx: &RuleContext) -> Vec<(Range<usize>, String)> {
        lines_matching(ctx.content, |line| line.trim() == "debugger;" || line.trim() == "debugger")
    }
}

/// Byte ranges (including the trailing newline, if any) of every line in
/// `content` satisfying `predicate`, paired with an empty replacement —
/// i.e. "delete this line".
fn lines_matching(content: &str, predicate: impl Fn(&str) -> bool) -> Vec<(Range<usize>, String)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let end = offset + line.len();
        if predicate(line.strip_suffix('\n').unwrap_or(line)) {
            ranges.push((offset..end, String::new()));
        }
        offset = end;
    }
    ranges
}

/// Enforces camelCase functions / PascalCase classes (built-in `consistent-naming`).
pub struct ConsistentNaming;
impl Rule for ConsistentNaming {
    fn name(&self) -> &'static str {
        "consistent-naming"
    }
    fn check(&self, ctx: &RuleContext) -> Vec<ValidationIssue> {
        ctx.parse_result
            .symbols
            .iter()
            .filter_map(|sym| match sym.kind {
                SymbolKind::Function if !is_camel_case(&sym.name) => Some(ValidationIssue {
                    file: ctx.file_path.to_string(),
                    line: Some(sym.line),
                    column: None,
                    severity: Severity::Warning,
                    message: format!("function '{}' is not camelCase", sym.name),
                    rule: self.name().to_string(),
                }),
                SymbolKind::Class if !is_pascal_case(&sym.name) => Some(ValidationIssue {
                    file: ctx.file_path.to_string(),
                    line: Some(sym.line),
                    column: None,
                    severity: Severity::Warning,
                    message: format!("class '{}' is not PascalCase", sym.name),
                    rule: self.name().to_string(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Flags imports that don't resolve to a file under the same root (built-in `import-resolution`).
pub struct ImportResolution<'a> {
    pub fs: &'a FileSystemService,
}
impl Rule for ImportResolution<'_> {
    fn name(&self) -> &'static str {
        "import-resolution"
    }
    fn check(&self, ctx: &RuleContext) -> Vec<ValidationIssue> {
        ctx.parse_result
            .imports
            .iter()
            .filter(|import| import.starts_with('.'))
            .filter(|import| !self.fs.exists(import) && !self.fs.exists(&format!("{import}.rs")))
            .map(|import| ValidationIssue {
                file: ctx.file_path.to_string(),
                line: None,
                column: None,
                severity: Severity::Error,
                message: format!("import '{import}' does not resolve"),
                rule: self.name().to_string(),
            })
            .collect()
    }
}

fn is_camel_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_lowercase() || c == '_')
}

fn is_pascal_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

/// Runs built-in rules plus configured external commands over a file set (§4.6, §6).
pub struct Validator<'a> {
    fs: &'a FileSystemService,
    cache: &'a FileCache,
    ast: &'a dyn AstParser,
    rules: Vec<Box<dyn Rule + 'a>>,
}

impl<'a> Validator<'a> {
    /// Construct with the default built-in rule set.
    pub fn new(fs: &'a FileSystemService, cache: &'a FileCache, ast: &'a dyn AstParser) -> Self {
        let rules: Vec<Box<dyn Rule + 'a>> = vec![
            Box::new(NoConsole),
            Box::new(NoDebugger),
            Box::new(ConsistentNaming),
            Box::new(ImportResolution { fs }),
        ];
        Self { fs, cache, ast, rules }
    }

    pub fn run_files(&self, files: &[String], checks: &[String]) -> Result<Vec<ValidationIssue>> {
        let active: Vec<&Box<dyn Rule + 'a>> = if checks.is_empty() {
            self.rules.iter().collect()
        } else {
            self.rules.iter().filter(|r| checks.iter().any(|c| c == r.name())).collect()
        };

        let mut issues = Vec::new();
        for file in files {
            let content = match self.cache.get(self.fs, file)? {
                CacheContent::Text(t) => t,
                CacheContent::Binary => continue,
            };
            let parse_result = self.ast.parse(file, &content);
            let ctx = RuleContext { file_path: file, content: &content, parse_result: &parse_result };
            for rule in &active {
                issues.extend(rule.check(&ctx));
            }
        }
        Ok(issues)
    }

    /// Apply autofix: for each file, gather every active rule's `fix()`
    /// ranges, then splice them into the content in reverse-offset order
    /// (highest start first) so earlier byte offsets stay valid as later
    /// ranges are applied, and write the result back atomically (§4.6).
    /// Returns the paths actually modified.
    pub fn apply_fixes(&self, files: &[String], checks: &[String]) -> Result<Vec<String>> {
        let active: Vec<&Box<dyn Rule + 'a>> = if checks.is_empty() {
            self.rules.iter().collect()
        } else {
            self.rules.iter().filter(|r| checks.iter().any(|c| c == r.name())).collect()
        };

        let mut fixed = Vec::new();
        for file in files {
            let content = match self.cache.get(self.fs, file)? {
                CacheContent::Text(t) => t,
                CacheContent::Binary => continue,
            };
            let parse_result = self.ast.parse(file, &content);
            let ctx = RuleContext { file_path: file, content: &content, parse_result: &parse_result };

            let mut ranges: Vec<(Range<usize>, String)> =
                active.iter().flat_map(|rule| rule.fix(&ctx)).collect();
            if ranges.is_empty() {
                continue;
            }
            ranges.sort_by(|a, b| b.0.start.cmp(&a.0.start));

            let mut patched = content.clone();
            for (range, replacement) in ranges {
                patched.replace_range(range, &replacement);
            }

            self.fs.write_many(&[(file.clone(), patched.into_bytes())])?;
            self.cache.invalidate(file);
            fixed.push(file.clone());
        }
        Ok(fixed)
    }

    /// Run configured external validator commands (e.g. a linter binary),
    /// reporting a nonzero exit as a single `ValidationIssue`, not an `Error`
    /// (§4.6: the command itself failing to launch is `ExternalCommandFailed`).
    pub fn run_commands(&self, commands: &[String]) -> Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        for command in commands {
            let mut parts = command.split_whitespace();
            let program = parts.next().ok_or_else(|| Error::ExternalCommandFailed("empty command".into()))?;
            let output = Command::new(program)
                .args(parts)
                .current_dir(self.fs.guard().root())
                .output()
                .map_err(|e| Error::ExternalCommandFailed(format!("{command}: {e}")))?;
            if !output.status.success() {
                issues.push(ValidationIssue {
                    file: command.clone(),
                    line: None,
                    column: None,
                    severity: Severity::Error,
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    rule: "external-command".to_string(),
                });
            }
        }
        Ok(issues)
    }
}
