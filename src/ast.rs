// src/ast.rs

//! AST Parser Service (§2, §6): external collaborator contract.
//!
//! Real language parsing lives outside this crate's scope — only the
//! narrow `{symbols, imports, exports, errors}` contract the Analyzer and
//! Editor consume is binding here. This module defines that contract as a
//! trait, plus a regex-based default implementation covering common
//! C-family/Python/Rust syntax well enough to exercise the Analyzer and
//! `validateSyntax` end to end without a real language toolchain
//! dependency.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Kind of symbol a parser can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
}

/// One named declaration found in a file.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-indexed line of the declaration.
    pub line: usize,
}

/// Result of parsing one file (§6 "AST parser external collaborator").
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub errors: Vec<String>,
}

/// Narrow external-collaborator contract: produce `{symbols, imports,
/// exports, errors}` for one file's content. Implementations may be
/// per-language; the Analyzer and Editor only depend on this trait.
pub trait AstParser: Send + Sync {
    fn parse(&self, path: &str, content: &str) -> ParseResult;
}

/// Regex-driven parser covering function/class/variable declarations and
/// import/export statements across a handful of common syntaxes. Not a
/// real language grammar — sufficient for symbol inventories, dependency
/// graphs, and `validateSyntax`'s "does this still look well-formed" check.
#[derive(Debug, Default)]
pub struct RegexAstParser;

struct Patterns {
    function: Regex,
    class: Regex,
    variable: Regex,
    import: Regex,
    export: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        function: Regex::new(
            r"(?:^|\s)(?:pub\s+)?(?:async\s+)?(?:fn|function|def)\s+([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("static regex"),
        class: Regex::new(r"(?:^|\s)(?:pub\s+)?(?:class|struct|interface)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static regex"),
        variable: Regex::new(r"(?:^|\s)(?:pub\s+)?(?:let|const|var)\s+(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static regex"),
        import: Regex::new(
            r#"(?:^|\s)(?:use\s+([A-Za-z0-9_:]+)|import\s+.*?from\s+["']([^"']+)["']|require\(["']([^"']+)["']\))"#,
        )
        .expect("static regex"),
        export: Regex::new(
            r"(?:^|\s)(?:export\s+(?:default\s+)?(?:function\s+|class\s+|const\s+|let\s+|var\s+)?|pub\s+(?:fn\s+|struct\s+|const\s+|static\s+|enum\s+|trait\s+|mod\s+)?)([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("static regex"),
    })
}

impl AstParser for RegexAstParser {
    fn parse(&self, _path: &str, content: &str) -> ParseResult {
        let patterns = patterns();
        let mut result = ParseResult::default();

        for (idx, line) in content.lines().enumerate() {
            let lineno = idx + 1;
            if let Some(caps) = patterns.function.captures(line) {
                result.symbols.push(Symbol {
                    name: caps[1].to_string(),
                    kind: SymbolKind::Function,
                    line: lineno,
                });
            }
            if let Some(caps) = patterns.class.captures(line) {
                result.symbols.push(Symbol {
                    name: caps[1].to_string(),
                    kind: SymbolKind::Class,
                    line: lineno,
                });
            }
            if let Some(caps) = patterns.variable.captures(line) {
                result.symbols.push(Symbol {
                    name: caps[1].to_string(),
                    kind: SymbolKind::Variable,
                    line: lineno,
                });
            }
            if let Some(caps) = patterns.import.captures(line) {
                let module = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().to_string());
                if let Some(module) = module {
                    result.imports.push(module);
                }
            }
            if line.trim_start().starts_with("export") || line.trim_start().starts_with("pub ") {
                if let Some(caps) = patterns.export.captures(line) {
                    result.exports.push(caps[1].to_string());
                }
            }
        }

        result
    }
}
