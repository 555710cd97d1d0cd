// src/editor.rs

//! Editor (§4.5): applies `FindReplace`/`Line`/`Position` changes to cached
//! file content, in declared order, then writes the result atomically and
//! invalidates the cache entry — unless `dryRun`.

use crate::ast::AstParser;
use crate::cache::{CacheContent, FileCache};
use crate::error::{Error, Result};
use crate::fs_service::FileSystemService;
use crate::types::{Change, FileEdit, LineOp};
use regex::Regex;
use serde::Serialize;

/// Outcome of applying one `FileEdit`.
#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub file: String,
    /// Number of changes applied (zero-match changes count as 0, not errors).
    pub changes_applied: usize,
    pub syntax_errors: Vec<String>,
    /// Set when `dryRun`: a preview of the content that would have been
    /// written, truncated to a bounded number of bytes.
    pub preview: Option<String>,
}

const DRY_RUN_PREVIEW_BYTES: usize = 2048;

/// Applies declared textual mutations against cached content (§4.5).
pub struct Editor<'a> {
    fs: &'a FileSystemService,
    cache: &'a FileCache,
    ast: &'a dyn AstParser,
}

impl<'a> Editor<'a> {
    pub fn new(fs: &'a FileSystemService, cache: &'a FileCache, ast: &'a dyn AstParser) -> Self {
        Self { fs, cache, ast }
    }

    pub fn apply(&self, edit: &FileEdit, validate_syntax: bool, preserve_formatting: bool, dry_run: bool) -> Result<EditOutcome> {
        let existed = self.fs.exists(&edit.file);
        if !existed && !edit.create_if_missing {
            return Err(Error::NotFound(edit.file.clone().into()));
        }

        let original = if existed {
            match self.cache.get(self.fs, &edit.file)? {
                CacheContent::Text(t) => t,
                CacheContent::Binary => return Err(Error::Binary(edit.file.clone().into())),
            }
        } else {
            String::new()
        };

        let line_ending = if preserve_formatting && original.contains("\r\n") { "\r\n" } else { "\n" };

        let mut content = original.clone();
        let mut changes_applied = 0usize;
        for change in &edit.changes {
            let (next, applied) = self.apply_change(&content, change)?;
            content = next;
            changes_applied += applied;
        }

        if preserve_formatting {
            content = normalize_line_endings(&content, line_ending);
        }

        let mut syntax_errors = Vec::new();
        if validate_syntax {
            let parsed = self.ast.parse(&edit.file, &content);
            syntax_errors = parsed.errors;
        }

        if dry_run {
            let preview: String = content.chars().take(DRY_RUN_PREVIEW_BYTES).collect();
            return Ok(EditOutcome { file: edit.file.clone(), changes_applied, syntax_errors, preview: Some(preview) });
        }

        self.fs.write_many(&[(edit.file.clone(), content.into_bytes())])?;
        self.cache.invalidate(&edit.file);

        Ok(EditOutcome { file: edit.file.clone(), changes_applied, syntax_errors, preview: None })
    }

    /// Returns the content after the change plus the number of matches/edits applied.
    fn apply_change(&self, content: &str, change: &Change) -> Result<(String, usize)> {
        match change {
            Change::FindReplace { find, replace, regex, replace_all } => {
                self.apply_find_replace(content, find, replace, *regex, *replace_all)
            }
            Change::Line { line, operation, content: new_content } => {
                Ok(apply_line_change(content, *line, *operation, new_content.as_deref()))
            }
            Change::Position { start, end, content: new_content } => {
                Ok(apply_position_change(content, *start, *end, new_content))
            }
            Change::Ast { .. } => Err(Error::Unsupported("Ast change variant is not implemented".into())),
        }
    }

    fn apply_find_replace(
        &self,
        content: &str,
        find: &str,
        replace: &str,
        regex: bool,
        replace_all: bool,
    ) -> Result<(String, usize)> {
        if regex {
            let re = Regex::new(find).map_err(|e| Error::RegexInvalid { pattern: find.to_string(), reason: e.to_string() })?;
            let mut count = 0;
            let result = if replace_all {
                re.replace_all(content, |_: &regex::Captures| {
                    count += 1;
                    replace.to_string()
                })
                .into_owned()
            } else if let Some(m) = re.find(content) {
                count = 1;
                format!("{}{}{}", &content[..m.start()], replace, &content[m.end()..])
            } else {
                content.to_string()
            };
            Ok((result, count))
        } else if replace_all {
            let count = content.matches(find).count();
            Ok((content.replace(find, replace), count))
        } else if let Some(pos) = content.find(find) {
            let mut result = String::with_capacity(content.len());
            result.push_str(&content[..pos]);
            result.push_str(replace);
            result.push_str(&content[pos + find.len()..]);
            Ok((result, 1))
        } else {
            Ok((content.to_string(), 0))
        }
    }
}

fn apply_line_change(content: &str, line: usize, op: LineOp, new_content: Option<&str>) -> (String, usize) {
    let mut lines: Vec<&str> = content.split('\n').collect();
    // `split('\n')` on a trailing-newline file yields a spurious empty last
    // element; strip it so line numbers match what an editor would show.
    let had_trailing_newline = content.ends_with('\n');
    if had_trailing_newline {
        lines.pop();
    }

    if line == 0 {
        return (content.to_string(), 0);
    }

    let idx = line - 1;
    let applied = match op {
        LineOp::Insert => {
            if idx > lines.len() {
                0
            } else {
                lines.insert(idx, new_content.unwrap_or(""));
                1
            }
        }
        LineOp::Replace => {
            if idx >= lines.len() {
                0
            } else {
                lines[idx] = new_content.unwrap_or("");
                1
            }
        }
        LineOp::Delete => {
            if idx >= lines.len() {
                0
            } else {
                lines.remove(idx);
                1
            }
        }
    };

    let mut result = lines.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    (result, applied)
}

fn apply_position_change(content: &str, start: usize, end: usize, new_content: &str) -> (String, usize) {
    if start > end || end > content.len() || !content.is_char_boundary(start) || !content.is_char_boundary(end) {
        return (content.to_string(), 0);
    }
    let mut result = String::with_capacity(content.len() + new_content.len());
    result.push_str(&content[..start]);
    result.push_str(new_content);
    result.push_str(&content[end..]);
    (result, 1)
}

fn normalize_line_endings(content: &str, ending: &str) -> String {
    let unified = content.replace("\r\n", "\n");
    if ending == "\r\n" {
        unified.replace('\n', "\r\n")
    } else {
        unified
    }
}
