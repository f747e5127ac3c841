// src/shader/preprocessor.rs
//! A small C-style preprocessor for WGSL sources.
//!
//! Supported directives:
//!
//! | Directive | Meaning |
//! |---|---|
//! | `#include "name"` | splice another library source (depth ≤ 16) |
//! | `#define NAME [value]` / `#undef NAME` | local object-like macros |
//! | `#ifdef` / `#ifndef` / `#if` / `#elif` / `#else` / `#endif` | conditionals |
//!
//! `#if` / `#elif` accept `defined(NAME)` terms (optionally negated with `!`)
//! joined by `||` or `&&`; `&&` binds tighter. Every active non-directive line
//! has each defined identifier replaced by its value, which is how material
//! snippets reach the shader body.

use std::collections::BTreeMap;

use thiserror::Error;

const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("line {line}: unknown include \"{name}\"")]
    UnknownInclude { name: String, line: usize },
    #[error("include depth exceeded while including \"{name}\"")]
    IncludeDepth { name: String },
    #[error("line {line}: unknown directive #{directive}")]
    UnknownDirective { directive: String, line: usize },
    #[error("line {line}: malformed condition `{condition}`")]
    MalformedCondition { condition: String, line: usize },
    #[error("line {line}: #{directive} without matching #if")]
    Unbalanced { directive: &'static str, line: usize },
    #[error("line {line}: #if is never closed")]
    MissingEndif { line: usize },
}

/// Resolves `#include` names to source text.
pub trait IncludeResolver {
    fn resolve(&self, name: &str) -> Option<&str>;
}

impl IncludeResolver for BTreeMap<String, String> {
    fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// Ordered define set. Ordering keeps preprocessed output and fingerprints stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defines {
    map: BTreeMap<String, String>,
}

impl Defines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a flag with an empty value.
    pub fn define(&mut self, name: impl Into<String>) -> &mut Self {
        self.map.insert(name.into(), String::new());
        self
    }

    pub fn define_value(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.map.insert(name.into(), value.into());
        self
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn extend(&mut self, other: &Defines) {
        for (name, value) in &other.map {
            self.map.insert(name.clone(), value.clone());
        }
    }
}

struct Conditional {
    /// Enclosing region is active.
    parent_active: bool,
    /// This branch is active.
    active: bool,
    /// Some branch of this chain has been taken.
    taken: bool,
    seen_else: bool,
    opened_at: usize,
}

/// Run the preprocessor over `source`.
pub fn preprocess(
    source: &str,
    defines: &Defines,
    includes: &dyn IncludeResolver,
) -> Result<String, PreprocessError> {
    let mut state = State {
        includes,
        locals: defines.clone(),
        stack: Vec::new(),
        out: String::with_capacity(source.len()),
    };
    state.walk(source, 0)?;

    if let Some(open) = state.stack.last() {
        return Err(PreprocessError::MissingEndif { line: open.opened_at });
    }
    Ok(state.out)
}

/// Walk state shared by the top-level source and everything it includes.
/// Defines and open conditionals carry across include boundaries, so
/// `#ifndef X_H` guards work.
struct State<'a> {
    includes: &'a dyn IncludeResolver,
    locals: Defines,
    stack: Vec<Conditional>,
    out: String,
}

impl State<'_> {
    fn active(&self) -> bool {
        self.stack.last().map_or(true, |c| c.active)
    }

    fn walk(&mut self, source: &str, depth: usize) -> Result<(), PreprocessError> {
        for (index, text) in source.lines().enumerate() {
            let line = index + 1;
            let active = self.active();
            let trimmed = text.trim_start();

            let Some(directive_text) = trimmed.strip_prefix('#') else {
                if active {
                    substitute(text, &self.locals, &mut self.out);
                    self.out.push('\n');
                }
                continue;
            };

            let (directive, rest) = split_directive(directive_text);
            match directive {
                "include" if active => {
                    let name = rest.trim_matches(|c| c == '"' || c == '<' || c == '>');
                    if depth >= MAX_INCLUDE_DEPTH {
                        return Err(PreprocessError::IncludeDepth { name: name.to_string() });
                    }
                    let includes = self.includes;
                    let included = includes.resolve(name).ok_or_else(|| PreprocessError::UnknownInclude {
                        name: name.to_string(),
                        line,
                    })?;
                    self.walk(included, depth + 1)?;
                }
                "include" => {}
                "ifdef" | "ifndef" | "if" => {
                    let condition = if active {
                        match directive {
                            "ifdef" => self.locals.is_defined(rest),
                            "ifndef" => !self.locals.is_defined(rest),
                            _ => evaluate(rest, &self.locals, line)?,
                        }
                    } else {
                        false
                    };
                    self.stack.push(Conditional {
                        parent_active: active,
                        active: active && condition,
                        taken: condition,
                        seen_else: false,
                        opened_at: line,
                    });
                }
                "elif" => {
                    let top = self
                        .stack
                        .last_mut()
                        .ok_or(PreprocessError::Unbalanced { directive: "elif", line })?;
                    if top.seen_else {
                        return Err(PreprocessError::Unbalanced { directive: "elif", line });
                    }
                    let condition = top.parent_active && !top.taken && evaluate(rest, &self.locals, line)?;
                    top.active = condition;
                    top.taken |= condition;
                }
                "else" => {
                    let top = self
                        .stack
                        .last_mut()
                        .ok_or(PreprocessError::Unbalanced { directive: "else", line })?;
                    if top.seen_else {
                        return Err(PreprocessError::Unbalanced { directive: "else", line });
                    }
                    top.seen_else = true;
                    top.active = top.parent_active && !top.taken;
                    top.taken = true;
                }
                "endif" => {
                    if self.stack.pop().is_none() {
                        return Err(PreprocessError::Unbalanced { directive: "endif", line });
                    }
                }
                "define" if active => {
                    let (name, value) = split_directive(rest);
                    self.locals.define_value(name, value);
                }
                "undef" if active => {
                    self.locals.map.remove(rest);
                }
                "define" | "undef" => {}
                other => {
                    return Err(PreprocessError::UnknownDirective {
                        directive: other.to_string(),
                        line,
                    })
                }
            }
        }
        Ok(())
    }
}

fn split_directive(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim()),
        None => (text, ""),
    }
}

fn evaluate(condition: &str, defines: &Defines, line: usize) -> Result<bool, PreprocessError> {
    let malformed = || PreprocessError::MalformedCondition {
        condition: condition.to_string(),
        line,
    };
    if condition.trim().is_empty() {
        return Err(malformed());
    }
    let mut any = false;
    for alternative in condition.split("||") {
        let mut all = true;
        for term in alternative.split("&&") {
            all &= evaluate_term(term.trim(), defines).ok_or_else(malformed)?;
        }
        any |= all;
    }
    Ok(any)
}

fn evaluate_term(term: &str, defines: &Defines) -> Option<bool> {
    if let Some(inner) = term.strip_prefix('!') {
        return evaluate_term(inner.trim(), defines).map(|v| !v);
    }
    match term {
        "0" => return Some(false),
        "1" => return Some(true),
        _ => {}
    }
    let name = term.strip_prefix("defined")?.trim();
    let name = name
        .strip_prefix('(')
        .and_then(|n| n.strip_suffix(')'))
        .unwrap_or(name)
        .trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(defines.is_defined(name))
}

/// Replace every defined identifier in `line`, appending to `out`.
fn substitute(line: &str, defines: &Defines, out: &mut String) {
    let mut chars = line.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c.is_ascii_alphabetic() || c == '_' {
            let mut end = start + c.len_utf8();
            while let Some(&(i, n)) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    end = i + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let ident = &line[start..end];
            match defines.get(ident) {
                Some(value) => out.push_str(value),
                None => out.push_str(ident),
            }
        } else if c.is_ascii_digit() {
            // Numeric literals such as `1.0e5` or `2u` are never identifiers.
            out.push(c);
            while let Some(&(_, n)) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' || n == '.' {
                    out.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
}
