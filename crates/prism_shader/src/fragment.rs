//! Code Fragments
//!
//! A [`CodeFragment`] is a block of shader source with zero or more include
//! references to other fragments at byte offsets of its raw text. Shared
//! fragments live in a [`FragmentStore`] and are referenced by [`FragmentId`];
//! a reference whose fragment was removed resolves to
//! [`ShaderError::DanglingFragment`] instead of undefined behaviour.
//!
//! # Assembly
//!
//! [`FragmentStore::assemble`] splices every include, depth-first, into the
//! raw text at its recorded offset. Including the same fragment twice yields
//! two independent copies. A fragment that transitively includes itself fails
//! with [`ShaderError::CyclicDependency`].
//!
//! # Directives
//!
//! [`scan_source`] turns authored text into raw text plus pending includes:
//! the `#include "name"` directive is cut out (from `#` to the closing quote)
//! and its position recorded. It also collects the flag names referenced by
//! `#ifdef` / `#ifndef`, which later map to flag bits against a vocabulary.

use prism_core::Generation;
use prism_core::interner::{self, Symbol};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::errors::{ParseError, Result, ShaderError};
use crate::flags::{FlagMask, FlagVocabulary};

new_key_type! {
    /// Key of a shared fragment in a [`FragmentStore`].
    pub struct FragmentId;
}

/// One include reference: `target` is spliced in at byte `offset` of the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub target: FragmentId,
    pub offset: usize,
}

/// An include directive found by [`scan_source`], not yet resolved to an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInclude {
    pub name: String,
    pub offset: usize,
    pub line: u32,
}

/// Result of scanning authored source text.
#[derive(Debug, Clone, Default)]
pub struct ScannedSource {
    /// Source with include directives removed.
    pub text: String,
    pub includes: Vec<PendingInclude>,
    pub flag_refs: SmallVec<[Symbol; 4]>,
}

/// Splits a preprocessor line into `(keyword, rest)` when it is a directive.
pub(crate) fn directive(line: &str) -> Option<(&str, &str)> {
    let body = line.trim_start().strip_prefix('#')?.trim_start();
    let len = body
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(body.len());
    Some((&body[..len], body[len..].trim()))
}

/// First identifier of a directive argument.
pub(crate) fn directive_ident(rest: &str) -> Option<&str> {
    let len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (len > 0).then(|| &rest[..len])
}

fn push_flag_ref(refs: &mut SmallVec<[Symbol; 4]>, name: &str) {
    let sym = interner::intern(name);
    if !refs.contains(&sym) {
        refs.push(sym);
    }
}

fn collect_flag_refs(text: &str) -> SmallVec<[Symbol; 4]> {
    let mut refs = SmallVec::new();
    for line in text.lines() {
        if let Some(("ifdef" | "ifndef", rest)) = directive(line)
            && let Some(name) = directive_ident(rest)
        {
            push_flag_ref(&mut refs, name);
        }
    }
    refs
}

/// Extracts include directives and flag references from authored text.
///
/// `first_line` is the line number of `source` within its file, used for errors.
pub fn scan_source(
    source_name: &str,
    source: &str,
    first_line: u32,
) -> std::result::Result<ScannedSource, ParseError> {
    let mut scanned = ScannedSource {
        text: String::with_capacity(source.len()),
        ..Default::default()
    };

    for (idx, line) in source.split_inclusive('\n').enumerate() {
        let line_no = first_line + idx as u32;

        match directive(line) {
            Some(("include", rest)) => {
                let (open, close) = match rest.chars().next() {
                    Some('"') => ('"', '"'),
                    Some('<') => ('<', '>'),
                    _ => {
                        return Err(ParseError::new(
                            source_name,
                            line_no,
                            "malformed #include directive, expected \"name\"",
                        ));
                    }
                };

                let hash_pos = line.find('#').unwrap_or(0);
                let open_pos = line[hash_pos..].find(open).map_or(0, |p| p + hash_pos);
                let Some(close_pos) = line[open_pos + 1..].find(close).map(|p| p + open_pos + 1)
                else {
                    return Err(ParseError::new(
                        source_name,
                        line_no,
                        "unterminated #include directive",
                    ));
                };

                let name = line[open_pos + 1..close_pos].trim();
                if name.is_empty() {
                    return Err(ParseError::new(
                        source_name,
                        line_no,
                        "#include directive without a name",
                    ));
                }

                scanned.text.push_str(&line[..hash_pos]);
                scanned.includes.push(PendingInclude {
                    name: name.to_string(),
                    offset: scanned.text.len(),
                    line: line_no,
                });
                scanned.text.push_str(&line[close_pos + 1..]);
            }
            Some(("ifdef" | "ifndef", rest)) => {
                if let Some(name) = directive_ident(rest) {
                    push_flag_ref(&mut scanned.flag_refs, name);
                }
                scanned.text.push_str(line);
            }
            _ => scanned.text.push_str(line),
        }
    }

    Ok(scanned)
}

/// An immutable-until-reloaded block of shader source.
#[derive(Debug, Clone)]
pub struct CodeFragment {
    name: String,
    raw_text: String,
    includes: SmallVec<[Include; 4]>,
    flag_refs: SmallVec<[Symbol; 4]>,
    version: Generation,
}

impl CodeFragment {
    /// Creates a fragment from raw text and `(target, offset)` include pairs.
    ///
    /// Offsets are clamped into the text and moved back onto a character
    /// boundary; includes are kept ordered by offset.
    pub fn new(
        name: impl Into<String>,
        raw_text: impl Into<String>,
        includes: impl IntoIterator<Item = (FragmentId, usize)>,
    ) -> Self {
        let raw_text = raw_text.into();
        let includes = Self::normalize_includes(&raw_text, includes);
        let flag_refs = collect_flag_refs(&raw_text);
        Self {
            name: name.into(),
            raw_text,
            includes,
            flag_refs,
            version: Generation::new(),
        }
    }

    /// Creates a fragment from scanned text whose includes were resolved to ids.
    pub(crate) fn from_scanned(
        name: impl Into<String>,
        scanned: ScannedSource,
        targets: &[FragmentId],
    ) -> Self {
        let includes = scanned
            .includes
            .iter()
            .zip(targets)
            .map(|(pending, &target)| Include {
                target,
                offset: pending.offset,
            })
            .collect();
        Self {
            name: name.into(),
            raw_text: scanned.text,
            includes,
            flag_refs: scanned.flag_refs,
            version: Generation::new(),
        }
    }

    fn normalize_includes(
        raw_text: &str,
        includes: impl IntoIterator<Item = (FragmentId, usize)>,
    ) -> SmallVec<[Include; 4]> {
        let mut includes: SmallVec<[Include; 4]> = includes
            .into_iter()
            .map(|(target, offset)| {
                let mut offset = offset.min(raw_text.len());
                while !raw_text.is_char_boundary(offset) {
                    offset -= 1;
                }
                Include { target, offset }
            })
            .collect();
        includes.sort_by_key(|inc| inc.offset);
        includes
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    #[inline]
    #[must_use]
    pub fn includes(&self) -> &[Include] {
        &self.includes
    }

    /// Flag names referenced by this fragment's own conditionals.
    #[inline]
    #[must_use]
    pub fn flag_refs(&self) -> &[Symbol] {
        &self.flag_refs
    }

    /// Content version, bumped on every replacement.
    #[inline]
    #[must_use]
    pub fn version(&self) -> Generation {
        self.version
    }

    /// Replaces the content wholesale, keeping name and identity.
    pub(crate) fn replace(&mut self, other: CodeFragment) {
        self.raw_text = other.raw_text;
        self.includes = other.includes;
        self.flag_refs = other.flag_refs;
        self.version.bump();
    }
}

/// Shared table of includable fragments, addressed by id or by name.
#[derive(Debug, Default)]
pub struct FragmentStore {
    map: SlotMap<FragmentId, CodeFragment>,
    lookup: FxHashMap<String, FragmentId>,
}

impl FragmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fragment. A fragment with the same name has its content
    /// replaced in place and keeps its id.
    pub fn insert(&mut self, fragment: CodeFragment) -> FragmentId {
        if let Some(&id) = self.lookup.get(fragment.name())
            && let Some(existing) = self.map.get_mut(id)
        {
            existing.replace(fragment);
            return id;
        }
        let name = fragment.name.clone();
        let id = self.map.insert(fragment);
        self.lookup.insert(name, id);
        id
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: FragmentId) -> Option<&CodeFragment> {
        self.map.get(id)
    }

    #[inline]
    #[must_use]
    pub fn find(&self, name: &str) -> Option<FragmentId> {
        self.lookup.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, id: FragmentId) -> bool {
        self.map.contains_key(id)
    }

    /// Removes a fragment. Callers are responsible for checking it is unused.
    pub fn remove(&mut self, id: FragmentId) -> Option<CodeFragment> {
        let fragment = self.map.remove(id)?;
        self.lookup.remove(fragment.name());
        Some(fragment)
    }

    /// Replaces the content of `id` wholesale.
    pub fn replace_content(&mut self, id: FragmentId, fragment: CodeFragment) -> Result<()> {
        let existing = self
            .map
            .get_mut(id)
            .ok_or(ShaderError::DanglingFragment { id })?;
        existing.replace(fragment);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FragmentId, &CodeFragment)> {
        self.map.iter()
    }

    fn display_name(&self, id: FragmentId) -> String {
        self.map
            .get(id)
            .map_or_else(|| format!("{id:?}"), |f| f.name.clone())
    }

    /// Assembles a stored fragment.
    pub fn assemble(&self, id: FragmentId) -> Result<String> {
        let fragment = self.get(id).ok_or(ShaderError::DanglingFragment { id })?;
        let mut out = String::with_capacity(fragment.raw_text.len());
        let mut path = vec![id];
        self.assemble_into(fragment, &mut out, &mut path)?;
        Ok(out)
    }

    /// Assembles any fragment, stored or not, resolving includes against this store.
    pub fn assemble_fragment(&self, fragment: &CodeFragment) -> Result<String> {
        let mut out = String::with_capacity(fragment.raw_text.len());
        let mut path = match self.find(fragment.name()) {
            Some(id) if self.map.get(id).is_some_and(|f| std::ptr::eq(f, fragment)) => vec![id],
            _ => Vec::new(),
        };
        self.assemble_into(fragment, &mut out, &mut path)?;
        Ok(out)
    }

    fn assemble_into(
        &self,
        fragment: &CodeFragment,
        out: &mut String,
        path: &mut Vec<FragmentId>,
    ) -> Result<()> {
        let mut cursor = 0;
        for include in &fragment.includes {
            out.push_str(&fragment.raw_text[cursor..include.offset]);
            cursor = include.offset;

            if let Some(pos) = path.iter().position(|&id| id == include.target) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&id| self.display_name(id)).collect();
                cycle.push(self.display_name(include.target));
                return Err(ShaderError::CyclicDependency { cycle });
            }

            let child = self
                .map
                .get(include.target)
                .ok_or(ShaderError::DanglingFragment {
                    id: include.target,
                })?;

            path.push(include.target);
            self.assemble_into(child, out, path)?;
            path.pop();
        }
        out.push_str(&fragment.raw_text[cursor..]);
        Ok(())
    }

    /// Returns `true` when `fragment` includes `target`, directly or transitively.
    #[must_use]
    pub fn has_dependency(&self, fragment: &CodeFragment, target: FragmentId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<FragmentId> = fragment.includes.iter().map(|inc| inc.target).collect();

        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(child) = self.map.get(id) {
                stack.extend(child.includes.iter().map(|inc| inc.target));
            }
        }
        false
    }

    /// Returns `true` when the stored fragment `id` transitively includes `target`.
    #[must_use]
    pub fn depends_on(&self, id: FragmentId, target: FragmentId) -> bool {
        self.map
            .get(id)
            .is_some_and(|fragment| self.has_dependency(fragment, target))
    }

    /// Stored fragments that include `target` directly.
    #[must_use]
    pub fn includers_of(&self, target: FragmentId) -> Vec<FragmentId> {
        self.map
            .iter()
            .filter(|(_, f)| f.includes.iter().any(|inc| inc.target == target))
            .map(|(id, _)| id)
            .collect()
    }

    /// Flag bits referenced by `fragment` and everything it includes.
    #[must_use]
    pub fn flag_bits(&self, fragment: &CodeFragment, vocabulary: &FlagVocabulary) -> FlagMask {
        let mut mask = vocabulary.mask_of_symbols(&fragment.flag_refs);
        let mut visited = FxHashSet::default();
        let mut stack: Vec<FragmentId> = fragment.includes.iter().map(|inc| inc.target).collect();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(child) = self.map.get(id) {
                mask |= vocabulary.mask_of_symbols(&child.flag_refs);
                stack.extend(child.includes.iter().map(|inc| inc.target));
            }
        }
        mask
    }
}
