//! Shader Library
//!
//! Owner of the shared [`FragmentStore`], every loaded [`Shader`], the
//! [`LibrarySettings`] and the [`SourceLoader`]. This is the entry point of
//! the pipeline:
//!
//! - loading parses a shader and resolves its `#include`s against the shared
//!   fragments, loading missing ones through the loader;
//! - lookups encode flags and fetch (or build) combinations;
//! - fragment edits invalidate every shader that transitively includes the
//!   edited fragment. Affected combinations rebuild lazily on next lookup.
//!
//! The library is not internally synchronised. [`ShaderLibrary::into_shared`]
//! wraps it in a mutex so a background loader thread can drive compilation
//! while render code serialises access through the same lock.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut library = ShaderLibrary::new(FileSourceLoader::new("assets/shaders"));
//! let mut compiler = DryRunCompiler::new();
//!
//! let model = library.load_shader("model.shader")?;
//! let mask = library.encode_flags(model, &["SKINNING"])?;
//! library.pre_load_combination(model, mask)?;
//! library.compile_contexts(model, &mut compiler)?;
//!
//! let program = library.program(model, "LIGHTING", mask, &mut compiler);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::combination::Combination;
use crate::compiler::{ProgramCompiler, ProgramHandle, StageSource};
use crate::errors::{ParseError, Result, ShaderError};
use crate::flags::FlagMask;
use crate::fragment::{CodeFragment, FragmentId, FragmentStore, ScannedSource, scan_source};
use crate::loader::SourceLoader;
use crate::parser::{ParsedShader, parse_shader};
use crate::settings::LibrarySettings;
use crate::shader::{CompileEnv, CompileReport, Shader};

new_key_type! {
    /// Key of a shader in a [`ShaderLibrary`].
    pub struct ShaderId;
}

/// A library shared between threads.
pub type SharedShaderLibrary = Arc<Mutex<ShaderLibrary>>;

fn decode_utf8(name: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|err| {
        ParseError::new(name, 0, format!("source is not valid UTF-8: {err}")).into()
    })
}

pub struct ShaderLibrary {
    fragments: FragmentStore,
    shaders: SlotMap<ShaderId, Shader>,
    lookup: FxHashMap<String, ShaderId>,
    settings: LibrarySettings,
    loader: Box<dyn SourceLoader>,
}

impl ShaderLibrary {
    pub fn new(loader: impl SourceLoader + 'static) -> Self {
        Self::with_settings(loader, LibrarySettings::default())
    }

    pub fn with_settings(loader: impl SourceLoader + 'static, settings: LibrarySettings) -> Self {
        prism_core::interner::preload_common_flags();
        Self {
            fragments: FragmentStore::new(),
            shaders: SlotMap::with_key(),
            lookup: FxHashMap::default(),
            settings,
            loader: Box::new(loader),
        }
    }

    /// Wraps the library for use from several threads.
    #[must_use]
    pub fn into_shared(self) -> SharedShaderLibrary {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn settings(&self) -> &LibrarySettings {
        &self.settings
    }

    /// Replaces the settings. Every shader is invalidated, since preambles
    /// and defines are part of the compiled sources.
    pub fn set_settings(&mut self, settings: LibrarySettings) {
        self.settings = settings;
        for shader in self.shaders.values_mut() {
            shader.invalidate();
        }
    }

    #[must_use]
    pub fn fragments(&self) -> &FragmentStore {
        &self.fragments
    }

    pub fn loader_mut(&mut self) -> &mut dyn SourceLoader {
        self.loader.as_mut()
    }

    // ── Include resolution ───────────────────────────────────────────────────

    /// Resolves the includes of `scanned` to fragment ids, loading unknown
    /// names through the loader. Fragments loaded here are appended to `added`.
    fn resolve_includes(
        &mut self,
        owner: &str,
        scanned: &ScannedSource,
        added: &mut Vec<FragmentId>,
    ) -> Result<Vec<FragmentId>> {
        let mut targets = Vec::with_capacity(scanned.includes.len());
        for include in &scanned.includes {
            let id = match self.fragments.find(&include.name) {
                Some(id) => id,
                None => match self.load_new_fragment(&include.name, added) {
                    Ok(id) => id,
                    Err(ShaderError::Io { name, source }) => {
                        return Err(ParseError::new(
                            owner,
                            include.line,
                            format!("cannot resolve include '{name}': {source}"),
                        )
                        .into());
                    }
                    Err(err) => return Err(err),
                },
            };
            targets.push(id);
        }
        Ok(targets)
    }

    fn load_new_fragment(&mut self, name: &str, added: &mut Vec<FragmentId>) -> Result<FragmentId> {
        let bytes = self
            .loader
            .read_bytes(name)
            .map_err(|source| ShaderError::Io {
                name: name.to_string(),
                source: Arc::new(source),
            })?;
        let text = decode_utf8(name, bytes)?;
        let scanned = scan_source(name, &text, 1)?;

        // Registered empty first so includes among new fragments terminate.
        let id = self.fragments.insert(CodeFragment::new(name, "", std::iter::empty()));
        added.push(id);

        let targets = self.resolve_includes(name, &scanned, added)?;
        self.fragments
            .replace_content(id, CodeFragment::from_scanned(name, scanned, &targets))?;
        log::debug!("Loaded fragment '{name}'");
        Ok(id)
    }

    fn rollback(&mut self, added: Vec<FragmentId>) {
        for id in added.into_iter().rev() {
            if let Some(fragment) = self.fragments.remove(id) {
                log::debug!("Rolled back fragment '{}'", fragment.name());
            }
        }
    }

    /// Scans `source` and resolves its includes, rolling back newly loaded
    /// fragments on failure.
    fn build_fragment(&mut self, name: &str, source: &str) -> Result<CodeFragment> {
        let scanned = scan_source(name, source, 1)?;
        let mut added = Vec::new();
        match self.resolve_includes(name, &scanned, &mut added) {
            Ok(targets) => Ok(CodeFragment::from_scanned(name, scanned, &targets)),
            Err(err) => {
                self.rollback(added);
                Err(err)
            }
        }
    }

    // ── Fragments ────────────────────────────────────────────────────────────

    /// Adds a shared fragment from source text. An existing fragment of the
    /// same name is updated instead, invalidating its dependents.
    pub fn add_fragment(&mut self, name: &str, source: &str) -> Result<FragmentId> {
        if let Some(id) = self.fragments.find(name) {
            self.update_fragment(id, source)?;
            return Ok(id);
        }
        let fragment = self.build_fragment(name, source)?;
        let id = self.fragments.insert(fragment);
        log::debug!("Added fragment '{name}'");
        Ok(id)
    }

    /// Returns the fragment `name`, reading it through the loader if needed.
    pub fn load_fragment(&mut self, name: &str) -> Result<FragmentId> {
        if let Some(id) = self.fragments.find(name) {
            return Ok(id);
        }
        let mut added = Vec::new();
        let result = self.load_new_fragment(name, &mut added);
        if result.is_err() {
            self.rollback(added);
        }
        result
    }

    /// Replaces a fragment's content and invalidates every shader depending
    /// on it. Returns the number of invalidated shaders.
    pub fn update_fragment(&mut self, id: FragmentId, source: &str) -> Result<usize> {
        let name = self
            .fragments
            .get(id)
            .ok_or(ShaderError::DanglingFragment { id })?
            .name()
            .to_string();
        let fragment = self.build_fragment(&name, source)?;
        self.fragments.replace_content(id, fragment)?;
        Ok(self.on_fragment_changed(id))
    }

    /// Re-reads a fragment through the loader. See [`update_fragment`](Self::update_fragment).
    pub fn reload_fragment(&mut self, id: FragmentId) -> Result<usize> {
        let name = self
            .fragments
            .get(id)
            .ok_or(ShaderError::DanglingFragment { id })?
            .name()
            .to_string();
        let bytes = self
            .loader
            .read_bytes(&name)
            .map_err(|source| ShaderError::Io {
                name: name.clone(),
                source: Arc::new(source),
            })?;
        let text = decode_utf8(&name, bytes)?;
        log::info!("Reloading fragment '{name}'");
        self.update_fragment(id, &text)
    }

    /// Removes a fragment nothing includes anymore.
    pub fn remove_fragment(&mut self, id: FragmentId) -> Result<()> {
        let fragment = self
            .fragments
            .get(id)
            .ok_or(ShaderError::DanglingFragment { id })?;
        let in_use = !self.fragments.includers_of(id).is_empty()
            || self.shaders.values().any(|s| s.includes_directly(id));
        if in_use {
            return Err(ShaderError::FragmentInUse {
                name: fragment.name().to_string(),
            });
        }
        self.fragments.remove(id);
        Ok(())
    }

    /// Invalidates every shader that includes `fragment`, directly or
    /// transitively. Returns the number of invalidated shaders.
    pub fn on_fragment_changed(&mut self, fragment: FragmentId) -> usize {
        let mut count = 0;
        for shader in self.shaders.values_mut() {
            if shader.depends_on(&self.fragments, fragment) {
                shader.invalidate();
                count += 1;
            }
        }
        let name = self.fragments.get(fragment).map_or("<removed>", |f| f.name());
        log::info!("Fragment '{name}' changed, {count} shaders invalidated");
        count
    }

    // ── Shaders ──────────────────────────────────────────────────────────────

    /// Parses `text` and resolves its sections' includes.
    fn build_shader(&mut self, name: &str, text: &str) -> Result<(ParsedShader, Vec<CodeFragment>)> {
        let mut parsed = parse_shader(name, text)?;
        let mut added = Vec::new();
        let mut sections = Vec::with_capacity(parsed.sections.len());

        for section in std::mem::take(&mut parsed.sections) {
            match self.resolve_includes(name, &section.source, &mut added) {
                Ok(targets) => {
                    sections.push(CodeFragment::from_scanned(section.name, section.source, &targets));
                }
                Err(err) => {
                    self.rollback(added);
                    return Err(err);
                }
            }
        }
        Ok((parsed, sections))
    }

    fn read_source(&mut self, name: &str) -> Result<String> {
        let bytes = self
            .loader
            .read_bytes(name)
            .map_err(|source| ShaderError::Io {
                name: name.to_string(),
                source: Arc::new(source),
            })?;
        decode_utf8(name, bytes)
    }

    /// Loads a shader through the loader. An already loaded name returns its id.
    ///
    /// On failure the shader is still registered, not loaded, with the error
    /// kept as its diagnostic. Loading a registered but failed shader again
    /// re-reads its source.
    pub fn load_shader(&mut self, name: &str) -> Result<ShaderId> {
        if let Some(&id) = self.lookup.get(name) {
            if self.shaders.get(id).is_some_and(Shader::is_loaded) {
                return Ok(id);
            }
            let text = match self.read_source(name) {
                Ok(text) => text,
                Err(err) => {
                    if let Some(shader) = self.shaders.get_mut(id) {
                        shader.mark_failed(err.to_string());
                    }
                    return Err(err);
                }
            };
            self.apply_reload(id, &text, None)?;
            return Ok(id);
        }
        match self.read_source(name) {
            Ok(text) => self.load_shader_from_str(name, &text),
            Err(err) => {
                self.register_failed(name, &err);
                Err(err)
            }
        }
    }

    /// Loads a shader from source text. A loaded shader of the same name is
    /// returned as is; a failed one takes the new text.
    pub fn load_shader_from_str(&mut self, name: &str, text: &str) -> Result<ShaderId> {
        if let Some(&id) = self.lookup.get(name) {
            // A failed shader owns no programs and can take the new text in place.
            if self.shaders.get(id).is_some_and(Shader::is_loaded) {
                log::debug!("Shader '{name}' already loaded");
            } else {
                self.apply_reload(id, text, None)?;
            }
            return Ok(id);
        }

        match self.build_shader(name, text) {
            Ok((parsed, sections)) => {
                let shader = Shader::from_parsed(name, parsed, sections);
                log::info!(
                    "Loaded shader '{name}': {} contexts, {} flags",
                    shader.contexts().len(),
                    shader.vocabulary().len()
                );
                let id = self.shaders.insert(shader);
                self.lookup.insert(name.to_string(), id);
                Ok(id)
            }
            Err(err) => {
                self.register_failed(name, &err);
                Err(err)
            }
        }
    }

    fn register_failed(&mut self, name: &str, err: &ShaderError) {
        log::error!("Failed to load shader '{name}': {err}");
        let id = self.shaders.insert(Shader::failed(name, err.to_string()));
        self.lookup.insert(name.to_string(), id);
    }

    /// Re-reads a shader through the loader and replaces its content.
    ///
    /// All programs are released. If the shader was ready, its pre-load set
    /// is compiled again before this returns.
    pub fn reload_shader(
        &mut self,
        id: ShaderId,
        compiler: &mut dyn ProgramCompiler,
    ) -> Result<CompileReport> {
        let name = self.shader_ref(id)?.name().to_string();
        let text = match self.read_source(&name) {
            Ok(text) => text,
            Err(err) => {
                if let Some(shader) = self.shaders.get_mut(id) {
                    shader.release(compiler);
                    shader.mark_failed(err.to_string());
                }
                return Err(err);
            }
        };
        self.reload_shader_from_str(id, &text, compiler)
    }

    /// Replaces a shader's content with `text`. See [`reload_shader`](Self::reload_shader).
    pub fn reload_shader_from_str(
        &mut self,
        id: ShaderId,
        text: &str,
        compiler: &mut dyn ProgramCompiler,
    ) -> Result<CompileReport> {
        self.apply_reload(id, text, Some(compiler))
    }

    fn apply_reload(
        &mut self,
        id: ShaderId,
        text: &str,
        mut compiler: Option<&mut dyn ProgramCompiler>,
    ) -> Result<CompileReport> {
        let name = self.shader_ref(id)?.name().to_string();
        let built = self.build_shader(&name, text);

        let shader = self
            .shaders
            .get_mut(id)
            .ok_or_else(|| ShaderError::UnknownShader(name.clone()))?;
        let was_ready = shader.is_ready();
        if let Some(compiler) = compiler.as_deref_mut() {
            shader.release(compiler);
        }

        match built {
            Ok((parsed, sections)) => {
                shader.apply(parsed, sections);
                log::info!("Reloaded shader '{name}'");
                match compiler {
                    Some(compiler) if was_ready => {
                        let mut env = CompileEnv {
                            fragments: &self.fragments,
                            settings: &self.settings,
                            compiler,
                        };
                        Ok(shader.compile_contexts(&mut env))
                    }
                    _ => Ok(CompileReport::default()),
                }
            }
            Err(err) => {
                log::error!("Failed to reload shader '{name}': {err}");
                shader.mark_failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Releases the shader's programs and forgets it.
    pub fn remove_shader(&mut self, id: ShaderId, compiler: &mut dyn ProgramCompiler) -> bool {
        let Some(mut shader) = self.shaders.remove(id) else {
            return false;
        };
        shader.release(compiler);
        self.lookup.remove(shader.name());
        log::info!("Removed shader '{}'", shader.name());
        true
    }

    #[must_use]
    pub fn shader(&self, id: ShaderId) -> Option<&Shader> {
        self.shaders.get(id)
    }

    pub fn shader_mut(&mut self, id: ShaderId) -> Option<&mut Shader> {
        self.shaders.get_mut(id)
    }

    #[must_use]
    pub fn find_shader(&self, name: &str) -> Option<ShaderId> {
        self.lookup.get(name).copied()
    }

    pub fn shaders(&self) -> impl Iterator<Item = (ShaderId, &Shader)> {
        self.shaders.iter()
    }

    fn shader_ref(&self, id: ShaderId) -> Result<&Shader> {
        self.shaders
            .get(id)
            .ok_or_else(|| ShaderError::UnknownShader(format!("{id:?}")))
    }

    fn env_parts(
        &mut self,
        id: ShaderId,
    ) -> Result<(&mut Shader, &FragmentStore, &LibrarySettings)> {
        let shader = self
            .shaders
            .get_mut(id)
            .ok_or_else(|| ShaderError::UnknownShader(format!("{id:?}")))?;
        Ok((shader, &self.fragments, &self.settings))
    }

    // ── Combinations ─────────────────────────────────────────────────────────

    /// Encodes flag names for a shader. Unknown names are ignored; with
    /// `strict_flags` they are also reported as warnings.
    pub fn encode_flags(&self, id: ShaderId, names: &[&str]) -> Result<FlagMask> {
        let shader = self.shader_ref(id)?;
        if self.settings.strict_flags {
            let unknown = shader.vocabulary().unknown_names(names.iter().copied());
            if !unknown.is_empty() {
                log::warn!(
                    "Shader '{}': unknown flags {unknown:?} ignored",
                    shader.name()
                );
            }
        }
        Ok(shader.encode(names))
    }

    /// Records `mask` for eager compilation.
    pub fn pre_load_combination(&mut self, id: ShaderId, mask: FlagMask) -> Result<()> {
        self.shaders
            .get_mut(id)
            .ok_or_else(|| ShaderError::UnknownShader(format!("{id:?}")))?
            .pre_load_combination(mask);
        Ok(())
    }

    /// Compiles the pre-load set of one shader and marks it ready.
    pub fn compile_contexts(
        &mut self,
        id: ShaderId,
        compiler: &mut dyn ProgramCompiler,
    ) -> Result<CompileReport> {
        let (shader, fragments, settings) = self.env_parts(id)?;
        let mut env = CompileEnv {
            fragments,
            settings,
            compiler,
        };
        Ok(shader.compile_contexts(&mut env))
    }

    /// Runs [`compile_contexts`](Self::compile_contexts) for every loaded shader.
    pub fn compile_all(&mut self, compiler: &mut dyn ProgramCompiler) -> CompileReport {
        let mut report = CompileReport::default();
        let mut env = CompileEnv {
            fragments: &self.fragments,
            settings: &self.settings,
            compiler,
        };
        for shader in self.shaders.values_mut().filter(|s| s.is_loaded()) {
            report.merge(shader.compile_contexts(&mut env));
        }
        report
    }

    /// Fetches or builds the combination of `context` for `mask`.
    pub fn get_combination(
        &mut self,
        id: ShaderId,
        context: &str,
        mask: FlagMask,
        compiler: &mut dyn ProgramCompiler,
    ) -> Result<&Combination> {
        let (shader, fragments, settings) = self.env_parts(id)?;
        let mut env = CompileEnv {
            fragments,
            settings,
            compiler,
        };
        shader.get_combination(context, mask, &mut env)
    }

    /// Program to draw with, or `None` to skip the draw.
    ///
    /// Prefers the fresh program; after a failed recompile falls back to the
    /// previous program of the same combination.
    pub fn program(
        &mut self,
        id: ShaderId,
        context: &str,
        mask: FlagMask,
        compiler: &mut dyn ProgramCompiler,
    ) -> Option<ProgramHandle> {
        let result = self
            .get_combination(id, context, mask, compiler)
            .map(Combination::program);

        match result {
            Ok(program) => program,
            Err(err) => {
                let (shader, fragments, settings) = self.env_parts(id).ok()?;
                let index = shader.find_context(context)?;
                let key = shader.combination_key(index, mask, fragments, settings);
                let retained = shader
                    .context(index)?
                    .combination(key)
                    .and_then(Combination::program);
                match retained {
                    Some(program) => log::warn!("Using stale {program}: {err}"),
                    None => log::warn!("Skipping draw: {err}"),
                }
                retained
            }
        }
    }

    /// Final per-stage sources of a combination without compiling it.
    pub fn assemble_stage_sources(
        &mut self,
        id: ShaderId,
        context: &str,
        mask: FlagMask,
    ) -> Result<Vec<StageSource>> {
        let (shader, fragments, settings) = self.env_parts(id)?;
        let index = shader
            .find_context(context)
            .ok_or_else(|| ShaderError::UnknownContext {
                shader: shader.name().to_string(),
                context: context.to_string(),
            })?;
        shader.assemble_stage_sources(index, mask, fragments, settings)
    }
}
