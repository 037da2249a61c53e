//! Shader Resource & Combination Driver
//!
//! A [`Shader`] owns everything parsed from one source: the flag vocabulary,
//! its contexts, its code sections and its declared samplers, uniforms and
//! buffers. It also drives compilation of combinations:
//!
//! 1. the requested mask is (optionally) reduced to the context's used bits,
//! 2. a cached entry whose stamp matches the shader generation is a hit,
//! 3. otherwise every bound section is include-expanded, flag-gated and
//!    prefixed with the stage preamble, then handed to the compiler.
//!
//! A successful recompile releases the replaced program only after the new
//! one is installed. A failed one keeps the old program and records the
//! diagnostic on the entry, so later lookups at the same generation fail
//! fast without calling the compiler again.

use prism_core::Generation;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_128;

use crate::combination::{Combination, EngineUniform, ResolvedSlots, UNRESOLVED_SLOT};
use crate::compiler::{CompileRequest, ProgramCompiler, ProgramHandle, SlotKind, StageSource};
use crate::context::ShaderContext;
use crate::errors::{CompileError, Result, ShaderError};
use crate::flags::{FlagMask, FlagVocabulary};
use crate::fragment::{CodeFragment, FragmentId, FragmentStore};
use crate::gating::gate_flags;
use crate::parser::{BufferDecl, ParsedShader, SamplerDecl, UniformDecl};
use crate::settings::LibrarySettings;
use crate::stage::ShaderStage;

/// Collaborators needed to build combinations.
pub struct CompileEnv<'a> {
    pub fragments: &'a FragmentStore,
    pub settings: &'a LibrarySettings,
    pub compiler: &'a mut dyn ProgramCompiler,
}

/// Outcome of a [`Shader::compile_contexts`] pass.
#[derive(Debug, Default)]
pub struct CompileReport {
    /// Combinations compiled during the pass.
    pub compiled: usize,
    /// Combinations that were already cached and fresh.
    pub cached: usize,
    /// Failures, one per (context, mask) that could not be built.
    pub errors: Vec<ShaderError>,
}

impl CompileReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: CompileReport) {
        self.compiled += other.compiled;
        self.cached += other.cached;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug)]
pub struct Shader {
    name: String,
    diagnostic: Option<String>,
    vocabulary: FlagVocabulary,
    contexts: Vec<ShaderContext>,
    sections: Vec<CodeFragment>,
    pub(crate) samplers: Vec<SamplerDecl>,
    pub(crate) uniforms: Vec<UniformDecl>,
    pub(crate) buffers: Vec<BufferDecl>,
    pre_load: Vec<FlagMask>,
    generation: Generation,
    ready: bool,
    /// Include-expanded section text, valid for the current generation.
    memo: FxHashMap<usize, String>,
}

impl Shader {
    /// Builds a loaded shader. `sections` are the parsed code sections with
    /// their includes resolved, in declaration order.
    pub(crate) fn from_parsed(
        name: impl Into<String>,
        parsed: ParsedShader,
        sections: Vec<CodeFragment>,
    ) -> Self {
        let mut shader = Self::failed(name, String::new());
        shader.apply(parsed, sections);
        shader
    }

    /// A shader whose load failed.
    pub(crate) fn failed(name: impl Into<String>, diagnostic: String) -> Self {
        Self {
            name: name.into(),
            diagnostic: Some(diagnostic),
            vocabulary: FlagVocabulary::new(),
            contexts: Vec::new(),
            sections: Vec::new(),
            samplers: Vec::new(),
            uniforms: Vec::new(),
            buffers: Vec::new(),
            pre_load: Vec::new(),
            generation: Generation::new(),
            ready: false,
            memo: FxHashMap::default(),
        }
    }

    /// Replaces the parsed content. Programs must have been released.
    ///
    /// The pre-load set survives only when the vocabulary is unchanged,
    /// since bit meanings follow declaration order.
    pub(crate) fn apply(&mut self, parsed: ParsedShader, sections: Vec<CodeFragment>) {
        if parsed.vocabulary != self.vocabulary && !self.pre_load.is_empty() {
            log::info!(
                "Shader '{}': flag vocabulary changed, dropping {} pre-load masks",
                self.name,
                self.pre_load.len()
            );
            self.pre_load.clear();
        }

        self.diagnostic = None;
        self.vocabulary = parsed.vocabulary;
        self.contexts = parsed.contexts;
        self.samplers = parsed.samplers;
        self.uniforms = parsed.uniforms;
        self.buffers = parsed.buffers;
        self.sections = sections;
        self.ready = false;
        self.memo.clear();
        self.generation.bump();
    }

    /// Marks the shader not loaded. Programs must have been released.
    pub(crate) fn mark_failed(&mut self, diagnostic: String) {
        self.diagnostic = Some(diagnostic);
        self.contexts.clear();
        self.sections.clear();
        self.ready = false;
        self.memo.clear();
        self.generation.bump();
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.diagnostic.is_none()
    }

    /// `true` after [`compile_contexts`](Self::compile_contexts) completed
    /// for the current content.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Why the last load failed.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    #[must_use]
    pub fn vocabulary(&self) -> &FlagVocabulary {
        &self.vocabulary
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn contexts(&self) -> &[ShaderContext] {
        &self.contexts
    }

    #[must_use]
    pub fn context(&self, index: usize) -> Option<&ShaderContext> {
        self.contexts.get(index)
    }

    #[must_use]
    pub fn find_context(&self, name: &str) -> Option<usize> {
        self.contexts.iter().position(|c| c.name() == name)
    }

    /// Code sections with resolved includes.
    #[must_use]
    pub fn sections(&self) -> &[CodeFragment] {
        &self.sections
    }

    #[must_use]
    pub fn samplers(&self) -> &[SamplerDecl] {
        &self.samplers
    }

    #[must_use]
    pub fn uniforms(&self) -> &[UniformDecl] {
        &self.uniforms
    }

    #[must_use]
    pub fn buffers(&self) -> &[BufferDecl] {
        &self.buffers
    }

    /// Masks requested for eager compilation, in request order.
    #[must_use]
    pub fn pre_load_set(&self) -> &[FlagMask] {
        &self.pre_load
    }

    /// Encodes flag names against this shader's vocabulary.
    pub fn encode<I, S>(&self, names: I) -> FlagMask
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vocabulary.encode(names)
    }

    fn check_loaded(&self) -> Result<()> {
        match &self.diagnostic {
            None => Ok(()),
            Some(diagnostic) => Err(ShaderError::NotLoaded {
                shader: self.name.clone(),
                diagnostic: diagnostic.clone(),
            }),
        }
    }

    // ── Dependencies & invalidation ──────────────────────────────────────────

    /// `true` when a code section includes `fragment`, directly or transitively.
    #[must_use]
    pub fn depends_on(&self, fragments: &FragmentStore, fragment: FragmentId) -> bool {
        self.sections
            .iter()
            .any(|section| fragments.has_dependency(section, fragment))
    }

    /// `true` when a code section includes `fragment` directly.
    #[must_use]
    pub fn includes_directly(&self, fragment: FragmentId) -> bool {
        self.sections
            .iter()
            .any(|section| section.includes().iter().any(|inc| inc.target == fragment))
    }

    /// Advances the generation; every cached combination becomes stale and
    /// is rebuilt on its next lookup.
    pub fn invalidate(&mut self) -> Generation {
        self.memo.clear();
        let generation = self.generation.bump();
        log::info!("Shader '{}' invalidated ({generation})", self.name);
        generation
    }

    /// Releases every program and empties all combination caches.
    pub fn release(&mut self, compiler: &mut dyn ProgramCompiler) {
        let mut released = 0;
        for ctx in &mut self.contexts {
            for comb in ctx.combinations.values_mut() {
                if let Some(program) = comb.take_program() {
                    compiler.release(program);
                    released += 1;
                }
            }
            ctx.combinations.clear();
            ctx.compiled = false;
            ctx.linked_at = None;
        }
        self.ready = false;
        if released > 0 {
            log::debug!("Shader '{}': released {released} programs", self.name);
        }
    }

    // ── Pre-loading ──────────────────────────────────────────────────────────

    /// Records `mask` for eager compilation by the next
    /// [`compile_contexts`](Self::compile_contexts) pass.
    pub fn pre_load_combination(&mut self, mask: FlagMask) {
        if !self.pre_load.contains(&mask) {
            self.pre_load.push(mask);
        }
    }

    /// Compiles every pre-load mask for every context, then marks the shader
    /// ready. Failures are collected; they never stop the pass.
    pub fn compile_contexts(&mut self, env: &mut CompileEnv<'_>) -> CompileReport {
        let mut report = CompileReport::default();
        if let Err(err) = self.check_loaded() {
            report.errors.push(err);
            return report;
        }

        let masks = self.pre_load.clone();
        for index in 0..self.contexts.len() {
            self.link_context(index, env.fragments);
            for &mask in &masks {
                match self.ensure_combination(index, mask, env) {
                    Ok((_, true)) => report.compiled += 1,
                    Ok((_, false)) => report.cached += 1,
                    Err(err) => report.errors.push(err),
                }
            }
            self.contexts[index].compiled = true;
        }

        self.ready = true;
        log::info!(
            "Shader '{}' ready: {} compiled, {} cached, {} failed",
            self.name,
            report.compiled,
            report.cached,
            report.errors.len()
        );
        report
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Returns the combination of context `context` for `mask`, compiling it
    /// on a miss or when stale.
    pub fn get_combination(
        &mut self,
        context: &str,
        mask: FlagMask,
        env: &mut CompileEnv<'_>,
    ) -> Result<&Combination> {
        self.check_loaded()?;
        let index = self
            .find_context(context)
            .ok_or_else(|| ShaderError::UnknownContext {
                shader: self.name.clone(),
                context: context.to_string(),
            })?;
        self.get_combination_at(index, mask, env)
    }

    /// Like [`get_combination`](Self::get_combination), by context index.
    pub fn get_combination_at(
        &mut self,
        index: usize,
        mask: FlagMask,
        env: &mut CompileEnv<'_>,
    ) -> Result<&Combination> {
        let (key, _) = self.ensure_combination(index, mask, env)?;
        Ok(&self.contexts[index].combinations[&key])
    }

    /// Cache key used for `mask` in context `index`.
    pub fn combination_key(
        &mut self,
        index: usize,
        mask: FlagMask,
        fragments: &FragmentStore,
        settings: &LibrarySettings,
    ) -> FlagMask {
        if !settings.mask_unused_flags || index >= self.contexts.len() {
            return mask;
        }
        self.link_context(index, fragments);
        mask & self.contexts[index].flag_mask
    }

    /// Makes sure a fresh entry exists. Returns its key and whether the
    /// compiler was called.
    fn ensure_combination(
        &mut self,
        index: usize,
        mask: FlagMask,
        env: &mut CompileEnv<'_>,
    ) -> Result<(FlagMask, bool)> {
        self.check_loaded()?;
        if index >= self.contexts.len() {
            return Err(ShaderError::UnknownContext {
                shader: self.name.clone(),
                context: format!("#{index}"),
            });
        }

        let key = self.combination_key(index, mask, env.fragments, env.settings);
        let generation = self.generation;
        let cached = self.contexts[index]
            .combinations
            .get(&key)
            .map(|comb| (comb.is_stale(generation), comb.last_error().cloned()));

        match cached {
            Some((false, None)) => {
                log::trace!("Shader '{}': cache hit {key}", self.name);
                Ok((key, false))
            }
            Some((false, Some(error))) => Err(error),
            Some((true, _)) => {
                log::debug!(
                    "Shader '{}' context '{}': stale combination {key}, recompiling",
                    self.name,
                    self.contexts[index].name()
                );
                self.build_combination(index, key, env)?;
                Ok((key, true))
            }
            None => {
                log::debug!(
                    "Shader '{}' context '{}': cache miss {key}",
                    self.name,
                    self.contexts[index].name()
                );
                self.build_combination(index, key, env)?;
                Ok((key, true))
            }
        }
    }

    // ── Build ────────────────────────────────────────────────────────────────

    /// Computes the used flag bits of a context once per generation.
    fn link_context(&mut self, index: usize, fragments: &FragmentStore) {
        let Some(ctx) = self.contexts.get(index) else {
            return;
        };
        if ctx.linked_at == Some(self.generation) {
            return;
        }

        let flag_mask = ctx
            .stages
            .iter()
            .filter_map(|(_, section)| self.sections.get(section))
            .fold(FlagMask::EMPTY, |acc, section| {
                acc | fragments.flag_bits(section, &self.vocabulary)
            });

        let ctx = &mut self.contexts[index];
        ctx.flag_mask = flag_mask;
        ctx.linked_at = Some(self.generation);
    }

    fn assembled_section(
        &mut self,
        section: usize,
        fragments: &FragmentStore,
        memoize: bool,
    ) -> Result<String> {
        if let Some(text) = self.memo.get(&section) {
            return Ok(text.clone());
        }
        let fragment = self
            .sections
            .get(section)
            .ok_or_else(|| ShaderError::InvalidContext {
                shader: self.name.clone(),
                context: String::new(),
                reason: format!("stage bound to missing section #{section}"),
            })?;

        let text = fragments.assemble_fragment(fragment)?;
        if memoize {
            self.memo.insert(section, text.clone());
        }
        Ok(text)
    }

    fn finish_stage(
        &self,
        stage: ShaderStage,
        assembled: &str,
        mask: FlagMask,
        settings: &LibrarySettings,
    ) -> Result<String> {
        let gated = gate_flags(assembled, &self.vocabulary, mask)?;
        let preamble = settings.preambles.get(stage);

        let mut source = String::with_capacity(preamble.len() + gated.len() + 64);
        source.push_str(preamble);
        if !preamble.is_empty() && !preamble.ends_with('\n') {
            source.push('\n');
        }
        if settings.emit_flag_defines {
            for name in self.vocabulary.names_in(mask) {
                source.push_str("#define ");
                source.push_str(name);
                source.push('\n');
            }
        }
        source.push_str(&gated);
        Ok(source)
    }

    /// Final per-stage sources of context `index` for `mask`, exactly as
    /// they would be handed to the compiler.
    pub fn assemble_stage_sources(
        &mut self,
        index: usize,
        mask: FlagMask,
        fragments: &FragmentStore,
        settings: &LibrarySettings,
    ) -> Result<Vec<StageSource>> {
        self.check_loaded()?;
        let bindings: SmallVec<[(ShaderStage, usize); 6]> = self
            .contexts
            .get(index)
            .ok_or_else(|| ShaderError::UnknownContext {
                shader: self.name.clone(),
                context: format!("#{index}"),
            })?
            .stages
            .iter()
            .collect();

        let mut stages = Vec::with_capacity(bindings.len());
        for (stage, section) in bindings {
            let assembled = self.assembled_section(section, fragments, settings.memoize_assembly)?;
            stages.push(StageSource {
                stage,
                source: self.finish_stage(stage, &assembled, mask, settings)?,
            });
        }
        Ok(stages)
    }

    fn resolve_slots(&self, compiler: &dyn ProgramCompiler, program: ProgramHandle) -> ResolvedSlots {
        let resolve = |kind: SlotKind, name: &str| {
            compiler
                .resolve_slot(program, kind, name)
                .unwrap_or(UNRESOLVED_SLOT)
        };

        let mut engine = [UNRESOLVED_SLOT; EngineUniform::COUNT];
        for &uniform in EngineUniform::ALL {
            engine[uniform.index()] = resolve(SlotKind::Uniform, uniform.name());
        }

        ResolvedSlots {
            engine,
            samplers: self
                .samplers
                .iter()
                .map(|s| resolve(SlotKind::Sampler { unit: s.tex_unit }, &s.name))
                .collect(),
            uniforms: self
                .uniforms
                .iter()
                .map(|u| resolve(SlotKind::Uniform, &u.name))
                .collect(),
            buffers: self
                .buffers
                .iter()
                .enumerate()
                .map(|(i, b)| resolve(SlotKind::Buffer { index: i as u32 }, &b.name))
                .collect(),
        }
    }

    fn build_combination(
        &mut self,
        index: usize,
        key: FlagMask,
        env: &mut CompileEnv<'_>,
    ) -> Result<()> {
        let stages = match self.prepare_stages(index, key, env.fragments, env.settings) {
            Ok(stages) => stages,
            Err(err) => {
                log::error!(
                    "Shader '{}' context '{}': cannot assemble {key}: {err}",
                    self.name,
                    self.contexts[index].name()
                );
                return Err(self.record_build_failure(index, key, err));
            }
        };
        let source_hash = hash_sources(&stages);
        let generation = self.generation;

        let ctx = &self.contexts[index];
        let result = env.compiler.compile(&CompileRequest {
            shader: &self.name,
            context: ctx.name(),
            mask: key,
            stages: &stages,
            render_state: &ctx.render_state,
        });

        match result {
            Ok(program) => {
                let slots = self.resolve_slots(&*env.compiler, program);
                let ctx = &mut self.contexts[index];
                let entry = ctx
                    .combinations
                    .entry(key)
                    .or_insert_with(|| Combination::new(key));
                let replaced = entry.install(program, generation, source_hash, slots);
                log::debug!(
                    "Shader '{}' context '{}': compiled {key} as {program} ({} stages)",
                    self.name,
                    ctx.name(),
                    stages.len()
                );
                if let Some(old) = replaced {
                    env.compiler.release(old);
                }
                Ok(())
            }
            Err(failure) => {
                let error = CompileError {
                    shader: self.name.clone(),
                    context: ctx.name().to_string(),
                    mask: key,
                    failure,
                };
                log::error!("{error}");
                Err(self.record_build_failure(index, key, error.into()))
            }
        }
    }

    fn prepare_stages(
        &mut self,
        index: usize,
        key: FlagMask,
        fragments: &FragmentStore,
        settings: &LibrarySettings,
    ) -> Result<Vec<StageSource>> {
        self.contexts[index].validate(&self.name)?;
        self.link_context(index, fragments);
        self.assemble_stage_sources(index, key, fragments, settings)
    }

    /// Caches `error` on the entry for the current generation and returns it.
    /// A previously linked program stays installed.
    fn record_build_failure(
        &mut self,
        index: usize,
        key: FlagMask,
        error: ShaderError,
    ) -> ShaderError {
        let generation = self.generation;
        let entry = self.contexts[index]
            .combinations
            .entry(key)
            .or_insert_with(|| Combination::new(key));
        if let Some(program) = entry.program() {
            log::warn!(
                "Shader '{}': keeping stale {program} for combination {key}",
                self.name
            );
        }
        entry.record_failure(error.clone(), generation);
        error
    }
}

fn hash_sources(stages: &[StageSource]) -> u128 {
    let mut buf = String::with_capacity(stages.iter().map(|s| s.source.len() + 16).sum());
    for stage in stages {
        buf.push_str(stage.stage.label());
        buf.push('\0');
        buf.push_str(&stage.source);
        buf.push('\0');
    }
    xxh3_128(buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::DryRunCompiler;
    use crate::parser::parse_shader;

    const SRC: &str = "\
[[FX]]
flag SKINNING;
flag SHADOWS;
flag BROKEN;
sampler2D albedoMap;
float4 tint;

context LIGHTING {
    VertexShader = compile GLSL VS;
    PixelShader = compile GLSL FS;
}

[[VS]]
uniform mat4 worldMat;
#ifdef SKINNING
uniform vec4 skinMatRows[75];
#endif
void main() {}

[[FS]]
uniform sampler2D albedoMap;
uniform vec4 tint;
#ifdef BROKEN
#error broken variant
#endif
void main() {}
";

    fn shader() -> Shader {
        let parsed = parse_shader("test.shader", SRC).unwrap();
        let sections = parsed
            .sections
            .iter()
            .map(|s| CodeFragment::from_scanned(s.name.clone(), s.source.clone(), &[]))
            .collect();
        Shader::from_parsed("test.shader", parsed, sections)
    }

    struct Harness {
        fragments: FragmentStore,
        settings: LibrarySettings,
        compiler: DryRunCompiler,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                fragments: FragmentStore::new(),
                settings: LibrarySettings::default(),
                compiler: DryRunCompiler::new(),
            }
        }

        fn env(&mut self) -> CompileEnv<'_> {
            CompileEnv {
                fragments: &self.fragments,
                settings: &self.settings,
                compiler: &mut self.compiler,
            }
        }
    }

    #[test]
    fn test_assembly_error_is_cached_until_invalidated() {
        // VS ends inside an open `#ifdef`.
        let src = SRC.replace(
            "void main() {}\n\n[[FS]]",
            "#ifdef SHADOWS\nvoid main() {}\n\n[[FS]]",
        );
        let parsed = parse_shader("test.shader", &src).unwrap();
        let sections = parsed
            .sections
            .iter()
            .map(|s| CodeFragment::from_scanned(s.name.clone(), s.source.clone(), &[]))
            .collect();
        let mut shader = Shader::from_parsed("test.shader", parsed, sections);
        let mut h = Harness::new();

        for _ in 0..3 {
            let err = shader
                .get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env())
                .unwrap_err();
            assert!(matches!(err, ShaderError::Conditional { .. }), "{err:?}");
        }

        let comb = shader.contexts()[0].combination(FlagMask::EMPTY).unwrap();
        assert_eq!(comb.compile_count(), 1, "failed assembly is not retried");
        assert!(matches!(comb.last_error(), Some(ShaderError::Conditional { .. })));
        assert!(!comb.is_stale(shader.generation()));
        assert_eq!(h.compiler.compile_count(), 0);

        shader.invalidate();
        assert!(shader
            .get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env())
            .is_err());
        let comb = shader.contexts()[0].combination(FlagMask::EMPTY).unwrap();
        assert_eq!(comb.compile_count(), 2);
    }

    #[test]
    fn test_cache_hit_does_not_recompile() {
        let mut shader = shader();
        let mut h = Harness::new();
        let mask = shader.encode(["SKINNING"]);

        let first = shader
            .get_combination("LIGHTING", mask, &mut h.env())
            .unwrap()
            .program();
        let second = shader
            .get_combination("LIGHTING", mask, &mut h.env())
            .unwrap();

        assert_eq!(second.program(), first);
        assert_eq!(second.compile_count(), 1);
        assert_eq!(h.compiler.compile_count(), 1);
    }

    #[test]
    fn test_slots_are_resolved() {
        let mut shader = shader();
        let mut h = Harness::new();

        let plain = shader
            .get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env())
            .unwrap();
        assert_ne!(plain.engine_uniform(EngineUniform::WorldMat), UNRESOLVED_SLOT);
        assert_eq!(plain.engine_uniform(EngineUniform::SkinMatRows), UNRESOLVED_SLOT);
        assert_eq!(plain.sampler_slot(0), 0, "albedoMap gets unit 0");
        assert_ne!(plain.uniform_slot(0), UNRESOLVED_SLOT);
        assert_eq!(plain.buffer_slot(0), UNRESOLVED_SLOT);

        let skinned = shader
            .get_combination("LIGHTING", FlagMask::bit(0), &mut h.env())
            .unwrap();
        assert_ne!(skinned.engine_uniform(EngineUniform::SkinMatRows), UNRESOLVED_SLOT);
    }

    #[test]
    fn test_compile_error_is_scoped_and_cached() {
        let mut shader = shader();
        let mut h = Harness::new();
        let broken = shader.encode(["BROKEN"]);

        let err = shader
            .get_combination("LIGHTING", broken, &mut h.env())
            .unwrap_err();
        let compile = err.as_compile_error().expect("compile error");
        assert_eq!(compile.context, "LIGHTING");
        assert_eq!(compile.mask, broken);
        assert_eq!(compile.failure.stage, Some(ShaderStage::Fragment));

        // Same generation: the cached failure is returned without a compile.
        assert!(shader.get_combination("LIGHTING", broken, &mut h.env()).is_err());
        assert_eq!(h.compiler.compile_count(), 1);

        // Siblings still work.
        assert!(
            shader
                .get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env())
                .is_ok()
        );
    }

    #[test]
    fn test_stage_sources_have_defines_and_keep_line_count() {
        let mut shader = shader();
        let mut h = Harness::new();
        h.settings.preambles.vertex = "#version 330".to_string();

        let stages = shader
            .assemble_stage_sources(0, FlagMask::bit(0), &h.fragments, &h.settings)
            .unwrap();
        let vs = &stages[0].source;
        assert!(vs.starts_with("#version 330\n#define SKINNING\nuniform mat4 worldMat;\n"));
        assert!(vs.contains("skinMatRows"));

        h.settings.emit_flag_defines = false;
        let stages = shader
            .assemble_stage_sources(0, FlagMask::EMPTY, &h.fragments, &h.settings)
            .unwrap();
        let fs = &stages[1].source;
        assert!(!fs.contains("#error"));
        let section_lines = shader.sections()[1].raw_text().lines().count();
        assert_eq!(fs.lines().count(), section_lines);
    }

    #[test]
    fn test_invalidate_makes_entries_stale() {
        let mut shader = shader();
        let mut h = Harness::new();

        let old = shader
            .get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env())
            .unwrap()
            .program();
        let generation = shader.invalidate();

        let comb = shader
            .get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env())
            .unwrap();
        assert_eq!(comb.last_update_stamp(), generation);
        assert_eq!(comb.compile_count(), 2);
        assert_ne!(comb.program(), old);
        assert_eq!(h.compiler.release_count(), 1, "replaced program released");
        assert_eq!(h.compiler.live_programs(), 1);
    }

    #[test]
    fn test_mask_unused_flags() {
        let mut shader = shader();
        let mut h = Harness::new();
        h.settings.mask_unused_flags = true;
        let mut vocab_plus_unused = shader.encode(["SKINNING"]);
        // Bit 5 is not even in the vocabulary.
        vocab_plus_unused |= FlagMask::bit(5);

        let key = shader.combination_key(0, vocab_plus_unused, &h.fragments, &h.settings);
        assert_eq!(key, FlagMask::bit(0));
        assert_eq!(shader.contexts()[0].flag_mask(), FlagMask::from_bits(0b101));

        shader
            .get_combination_at(0, vocab_plus_unused, &mut h.env())
            .unwrap();
        shader.get_combination_at(0, FlagMask::bit(0), &mut h.env()).unwrap();
        assert_eq!(shader.contexts()[0].combination_count(), 1);
    }

    #[test]
    fn test_failed_shader_reports_not_loaded() {
        let mut shader = Shader::failed("bad.shader", "bad.shader:3: oops".to_string());
        let mut h = Harness::new();

        assert!(!shader.is_loaded());
        assert!(matches!(
            shader.get_combination("LIGHTING", FlagMask::EMPTY, &mut h.env()),
            Err(ShaderError::NotLoaded { .. })
        ));
        let report = shader.compile_contexts(&mut h.env());
        assert!(!report.is_ok());
        assert!(!shader.is_ready());
    }

    #[test]
    fn test_release_frees_programs() {
        let mut shader = shader();
        let mut h = Harness::new();
        shader.pre_load_combination(FlagMask::EMPTY);
        shader.pre_load_combination(FlagMask::bit(1));
        shader.pre_load_combination(FlagMask::bit(1));
        assert_eq!(shader.pre_load_set().len(), 2);

        let report = shader.compile_contexts(&mut h.env());
        assert_eq!(report.compiled, 2);
        assert!(shader.is_ready());

        shader.release(&mut h.compiler);
        assert_eq!(h.compiler.live_programs(), 0);
        assert_eq!(shader.contexts()[0].combination_count(), 0);
        assert!(!shader.is_ready());
    }
}
