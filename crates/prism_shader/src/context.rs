//! Shader Contexts
//!
//! A context is one named pass configuration of a shader: render state plus
//! the code sections bound to each stage. It owns the cache of compiled
//! [`Combination`]s, keyed by exact flag mask.

use prism_core::Generation;
use rustc_hash::FxHashMap;

use crate::combination::Combination;
use crate::errors::{Result, ShaderError};
use crate::flags::FlagMask;
use crate::render_state::RenderState;
use crate::stage::{ShaderStage, StageBindings, StageFlags};

#[derive(Debug, Clone)]
pub struct ShaderContext {
    name: String,
    pub(crate) render_state: RenderState,
    pub(crate) stages: StageBindings,
    /// Flag bits used by the bound sections, valid at `linked_at`.
    pub(crate) flag_mask: FlagMask,
    pub(crate) linked_at: Option<Generation>,
    pub(crate) compiled: bool,
    pub(crate) combinations: FxHashMap<FlagMask, Combination>,
}

impl ShaderContext {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            render_state: RenderState::default(),
            stages: StageBindings::new(),
            flag_mask: FlagMask::EMPTY,
            linked_at: None,
            compiled: false,
            combinations: FxHashMap::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }

    #[must_use]
    pub fn stages(&self) -> &StageBindings {
        &self.stages
    }

    /// Union of the flag bits referenced by the bound sections and their
    /// includes. Empty until the context is first compiled.
    #[must_use]
    pub fn flag_mask(&self) -> FlagMask {
        self.flag_mask
    }

    /// `true` once a pre-compilation pass covered this context.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Checks that the bound stages form a graphics or a compute program.
    pub fn validate(&self, shader: &str) -> Result<()> {
        let bound = self.stages.bound();
        let invalid = |reason: &str| ShaderError::InvalidContext {
            shader: shader.to_string(),
            context: self.name.clone(),
            reason: reason.to_string(),
        };

        if bound.contains(StageFlags::COMPUTE) {
            if bound != StageFlags::COMPUTE {
                return Err(invalid("compute stage cannot be combined with graphics stages"));
            }
            return Ok(());
        }
        if !bound.contains(StageFlags::GRAPHICS) {
            return Err(invalid("requires a vertex and a fragment stage, or a compute stage"));
        }
        Ok(())
    }

    /// `true` when the context is a compute program.
    #[must_use]
    pub fn is_compute(&self) -> bool {
        self.stages.get(ShaderStage::Compute).is_some()
    }

    #[must_use]
    pub fn combination(&self, mask: FlagMask) -> Option<&Combination> {
        self.combinations.get(&mask)
    }

    #[must_use]
    pub fn combination_count(&self) -> usize {
        self.combinations.len()
    }

    pub fn combinations(&self) -> impl Iterator<Item = &Combination> {
        self.combinations.values()
    }
}
