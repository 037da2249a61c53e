//! Render State
//!
//! Per-context fixed-function configuration: blending, depth test and write,
//! culling, alpha-to-coverage and tessellation patch size. Values are parsed
//! from the FX section by name and, with the `wgpu` feature, convert to the
//! matching `wgpu` descriptor types.

use std::fmt;

/// Blend factor applied to source or destination colour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    #[default]
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DestAlpha,
    OneMinusDestAlpha,
    DestColor,
    SrcColor,
    OneMinusDestColor,
    OneMinusSrcColor,
}

impl BlendFactor {
    pub const ALL: [BlendFactor; 10] = [
        BlendFactor::Zero,
        BlendFactor::One,
        BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DestAlpha,
        BlendFactor::OneMinusDestAlpha,
        BlendFactor::DestColor,
        BlendFactor::SrcColor,
        BlendFactor::OneMinusDestColor,
        BlendFactor::OneMinusSrcColor,
    ];

    /// Name used in FX sources.
    #[must_use]
    pub fn fx_name(self) -> &'static str {
        match self {
            BlendFactor::Zero => "Zero",
            BlendFactor::One => "One",
            BlendFactor::SrcAlpha => "SrcAlpha",
            BlendFactor::OneMinusSrcAlpha => "OneMinusSrcAlpha",
            BlendFactor::DestAlpha => "DestAlpha",
            BlendFactor::OneMinusDestAlpha => "OneMinusDestAlpha",
            BlendFactor::DestColor => "DestColor",
            BlendFactor::SrcColor => "SrcColor",
            BlendFactor::OneMinusDestColor => "OneMinusDestColor",
            BlendFactor::OneMinusSrcColor => "OneMinusSrcColor",
        }
    }

    #[must_use]
    pub fn from_fx_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.fx_name() == name)
    }
}

/// Named blend presets accepted by `BlendMode = <preset>;`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendPreset {
    Replace,
    Blend,
    Add,
    AddBlended,
    Mult,
}

impl BlendPreset {
    #[must_use]
    pub fn from_fx_name(name: &str) -> Option<Self> {
        match name {
            "Replace" => Some(BlendPreset::Replace),
            "Blend" => Some(BlendPreset::Blend),
            "Add" => Some(BlendPreset::Add),
            "AddBlended" => Some(BlendPreset::AddBlended),
            "Mult" => Some(BlendPreset::Mult),
            _ => None,
        }
    }

    /// Source and destination factors, or `None` when blending is off.
    #[must_use]
    pub fn factors(self) -> Option<(BlendFactor, BlendFactor)> {
        match self {
            BlendPreset::Replace => None,
            BlendPreset::Blend => Some((BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha)),
            BlendPreset::Add => Some((BlendFactor::One, BlendFactor::One)),
            BlendPreset::AddBlended => Some((BlendFactor::SrcAlpha, BlendFactor::One)),
            BlendPreset::Mult => Some((BlendFactor::DestColor, BlendFactor::Zero)),
        }
    }
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    #[default]
    LessEqual,
    Less,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

impl DepthFunc {
    #[must_use]
    pub fn from_fx_name(name: &str) -> Option<Self> {
        match name {
            "LessEqual" => Some(DepthFunc::LessEqual),
            "Less" => Some(DepthFunc::Less),
            "Equal" => Some(DepthFunc::Equal),
            "Greater" => Some(DepthFunc::Greater),
            "GreaterEqual" => Some(DepthFunc::GreaterEqual),
            "Always" => Some(DepthFunc::Always),
            _ => None,
        }
    }
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    Back,
    Front,
    None,
}

impl CullMode {
    #[must_use]
    pub fn from_fx_name(name: &str) -> Option<Self> {
        match name {
            "Back" => Some(CullMode::Back),
            "Front" => Some(CullMode::Front),
            "None" => Some(CullMode::None),
            _ => None,
        }
    }
}

/// Fixed-function state of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blending_enabled: bool,
    pub blend_src: BlendFactor,
    pub blend_dst: BlendFactor,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub cull_mode: CullMode,
    pub alpha_to_coverage: bool,
    /// Vertices per tessellation patch, at least 1.
    pub tess_patch_vertices: u16,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blending_enabled: false,
            blend_src: BlendFactor::Zero,
            blend_dst: BlendFactor::Zero,
            depth_test: true,
            depth_write: true,
            depth_func: DepthFunc::LessEqual,
            cull_mode: CullMode::Back,
            alpha_to_coverage: false,
            tess_patch_vertices: 1,
        }
    }
}

impl RenderState {
    /// Applies a blend preset.
    pub fn set_blend_preset(&mut self, preset: BlendPreset) {
        match preset.factors() {
            Some((src, dst)) => self.set_blend_factors(src, dst),
            None => {
                self.blending_enabled = false;
                self.blend_src = BlendFactor::Zero;
                self.blend_dst = BlendFactor::Zero;
            }
        }
    }

    /// Sets explicit factors. `One, Zero` is equivalent to no blending.
    pub fn set_blend_factors(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.blend_src = src;
        self.blend_dst = dst;
        self.blending_enabled = !(src == BlendFactor::One && dst == BlendFactor::Zero);
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blending_enabled {
            write!(
                f,
                "blend({}, {})",
                self.blend_src.fx_name(),
                self.blend_dst.fx_name()
            )?;
        } else {
            f.write_str("blend(off)")?;
        }
        write!(
            f,
            " depth(test={}, write={}, {:?}) cull({:?}) a2c={} patch={}",
            self.depth_test,
            self.depth_write,
            self.depth_func,
            self.cull_mode,
            self.alpha_to_coverage,
            self.tess_patch_vertices
        )
    }
}

// ─── wgpu mirrors ────────────────────────────────────────────────────────────

#[cfg(feature = "wgpu")]
impl From<BlendFactor> for wgpu::BlendFactor {
    fn from(factor: BlendFactor) -> Self {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::DestAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDestAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
            BlendFactor::DestColor => wgpu::BlendFactor::Dst,
            BlendFactor::SrcColor => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusDestColor => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        }
    }
}

#[cfg(feature = "wgpu")]
impl From<DepthFunc> for wgpu::CompareFunction {
    fn from(func: DepthFunc) -> Self {
        match func {
            DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
            DepthFunc::Less => wgpu::CompareFunction::Less,
            DepthFunc::Equal => wgpu::CompareFunction::Equal,
            DepthFunc::Greater => wgpu::CompareFunction::Greater,
            DepthFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            DepthFunc::Always => wgpu::CompareFunction::Always,
        }
    }
}

#[cfg(feature = "wgpu")]
impl RenderState {
    /// `wgpu` blend state, `None` when blending is disabled.
    #[must_use]
    pub fn wgpu_blend_state(&self) -> Option<wgpu::BlendState> {
        self.blending_enabled.then(|| {
            let component = wgpu::BlendComponent {
                src_factor: self.blend_src.into(),
                dst_factor: self.blend_dst.into(),
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState {
                color: component,
                alpha: component,
            }
        })
    }

    /// Depth compare function; a disabled depth test always passes.
    #[must_use]
    pub fn wgpu_depth_compare(&self) -> wgpu::CompareFunction {
        if self.depth_test {
            self.depth_func.into()
        } else {
            wgpu::CompareFunction::Always
        }
    }

    #[must_use]
    pub fn wgpu_cull_mode(&self) -> Option<wgpu::Face> {
        match self.cull_mode {
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = RenderState::default();
        assert!(!state.blending_enabled);
        assert!(state.depth_test && state.depth_write);
        assert_eq!(state.depth_func, DepthFunc::LessEqual);
        assert_eq!(state.cull_mode, CullMode::Back);
        assert_eq!(state.tess_patch_vertices, 1);
    }

    #[test]
    fn test_blend_presets() {
        let mut state = RenderState::default();

        state.set_blend_preset(BlendPreset::Blend);
        assert!(state.blending_enabled);
        assert_eq!(
            (state.blend_src, state.blend_dst),
            (BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha)
        );

        state.set_blend_preset(BlendPreset::Replace);
        assert!(!state.blending_enabled);

        state.set_blend_factors(BlendFactor::One, BlendFactor::Zero);
        assert!(!state.blending_enabled, "One/Zero is opaque replace");
    }

    #[test]
    fn test_fx_names_round_trip() {
        for factor in BlendFactor::ALL {
            assert_eq!(BlendFactor::from_fx_name(factor.fx_name()), Some(factor));
        }
        assert_eq!(DepthFunc::from_fx_name("GreaterEqual"), Some(DepthFunc::GreaterEqual));
        assert_eq!(CullMode::from_fx_name("None"), Some(CullMode::None));
        assert_eq!(CullMode::from_fx_name("Sideways"), None);
    }

    #[cfg(feature = "wgpu")]
    #[test]
    fn test_wgpu_mapping() {
        let mut state = RenderState::default();
        assert!(state.wgpu_blend_state().is_none());
        assert_eq!(state.wgpu_cull_mode(), Some(wgpu::Face::Back));

        state.set_blend_preset(BlendPreset::Add);
        let blend = state.wgpu_blend_state().unwrap();
        assert_eq!(blend.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(blend.alpha.dst_factor, wgpu::BlendFactor::One);

        state.depth_test = false;
        assert_eq!(state.wgpu_depth_compare(), wgpu::CompareFunction::Always);
        state.cull_mode = CullMode::None;
        assert_eq!(state.wgpu_cull_mode(), None);
    }
}
