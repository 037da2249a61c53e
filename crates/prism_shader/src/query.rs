//! Element Query Surface
//!
//! Generic indexed accessors over a shader's declared elements, addressed by
//! an element-kind tag and an integer parameter id. Tooling polls these every
//! frame with speculative ids, so nothing here fails loudly: unknown kinds,
//! unknown params and out-of-range indices yield `None` / `false` / `0`.
//!
//! Ids are plain integers so they can cross FFI and scripting boundaries;
//! [`ElementKind`] and [`ElementParam`] name them.

use crate::shader::Shader;

macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<i32> for $name {
            type Error = i32;

            fn try_from(value: i32) -> Result<Self, i32> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }
    };
}

int_enum! {
    /// Element kinds.
    ElementKind {
        Context = 600,
        Sampler = 601,
        Uniform = 602,
        Buffer = 609,
    }
}

int_enum! {
    /// Parameter ids.
    ElementParam {
        ContextName = 603,
        SamplerName = 604,
        SamplerDefaultTexture = 605,
        UniformName = 606,
        UniformSize = 607,
        UniformDefaultValue = 608,
        BufferName = 610,
        SamplerTexUnit = 611,
    }
}

fn decode(kind: i32, param: i32) -> Option<(ElementKind, ElementParam)> {
    match (ElementKind::try_from(kind), ElementParam::try_from(param)) {
        (Ok(kind), Ok(param)) => Some((kind, param)),
        _ => {
            log::trace!("query: unknown element kind {kind} or param {param}");
            None
        }
    }
}

impl Shader {
    /// Number of elements of `kind`; `0` for unknown kinds.
    pub fn elem_count(&self, kind: impl Into<i32>) -> usize {
        match ElementKind::try_from(kind.into()) {
            Ok(ElementKind::Context) => self.contexts().len(),
            Ok(ElementKind::Sampler) => self.samplers.len(),
            Ok(ElementKind::Uniform) => self.uniforms.len(),
            Ok(ElementKind::Buffer) => self.buffers.len(),
            Err(kind) => {
                log::trace!("query: unknown element kind {kind}");
                0
            }
        }
    }

    /// Integer parameter: a uniform's component count or a sampler's texture unit.
    pub fn elem_param_i(
        &self,
        kind: impl Into<i32>,
        index: usize,
        param: impl Into<i32>,
    ) -> Option<i32> {
        match decode(kind.into(), param.into())? {
            (ElementKind::Uniform, ElementParam::UniformSize) => {
                self.uniforms.get(index).map(|u| i32::from(u.size))
            }
            (ElementKind::Sampler, ElementParam::SamplerTexUnit) => {
                self.samplers.get(index).map(|s| s.tex_unit as i32)
            }
            _ => None,
        }
    }

    /// Component `component` of a uniform's default value.
    pub fn elem_param_f(
        &self,
        kind: impl Into<i32>,
        index: usize,
        param: impl Into<i32>,
        component: usize,
    ) -> Option<f32> {
        match decode(kind.into(), param.into())? {
            (ElementKind::Uniform, ElementParam::UniformDefaultValue) => {
                let uniform = self.uniforms.get(index)?;
                (component < usize::from(uniform.size)).then(|| uniform.default[component])
            }
            _ => None,
        }
    }

    /// Overrides component `component` of a uniform's default value.
    /// Returns `false` when nothing was changed.
    pub fn set_elem_param_f(
        &mut self,
        kind: impl Into<i32>,
        index: usize,
        param: impl Into<i32>,
        component: usize,
        value: f32,
    ) -> bool {
        let Some((ElementKind::Uniform, ElementParam::UniformDefaultValue)) =
            decode(kind.into(), param.into())
        else {
            return false;
        };
        match self.uniforms.get_mut(index) {
            Some(uniform) if component < usize::from(uniform.size) => {
                uniform.default[component] = value;
                true
            }
            _ => {
                log::trace!("query: no uniform component {index}.{component}");
                false
            }
        }
    }

    /// String parameter: element names and a sampler's default texture.
    pub fn elem_param_str(
        &self,
        kind: impl Into<i32>,
        index: usize,
        param: impl Into<i32>,
    ) -> Option<&str> {
        match decode(kind.into(), param.into())? {
            (ElementKind::Context, ElementParam::ContextName) => {
                self.contexts().get(index).map(|c| c.name())
            }
            (ElementKind::Sampler, ElementParam::SamplerName) => {
                self.samplers.get(index).map(|s| s.name.as_str())
            }
            (ElementKind::Sampler, ElementParam::SamplerDefaultTexture) => {
                self.samplers.get(index)?.default_texture.as_deref()
            }
            (ElementKind::Uniform, ElementParam::UniformName) => {
                self.uniforms.get(index).map(|u| u.name.as_str())
            }
            (ElementKind::Buffer, ElementParam::BufferName) => {
                self.buffers.get(index).map(|b| b.name.as_str())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::CodeFragment;
    use crate::parser::parse_shader;

    fn shader() -> Shader {
        let src = r#"[[FX]]
sampler2D albedoMap = sampler_state { Texture = "white.png"; TexUnit = 3; };
float4 tint = { 1, 0.5, 0.25, 1 };
float gloss = 0.5;
buffer Lights;
context MAIN { VertexShader = compile GLSL V; PixelShader = compile GLSL F; }
[[V]]
[[F]]
"#;
        let parsed = parse_shader("query.shader", src).unwrap();
        let sections = parsed
            .sections
            .iter()
            .map(|s| CodeFragment::from_scanned(s.name.clone(), s.source.clone(), &[]))
            .collect();
        Shader::from_parsed("query.shader", parsed, sections)
    }

    #[test]
    fn test_counts() {
        let shader = shader();
        assert_eq!(shader.elem_count(ElementKind::Context), 1);
        assert_eq!(shader.elem_count(ElementKind::Sampler), 1);
        assert_eq!(shader.elem_count(602), 2);
        assert_eq!(shader.elem_count(ElementKind::Buffer), 1);
        assert_eq!(shader.elem_count(12345), 0);
    }

    #[test]
    fn test_params() {
        use ElementKind as K;
        use ElementParam as P;
        let shader = shader();

        assert_eq!(shader.elem_param_str(K::Context, 0, P::ContextName), Some("MAIN"));
        assert_eq!(
            shader.elem_param_str(K::Sampler, 0, P::SamplerDefaultTexture),
            Some("white.png")
        );
        assert_eq!(shader.elem_param_i(K::Sampler, 0, P::SamplerTexUnit), Some(3));
        assert_eq!(shader.elem_param_i(K::Uniform, 1, P::UniformSize), Some(1));
        assert_eq!(shader.elem_param_f(K::Uniform, 0, P::UniformDefaultValue, 2), Some(0.25));
        assert_eq!(shader.elem_param_str(K::Buffer, 0, P::BufferName), Some("Lights"));
    }

    #[test]
    fn test_sentinels() {
        use ElementKind as K;
        use ElementParam as P;
        let shader = shader();

        assert_eq!(shader.elem_param_str(K::Context, 5, P::ContextName), None);
        assert_eq!(shader.elem_param_str(K::Context, 0, P::UniformName), None);
        assert_eq!(shader.elem_param_i(999, 0, 607), None);
        assert_eq!(shader.elem_param_f(K::Uniform, 1, P::UniformDefaultValue, 1), None);
    }

    #[test]
    fn test_set_default_value() {
        use ElementKind as K;
        use ElementParam as P;
        let mut shader = shader();

        assert!(shader.set_elem_param_f(K::Uniform, 1, P::UniformDefaultValue, 0, 0.75));
        assert_eq!(shader.elem_param_f(K::Uniform, 1, P::UniformDefaultValue, 0), Some(0.75));
        assert!(!shader.set_elem_param_f(K::Uniform, 1, P::UniformDefaultValue, 3, 1.0));
        assert!(!shader.set_elem_param_f(K::Sampler, 0, P::UniformDefaultValue, 0, 1.0));
        assert!(!shader.set_elem_param_f(K::Uniform, 0, P::UniformName, 0, 1.0));
    }
}
