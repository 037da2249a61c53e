//! Loads a shader file, compiles the requested combination of every context
//! with the dry-run compiler and prints what the pipeline produced.
//!
//! ```text
//! fx_inspect assets/shaders/model.shader --flags SKINNING,FOG --sources
//! fx_inspect model.shader --settings prism.json --context LIGHTING
//! ```
//!
//! Set `RUST_LOG=debug` to watch cache misses and compiles.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use prism::shader::{
    DryRunCompiler, EngineUniform, FileSourceLoader, LibrarySettings, Shader, ShaderLibrary,
    UNRESOLVED_SLOT,
};

#[derive(Parser, Debug)]
#[command(
    name = "fx_inspect",
    about = "Print the combinations, slots and assembled sources of a Prism shader."
)]
struct Args {
    /// Shader file; its directory is the include root
    shader: PathBuf,

    /// Flags of the combination to build
    #[arg(long, value_name = "A,B", value_delimiter = ',')]
    flags: Vec<String>,

    /// Only build this context
    #[arg(long, value_name = "NAME")]
    context: Option<String>,

    /// Library settings JSON
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Print the assembled stage sources
    #[arg(long, action = clap::ArgAction::SetTrue)]
    sources: bool,
}

fn load_settings(path: Option<&Path>) -> Result<LibrarySettings> {
    let Some(path) = path else {
        return Ok(LibrarySettings::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings {}", path.display()))?;
    LibrarySettings::from_json_str(&json)
        .with_context(|| format!("parsing settings {}", path.display()))
}

fn print_declarations(shader: &Shader) {
    println!("shader '{}' ({})", shader.name(), shader.generation());

    let flags: Vec<_> = shader.vocabulary().iter().collect();
    println!("  flags: {}", if flags.is_empty() { "-".to_string() } else { flags.join(", ") });

    for sampler in shader.samplers() {
        println!(
            "  sampler {} {:?} unit={} address={:?} filter={:?} aniso={} texture={}",
            sampler.name,
            sampler.sampler_type,
            sampler.tex_unit,
            sampler.address,
            sampler.filter,
            sampler.max_anisotropy,
            sampler.default_texture.as_deref().unwrap_or("-")
        );
    }
    for uniform in shader.uniforms() {
        let size = usize::from(uniform.size);
        println!("  uniform {} {:?}", uniform.name, &uniform.default[..size]);
    }
    for buffer in shader.buffers() {
        println!("  buffer {}", buffer.name);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let settings = load_settings(args.settings.as_deref())?;

    let file_name = args
        .shader
        .file_name()
        .and_then(|n| n.to_str())
        .context("shader path has no file name")?
        .to_string();
    let mut library = ShaderLibrary::with_settings(FileSourceLoader::new(&args.shader), settings);
    let mut compiler = DryRunCompiler::new();

    let id = library
        .load_shader(&file_name)
        .with_context(|| format!("loading {}", args.shader.display()))?;
    let flag_names: Vec<&str> = args
        .flags
        .iter()
        .map(|flag| flag.trim())
        .filter(|flag| !flag.is_empty())
        .collect();
    let mask = library.encode_flags(id, &flag_names)?;

    let contexts: Vec<String> = {
        let shader = library.shader(id).context("shader vanished")?;
        print_declarations(shader);
        println!("  fragments: {}", library.fragments().len());
        shader
            .contexts()
            .iter()
            .map(|c| c.name().to_string())
            .filter(|name| args.context.as_ref().is_none_or(|wanted| wanted == name))
            .collect()
    };
    if contexts.is_empty() {
        bail!("no matching context");
    }

    println!("combination {mask}");
    let mut failures = 0;
    for name in &contexts {
        let comb = match library.get_combination(id, name, mask, &mut compiler) {
            Ok(comb) => comb,
            Err(err) => {
                failures += 1;
                println!("  context {name}: FAILED\n    {err}");
                continue;
            }
        };

        let program = comb.program().context("compiled combination without program")?;
        println!("  context {name}: {program} hash={:032x}", comb.source_hash());
        let resolved: Vec<String> = EngineUniform::ALL
            .iter()
            .filter(|&&u| comb.engine_uniform(u) != UNRESOLVED_SLOT)
            .map(|&u| format!("{}={}", u.name(), comb.engine_uniform(u)))
            .collect();
        println!("    engine uniforms: {}", resolved.join(" "));

        let shader = library.shader(id).context("shader vanished")?;
        let ctx_index = shader.find_context(name).context("context vanished")?;
        println!("    state: {}", shader.contexts()[ctx_index].render_state());
        if args.sources {
            for stage in compiler.sources(program).unwrap_or_default() {
                println!("    --- {} ---", stage.stage);
                for (line_no, line) in stage.source.lines().enumerate() {
                    println!("    {:4} | {line}", line_no + 1);
                }
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} contexts failed to compile", contexts.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags_and_options() {
        let args = Args::try_parse_from([
            "fx_inspect",
            "assets/model.shader",
            "--flags",
            "SKINNING,FOG",
            "--context",
            "LIGHTING",
            "--sources",
        ])
        .unwrap();

        assert_eq!(args.shader, PathBuf::from("assets/model.shader"));
        assert_eq!(args.flags, ["SKINNING", "FOG"]);
        assert_eq!(args.context.as_deref(), Some("LIGHTING"));
        assert!(args.settings.is_none());
        assert!(args.sources);
    }

    #[test]
    fn test_shader_path_is_required() {
        assert!(Args::try_parse_from(["fx_inspect", "--sources"]).is_err());
        assert!(Args::try_parse_from(["fx_inspect", "a.shader", "--bogus"]).is_err());
    }
}
