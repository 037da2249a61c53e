//! Flag-Conditioned Regions
//!
//! Evaluates `#ifdef FLAG` / `#ifndef FLAG` / `#else` / `#endif` for flags of
//! the shader's vocabulary against a combination mask, keeping only the code
//! whose guard holds. Conditionals on any other name, and `#if` / `#elif`
//! expressions, are left untouched for the downstream compiler; their nesting
//! is still tracked so a flag region inside a dropped foreign branch is
//! dropped as well.
//!
//! Dropped lines and the evaluated directives themselves become empty lines,
//! so line numbers in compiler diagnostics match the assembled text.

use crate::errors::{Result, ShaderError};
use crate::flags::{FlagMask, FlagVocabulary};
use crate::fragment::{directive, directive_ident};

#[derive(Debug, Clone, Copy)]
enum Frame {
    Flag {
        taking: bool,
        seen_else: bool,
        parent_active: bool,
        line: u32,
    },
    Foreign {
        parent_active: bool,
        line: u32,
    },
}

impl Frame {
    fn active(self) -> bool {
        match self {
            Frame::Flag {
                taking,
                parent_active,
                ..
            } => taking && parent_active,
            Frame::Foreign { parent_active, .. } => parent_active,
        }
    }
}

fn conditional(line: u32, message: impl Into<String>) -> ShaderError {
    ShaderError::Conditional {
        line,
        message: message.into(),
    }
}

/// Keeps the regions of `text` whose flag guards hold for `mask`.
pub fn gate_flags(text: &str, vocabulary: &FlagVocabulary, mask: FlagMask) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut stack: Vec<Frame> = Vec::new();

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx as u32 + 1;
        let active = stack.last().is_none_or(|frame| frame.active());

        let keep = match directive(line) {
            Some((kw @ ("ifdef" | "ifndef"), rest)) => {
                let bit = directive_ident(rest).and_then(|name| vocabulary.bit_of(name));
                if let Some(bit) = bit {
                    let defined = mask.is_set(bit);
                    stack.push(Frame::Flag {
                        taking: if kw == "ifdef" { defined } else { !defined },
                        seen_else: false,
                        parent_active: active,
                        line: line_no,
                    });
                    false
                } else {
                    stack.push(Frame::Foreign {
                        parent_active: active,
                        line: line_no,
                    });
                    active
                }
            }
            Some(("if", _)) => {
                stack.push(Frame::Foreign {
                    parent_active: active,
                    line: line_no,
                });
                active
            }
            Some(("elif", _)) => match stack.last() {
                Some(Frame::Flag { .. }) => {
                    return Err(conditional(
                        line_no,
                        "#elif cannot continue a feature-flag conditional",
                    ));
                }
                Some(Frame::Foreign { parent_active, .. }) => *parent_active,
                None => return Err(conditional(line_no, "#elif without matching #if")),
            },
            Some(("else", _)) => match stack.last_mut() {
                Some(Frame::Flag {
                    taking, seen_else, ..
                }) => {
                    if *seen_else {
                        return Err(conditional(line_no, "duplicate #else"));
                    }
                    *taking = !*taking;
                    *seen_else = true;
                    false
                }
                Some(Frame::Foreign { parent_active, .. }) => *parent_active,
                None => return Err(conditional(line_no, "#else without matching #ifdef")),
            },
            Some(("endif", _)) => match stack.pop() {
                Some(Frame::Flag { .. }) => false,
                Some(Frame::Foreign { parent_active, .. }) => parent_active,
                None => return Err(conditional(line_no, "#endif without matching #ifdef")),
            },
            _ => active,
        };

        if keep {
            out.push_str(line);
        } else if line.ends_with('\n') {
            out.push('\n');
        }
    }

    if let Some(frame) = stack.last() {
        let line = match *frame {
            Frame::Flag { line, .. } | Frame::Foreign { line, .. } => line,
        };
        return Err(conditional(line, "unterminated conditional block"));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> FlagVocabulary {
        FlagVocabulary::from_names(["SKINNING", "SHADOWS"]).unwrap()
    }

    const SOURCE: &str = "\
pre
#ifdef SKINNING
skin
#else
rigid
#endif
#ifndef SHADOWS
noshadow
#endif
post
";

    #[test]
    fn test_no_flags() {
        let out = gate_flags(SOURCE, &vocab(), FlagMask::EMPTY).unwrap();
        assert_eq!(out, "pre\n\n\n\nrigid\n\n\nnoshadow\n\npost\n");
    }

    #[test]
    fn test_all_flags() {
        let out = gate_flags(SOURCE, &vocab(), FlagMask::from_bits(0b11)).unwrap();
        assert_eq!(out, "pre\n\nskin\n\n\n\n\n\n\npost\n");
        assert_eq!(out.lines().count(), SOURCE.lines().count());
    }

    #[test]
    fn test_nested_flag_regions() {
        let src = "#ifdef SKINNING\na\n#ifdef SHADOWS\nb\n#endif\n#endif\n";
        let vocab = vocab();

        let only_shadows = gate_flags(src, &vocab, FlagMask::from_bits(0b10)).unwrap();
        assert!(!only_shadows.contains('a'));
        assert!(!only_shadows.contains('b'), "inner region needs the outer flag");

        let both = gate_flags(src, &vocab, FlagMask::from_bits(0b11)).unwrap();
        assert_eq!(both, "\na\n\nb\n\n\n");
    }

    #[test]
    fn test_foreign_conditionals_pass_through() {
        let src = "#ifdef GL_ES\nprecision mediump float;\n#else\n#ifdef SHADOWS\ns\n#endif\n#endif\n#if MAX > 2\nx\n#elif MAX > 1\ny\n#endif\n";
        let out = gate_flags(src, &vocab(), FlagMask::from_bits(0b10)).unwrap();

        assert_eq!(
            out,
            "#ifdef GL_ES\nprecision mediump float;\n#else\n\ns\n\n#endif\n#if MAX > 2\nx\n#elif MAX > 1\ny\n#endif\n"
        );
    }

    #[test]
    fn test_flag_region_inside_dropped_foreign_branch() {
        // A foreign conditional is never dropped by us, so its body stays.
        let src = "#if 0\n#ifdef SKINNING\nskin\n#endif\n#endif\n";
        let out = gate_flags(src, &vocab(), FlagMask::bit(0)).unwrap();
        assert_eq!(out, "#if 0\n\nskin\n\n#endif\n");

        // Inside a dropped flag branch, foreign directives are dropped too.
        let src = "#ifdef SHADOWS\n#if X\nx\n#endif\n#endif\n";
        let out = gate_flags(src, &vocab(), FlagMask::EMPTY).unwrap();
        assert_eq!(out, "\n\n\n\n\n");
    }

    #[test]
    fn test_errors() {
        let vocab = vocab();

        let err = gate_flags("#ifdef SKINNING\nx\n", &vocab, FlagMask::EMPTY).unwrap_err();
        assert!(matches!(err, ShaderError::Conditional { line: 1, .. }));

        let err = gate_flags("x\n#endif\n", &vocab, FlagMask::EMPTY).unwrap_err();
        assert!(matches!(err, ShaderError::Conditional { line: 2, .. }));

        let err = gate_flags("#ifdef SHADOWS\n#else\n#else\n#endif\n", &vocab, FlagMask::EMPTY)
            .unwrap_err();
        assert!(matches!(err, ShaderError::Conditional { line: 3, .. }));

        let err =
            gate_flags("#ifdef SHADOWS\n#elif X\n#endif\n", &vocab, FlagMask::EMPTY).unwrap_err();
        assert!(matches!(err, ShaderError::Conditional { line: 2, .. }));
    }

    #[test]
    fn test_text_without_trailing_newline() {
        let out = gate_flags("#ifdef SHADOWS\nshadow\n#endif", &vocab(), FlagMask::bit(1)).unwrap();
        assert_eq!(out, "\nshadow\n");
    }
}
