//! Global String Interner
//!
//! Turns flag names into compact integer [`Symbol`]s so that vocabularies and
//! fragment flag references compare and hash as integers.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact identifier for an interned string.
pub type Symbol = Spur;

/// Interns `s`, returning the existing symbol when it was seen before.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up the symbol of an already interned string without allocating.
#[inline]
#[must_use]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
#[must_use]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

/// Interns the engine-standard flag names up front so the first shader load
/// does not pay for them on the hot path.
pub fn preload_common_flags() {
    let common = [
        "SKINNING",
        "MORPH_TARGETS",
        "SHADOWS",
        "SOFT_SHADOWS",
        "NORMAL_MAP",
        "ALBEDO_MAP",
        "ENV_MAP",
        "INSTANCING",
        "ALPHA_TEST",
        "VERTEX_COLOR",
    ];

    for name in common {
        intern(name);
    }
    log::trace!("Interned {} common flag names", common.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let s1 = intern("SKINNING");
        let s2 = intern("SKINNING");
        let s3 = intern("SHADOWS");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);

        assert_eq!(resolve(s1), "SKINNING");
        assert_eq!(resolve(s3), "SHADOWS");
    }

    #[test]
    fn test_get() {
        let _ = intern("existing_flag");

        assert!(get("existing_flag").is_some());
        assert!(get("never_interned_flag_name").is_none());
    }

    #[test]
    fn test_preload_common_flags() {
        preload_common_flags();
        assert!(get("INSTANCING").is_some());
    }
}
