//! Feature Flag Encoding
//!
//! A shader declares an ordered vocabulary of feature-flag names. The bit
//! position of a flag is its declaration index, and the resulting
//! [`FlagMask`] is the sole identity of a combination.
//!
//! # Usage
//!
//! ```rust,ignore
//! let vocab = FlagVocabulary::from_names(["SKINNING", "SHADOWS"])?;
//!
//! assert_eq!(vocab.encode(["SHADOWS"]), FlagMask::from_bits(0b10));
//! // Unknown names are ignored so call sites can share one flag superset.
//! assert_eq!(vocab.encode(["UNKNOWN"]), FlagMask::EMPTY);
//! ```
//!
//! Names are interned ([`Symbol`]), so lookups compare integers.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use prism_core::interner::{self, Symbol};
use thiserror::Error;

use crate::errors::{Result, ShaderError};

/// Maximum number of flags a vocabulary can declare.
pub const MAX_FLAGS: usize = 32;

/// Bitmask of active feature flags. Bit `i` is the `i`-th declared flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlagMask(u32);

impl FlagMask {
    pub const EMPTY: FlagMask = FlagMask(0);

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Mask with only `bit` set; empty when `bit` is out of range.
    #[inline]
    #[must_use]
    pub const fn bit(bit: u32) -> Self {
        match 1u32.checked_shl(bit) {
            Some(bits) => Self(bits),
            None => Self::EMPTY,
        }
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_set(self, bit: u32) -> bool {
        bit < 32 && self.0 & (1 << bit) != 0
    }

    /// Returns `true` when every bit of `other` is also set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: FlagMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Iterates the positions of the set bits, lowest first.
    pub fn iter_bits(self) -> impl Iterator<Item = u32> {
        (0..32).filter(move |&bit| self.is_set(bit))
    }
}

impl BitOr for FlagMask {
    type Output = FlagMask;

    fn bitor(self, rhs: FlagMask) -> FlagMask {
        FlagMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for FlagMask {
    fn bitor_assign(&mut self, rhs: FlagMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FlagMask {
    type Output = FlagMask;

    fn bitand(self, rhs: FlagMask) -> FlagMask {
        FlagMask(self.0 & rhs.0)
    }
}

impl From<u32> for FlagMask {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Display for FlagMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

/// Reasons a flag cannot be added to a vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VocabularyError {
    #[error("flag '{0}' is declared twice")]
    Duplicate(String),
    #[error("too many flags (at most {MAX_FLAGS} are supported)")]
    TooMany,
}

/// Ordered, duplicate-free list of the flag names a shader declares.
///
/// Internally keeps the declaration order plus a `Vec<(Symbol, bit)>` sorted
/// by symbol for binary-search lookups.
#[derive(Debug, Clone, Default)]
pub struct FlagVocabulary {
    names: Vec<Symbol>,
    lookup: Vec<(Symbol, u32)>,
}

impl FlagVocabulary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vocabulary from names in declaration order.
    pub fn from_names<I, S>(names: I) -> std::result::Result<Self, VocabularyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::new();
        for name in names {
            vocab.push(name.as_ref())?;
        }
        Ok(vocab)
    }

    /// Declares the next flag and returns its bit position.
    pub fn push(&mut self, name: &str) -> std::result::Result<u32, VocabularyError> {
        let sym = interner::intern(name);
        match self.lookup.binary_search_by_key(&sym, |&(k, _)| k) {
            Ok(_) => Err(VocabularyError::Duplicate(name.to_string())),
            Err(_) if self.names.len() >= MAX_FLAGS => Err(VocabularyError::TooMany),
            Err(idx) => {
                let bit = self.names.len() as u32;
                self.names.push(sym);
                self.lookup.insert(idx, (sym, bit));
                Ok(bit)
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Bit position of an interned flag name.
    #[inline]
    #[must_use]
    pub fn bit_of_symbol(&self, sym: Symbol) -> Option<u32> {
        self.lookup
            .binary_search_by_key(&sym, |&(k, _)| k)
            .ok()
            .map(|idx| self.lookup[idx].1)
    }

    /// Bit position of a flag name.
    #[must_use]
    pub fn bit_of(&self, name: &str) -> Option<u32> {
        interner::get(name).and_then(|sym| self.bit_of_symbol(sym))
    }

    /// Name declared at `bit`.
    #[must_use]
    pub fn name_of(&self, bit: u32) -> Option<&'static str> {
        self.names
            .get(bit as usize)
            .map(|&sym| interner::resolve(sym))
    }

    /// Encodes requested flag names into a mask. Unknown names are ignored.
    pub fn encode<I, S>(&self, requested: I) -> FlagMask
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        requested
            .into_iter()
            .filter_map(|name| self.bit_of(name.as_ref()))
            .fold(FlagMask::EMPTY, |mask, bit| mask | FlagMask::bit(bit))
    }

    /// Like [`encode`](Self::encode), but fails on the first unknown name.
    pub fn encode_strict<I, S>(&self, requested: I) -> Result<FlagMask>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = FlagMask::EMPTY;
        for name in requested {
            let name = name.as_ref();
            let bit = self
                .bit_of(name)
                .ok_or_else(|| ShaderError::UnknownFlag(name.to_string()))?;
            mask |= FlagMask::bit(bit);
        }
        Ok(mask)
    }

    /// Returns the requested names that are not part of this vocabulary.
    pub fn unknown_names<'a, I>(&self, requested: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        requested
            .into_iter()
            .filter(|name| self.bit_of(name).is_none())
            .collect()
    }

    /// Maps interned names to a mask, skipping names outside the vocabulary.
    #[must_use]
    pub fn mask_of_symbols(&self, symbols: &[Symbol]) -> FlagMask {
        symbols
            .iter()
            .filter_map(|&sym| self.bit_of_symbol(sym))
            .fold(FlagMask::EMPTY, |mask, bit| mask | FlagMask::bit(bit))
    }

    /// Names of the flags set in `mask`, in bit order.
    pub fn names_in(&self, mask: FlagMask) -> impl Iterator<Item = &'static str> + '_ {
        mask.iter_bits().filter_map(|bit| self.name_of(bit))
    }

    /// Iterates the declared names in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.iter().map(|&sym| interner::resolve(sym))
    }

    /// Mask with a bit set for every declared flag.
    #[must_use]
    pub fn full_mask(&self) -> FlagMask {
        match self.names.len() {
            0 => FlagMask::EMPTY,
            n if n >= 32 => FlagMask::from_bits(u32::MAX),
            n => FlagMask::from_bits((1u32 << n) - 1),
        }
    }
}

/// Two vocabularies are equal when they assign the same names to the same bits.
impl PartialEq for FlagVocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for FlagVocabulary {}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> FlagVocabulary {
        FlagVocabulary::from_names(["SKINNING", "SHADOWS"]).unwrap()
    }

    #[test]
    fn test_encode_scenario() {
        let vocab = vocab();

        assert_eq!(vocab.encode(["SHADOWS"]), FlagMask::from_bits(0b10));
        assert_eq!(
            vocab.encode(["SKINNING", "SHADOWS"]),
            FlagMask::from_bits(0b11)
        );
        assert_eq!(vocab.encode(["UNKNOWN"]), FlagMask::EMPTY);
    }

    #[test]
    fn test_encode_order_independent_and_deterministic() {
        let vocab = vocab();

        let a = vocab.encode(["SHADOWS", "SKINNING"]);
        let b = vocab.encode(["SKINNING", "SHADOWS"]);
        assert_eq!(a, b);
        assert_eq!(a, vocab.encode(["SKINNING", "SHADOWS"]));
        // Repeated names collapse to one bit.
        assert_eq!(vocab.encode(["SHADOWS", "SHADOWS"]), FlagMask::bit(1));
    }

    #[test]
    fn test_encode_strict_rejects_unknown() {
        let vocab = vocab();

        assert_eq!(
            vocab.encode_strict(["SKINNING"]).unwrap(),
            FlagMask::from_bits(0b01)
        );
        let err = vocab.encode_strict(["SKINNING", "SHADOW"]).unwrap_err();
        assert!(matches!(err, ShaderError::UnknownFlag(ref name) if name == "SHADOW"));
        assert_eq!(vocab.unknown_names(["SHADOW", "SKINNING"]), vec!["SHADOW"]);
    }

    #[test]
    fn test_declaration_order_defines_bits() {
        let vocab = FlagVocabulary::from_names(["B_FLAG", "A_FLAG", "C_FLAG"]).unwrap();

        assert_eq!(vocab.bit_of("B_FLAG"), Some(0));
        assert_eq!(vocab.bit_of("A_FLAG"), Some(1));
        assert_eq!(vocab.bit_of("C_FLAG"), Some(2));
        assert_eq!(vocab.name_of(2), Some("C_FLAG"));
        assert_eq!(vocab.name_of(3), None);
        assert_eq!(
            vocab.iter().collect::<Vec<_>>(),
            vec!["B_FLAG", "A_FLAG", "C_FLAG"]
        );
    }

    #[test]
    fn test_duplicates_and_capacity() {
        let mut vocab = vocab();
        assert_eq!(
            vocab.push("SKINNING"),
            Err(VocabularyError::Duplicate("SKINNING".to_string()))
        );

        let mut big = FlagVocabulary::new();
        for i in 0..MAX_FLAGS {
            big.push(&format!("FLAG_{i}")).unwrap();
        }
        assert_eq!(big.push("ONE_TOO_MANY"), Err(VocabularyError::TooMany));
        assert_eq!(big.full_mask().bits(), u32::MAX);
    }

    #[test]
    fn test_names_in_mask() {
        let vocab = vocab();
        let names: Vec<_> = vocab.names_in(FlagMask::from_bits(0b11)).collect();
        assert_eq!(names, vec!["SKINNING", "SHADOWS"]);
        assert_eq!(vocab.full_mask(), FlagMask::from_bits(0b11));
    }

    #[test]
    fn test_vocabulary_equality_depends_on_order() {
        let a = FlagVocabulary::from_names(["X_ONE", "X_TWO"]).unwrap();
        let b = FlagVocabulary::from_names(["X_ONE", "X_TWO"]).unwrap();
        let c = FlagVocabulary::from_names(["X_TWO", "X_ONE"]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_bit_out_of_range_is_empty() {
        assert_eq!(FlagMask::bit(31).bits(), 1 << 31);
        assert_eq!(FlagMask::bit(32), FlagMask::EMPTY);
        assert_eq!(FlagMask::bit(u32::MAX), FlagMask::EMPTY);
    }

    #[test]
    fn test_mask_display() {
        assert_eq!(FlagMask::from_bits(0b101).to_string(), "0b101");
        assert_eq!(FlagMask::EMPTY.to_string(), "0b0");
    }
}
