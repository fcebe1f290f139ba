//! Computable Values
//!
//! Formula caches are typed; the engine needs two things from a cached
//! value: equality (to tell whether a recompute actually changed anything)
//! and a stable 32-bit hash (the generation seed of last resort for
//! formulas with no table-row ancestry).

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// A value a formula can cache.
pub trait Computable: Clone + PartialEq + 'static {
    /// Stable hash used as a generation seed fallback.
    fn seed_hash(&self) -> i32;
}

fn fold<H: Hash>(value: &H) -> i32 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    let wide = hasher.finish();
    (wide ^ (wide >> 32)) as i32
}

impl Computable for () {
    fn seed_hash(&self) -> i32 {
        0
    }
}

impl Computable for bool {
    fn seed_hash(&self) -> i32 {
        fold(self)
    }
}

impl Computable for i32 {
    fn seed_hash(&self) -> i32 {
        fold(self)
    }
}

impl Computable for i64 {
    fn seed_hash(&self) -> i32 {
        fold(self)
    }
}

impl Computable for f64 {
    fn seed_hash(&self) -> i32 {
        fold(&self.to_bits())
    }
}

impl Computable for String {
    fn seed_hash(&self) -> i32 {
        fold(self)
    }
}

impl<T: Computable> Computable for Option<T> {
    fn seed_hash(&self) -> i32 {
        match self {
            Some(v) => v.seed_hash().wrapping_add(1),
            None => 0,
        }
    }
}

impl<T: Computable> Computable for Vec<T> {
    fn seed_hash(&self) -> i32 {
        let mut acc: i32 = fold(&self.len());
        for item in self {
            acc = acc.wrapping_mul(31).wrapping_add(item.seed_hash());
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_hash_is_stable() {
        assert_eq!(42i64.seed_hash(), 42i64.seed_hash());
        assert_eq!("x".to_string().seed_hash(), "x".to_string().seed_hash());
    }

    #[test]
    fn distinct_values_usually_differ() {
        assert_ne!(1i64.seed_hash(), 2i64.seed_hash());
        assert_ne!(Some(1i32).seed_hash(), None::<i32>.seed_hash());
    }
}
