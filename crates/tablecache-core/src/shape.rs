//! Shape keys: the memoization key for parameter-set driven statements.
//!
//! A [`ShapeKey`] captures whether conditions are AND- or OR-joined and the
//! ordered list of parameter names, never their values. Parameter order is
//! significant: `[a, b]` and `[b, a]` are different shapes.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

/// Memoization key derived from a parameter set's structure.
#[derive(Debug, Clone)]
pub struct ShapeKey {
    match_all: bool,
    names: SmallVec<[Box<str>; 4]>,
    hash: u64,
    text: Box<str>,
}

impl ShapeKey {
    /// Builds a key owning a copy of `names`.
    pub fn new<I, S>(match_all: bool, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: SmallVec<[Box<str>; 4]> =
            names.into_iter().map(|n| Box::from(n.as_ref())).collect();

        let mut hasher = DefaultHasher::new();
        match_all.hash(&mut hasher);
        names.len().hash(&mut hasher);
        for name in &names {
            name.hash(&mut hasher);
        }
        let hash = hasher.finish();

        let joined: Vec<&str> = names.iter().map(|n| &**n).collect();
        let text = format!("{}:{}", match_all, joined.join(",")).into_boxed_str();

        ShapeKey {
            match_all,
            names,
            hash,
            text,
        }
    }

    /// True when conditions are AND-joined.
    pub fn match_all(&self) -> bool {
        self.match_all
    }

    /// Parameter names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| &**n)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Canonical `"{match_all}:{a,b,...}"` form.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The precomputed structural hash.
    pub fn structural_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for ShapeKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.match_all == other.match_all && self.names == other.names
    }
}

impl Eq for ShapeKey {}

impl Hash for ShapeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equal_inputs_give_equal_keys() {
        let a = ShapeKey::new(true, ["Name", "Age"]);
        let b = ShapeKey::new(true, vec!["Name".to_string(), "Age".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert_eq!(a.as_str(), "true:Name,Age");
    }

    #[test]
    fn test_order_is_significant() {
        let a = ShapeKey::new(true, ["Name", "Age"]);
        let b = ShapeKey::new(true, ["Age", "Name"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_match_flag_is_significant() {
        let a = ShapeKey::new(true, ["Name"]);
        let b = ShapeKey::new(false, ["Name"]);
        assert_ne!(a, b);
        assert_eq!(b.to_string(), "false:Name");
    }

    #[test]
    fn test_key_owns_its_names() {
        let mut names = vec!["Name".to_string()];
        let key = ShapeKey::new(true, &names);
        names.push("Age".to_string());
        assert_eq!(key.len(), 1);
        assert_eq!(key.names().collect::<Vec<_>>(), vec!["Name"]);
    }

    proptest! {
        #[test]
        fn prop_equality_matches_inputs(
            m1 in any::<bool>(),
            m2 in any::<bool>(),
            a in prop::collection::vec("[a-c]{1,2}", 0..4),
            b in prop::collection::vec("[a-c]{1,2}", 0..4),
        ) {
            let ka = ShapeKey::new(m1, &a);
            let kb = ShapeKey::new(m2, &b);
            prop_assert_eq!(ka == kb, m1 == m2 && a == b);
            if ka == kb {
                prop_assert_eq!(ka.structural_hash(), kb.structural_hash());
            }
        }
    }
}
