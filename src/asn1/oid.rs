//! Object identifier type.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// An object identifier: an ordered sequence of non-negative integers.
///
/// Well-formed OIDs have at least two components, the first in `{0, 1, 2}`
/// and the second in `0..=39` when the first is 0 or 1. Comparison is
/// lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    pub fn from_slice(components: &[u32]) -> Self {
        Self(components.to_vec())
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// True when `prefix` is a (non-strict) prefix of this OID.
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// True when this OID is strictly below `parent`.
    pub fn is_child_of(&self, parent: &Oid) -> bool {
        self.0.len() > parent.0.len() && self.0[..parent.0.len()] == parent.0[..]
    }

    /// The OID with the last component removed, if there is one to remove.
    pub fn parent(&self) -> Option<Oid> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// A new OID with `component` appended.
    pub fn child(&self, component: u32) -> Oid {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }
}

impl From<Vec<u32>> for Oid {
    fn from(components: Vec<u32>) -> Self {
        Self(components)
    }
}

impl From<&[u32]> for Oid {
    fn from(components: &[u32]) -> Self {
        Self::from_slice(components)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(components: [u32; N]) -> Self {
        Self(components.to_vec())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let components: std::result::Result<Vec<u32>, _> = s
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u32>())
            .collect();

        match components {
            Ok(components) if !components.is_empty() => Ok(Self(components)),
            _ => Err(Error::syntax(format!("invalid OID: {s}"))),
        }
    }
}

impl fmt::Display for Oid {
    /// Dotted notation, `1.3.6.1.2.1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let oid: Oid = "1.3.6.1.2.1.1.1.0".parse().unwrap();
        assert_eq!(oid.components(), &[1, 3, 6, 1, 2, 1, 1, 1, 0]);
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.1.0");
        assert!("".parse::<Oid>().is_err());
        assert!("1.x.3".parse::<Oid>().is_err());
    }

    #[test]
    fn test_prefix_relations() {
        let root = Oid::from_slice(&[1, 3, 6, 1, 2, 1, 2, 2, 1]);
        let row = root.child(1).child(1);
        assert!(row.starts_with(&root));
        assert!(row.is_child_of(&root));
        assert!(!root.is_child_of(&root));
        assert!(root.starts_with(&root));
        assert_eq!(row.parent().unwrap(), root.child(1));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = Oid::from_slice(&[1, 3, 6, 1]);
        let b = Oid::from_slice(&[1, 3, 6, 1, 0]);
        let c = Oid::from_slice(&[1, 3, 7]);
        assert!(a < b);
        assert!(b < c);
    }
}
