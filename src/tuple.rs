//! Sorted index tuples used as keys of the tangent-sphere complex.
//!
//! A [`Quadruple`] names the four generator balls of a Voronoi vertex, a
//! [`Triple`] names a facet shared by two neighboring quadruples.

use std::fmt;

macro_rules! define_tuple {
    ($(#[$meta:meta])* $name:ident, $n:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([usize; $n]);

        impl $name {
            /// Build from unordered values; stored sorted ascending.
            #[must_use]
            pub fn from_array(mut values: [usize; $n]) -> Self {
                values.sort_unstable();
                Self(values)
            }

            #[must_use]
            pub const fn get(&self, i: usize) -> usize {
                self.0[i]
            }

            #[must_use]
            pub const fn as_array(&self) -> &[usize; $n] {
                &self.0
            }

            #[must_use]
            pub fn contains(&self, x: usize) -> bool {
                self.0.contains(&x)
            }

            /// True if some index occurs twice.
            #[must_use]
            pub fn has_repetitions(&self) -> bool {
                self.0.windows(2).any(|w| w[0] == w[1])
            }

            pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
                self.0.iter().copied()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut first = true;
                for v in &self.0 {
                    if !first {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                    first = false;
                }
                Ok(())
            }
        }
    };
}

define_tuple!(
    /// Unordered pair of ball indices.
    Pair,
    2
);
define_tuple!(
    /// Unordered triple of ball indices (a facet).
    Triple,
    3
);
define_tuple!(
    /// Unordered quadruple of ball indices (a Voronoi vertex key).
    Quadruple,
    4
);

impl Pair {
    #[must_use]
    pub fn new(a: usize, b: usize) -> Self {
        Self::from_array([a, b])
    }
}

impl Triple {
    #[must_use]
    pub fn new(a: usize, b: usize, c: usize) -> Self {
        Self::from_array([a, b, c])
    }

    /// Pair left after dropping the element at position `i`.
    #[must_use]
    pub fn exclude(&self, i: usize) -> Pair {
        let v = &self.0;
        match i {
            0 => Pair::new(v[1], v[2]),
            1 => Pair::new(v[0], v[2]),
            _ => Pair::new(v[0], v[1]),
        }
    }
}

impl Quadruple {
    #[must_use]
    pub fn new(a: usize, b: usize, c: usize, d: usize) -> Self {
        Self::from_array([a, b, c, d])
    }

    #[must_use]
    pub fn from_triple(triple: &Triple, tail: usize) -> Self {
        Self::new(triple.get(0), triple.get(1), triple.get(2), tail)
    }

    /// Facet left after dropping the element at position `i`.
    #[must_use]
    pub fn exclude(&self, i: usize) -> Triple {
        let v = &self.0;
        match i {
            0 => Triple::new(v[1], v[2], v[3]),
            1 => Triple::new(v[0], v[2], v[3]),
            2 => Triple::new(v[0], v[1], v[3]),
            _ => Triple::new(v[0], v[1], v[2]),
        }
    }

    /// Map each index through `mapping`; `None` if any index is out of range.
    #[must_use]
    pub fn renumbered(&self, mapping: &[usize]) -> Option<Self> {
        let mut values = [0; 4];
        for (dst, &src) in values.iter_mut().zip(self.0.iter()) {
            *dst = *mapping.get(src)?;
        }
        Some(Self::from_array(values))
    }
}
