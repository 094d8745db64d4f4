//! Parameter trees: nested, named collections of real or complex arrays.
//!
//! Every operation that produces a tree from a tree keeps the structure
//! (names and shapes) of its input. Flattening follows the `BTreeMap` order,
//! so two isomorphic trees always ravel to co-indexed vectors.
//!
//! Two flat layouts are used by the optimizer:
//! - the *complex* layout, one `Complex64` per entry ([`ParamTree::ravel`]);
//! - the *real view*, the real part of every entry followed by the imaginary
//!   part of every entry of a complex leaf ([`ParamTree::to_real_vec`]).

use std::collections::BTreeMap;

use nalgebra::DVector;
use num_complex::Complex64;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result, RgnError};

/// Storage of a leaf, real or complex.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum LeafData {
    Real(DVector<f64>),
    Complex(DVector<Complex64>),
}

/// A named array in a parameter tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParamLeaf {
    pub shape: Vec<usize>,
    pub data: LeafData,
}

impl ParamLeaf {
    pub fn real(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        check_len("real leaf", shape.iter().product(), values.len())?;
        Ok(Self { shape, data: LeafData::Real(DVector::from_vec(values)) })
    }

    pub fn complex(shape: Vec<usize>, values: Vec<Complex64>) -> Result<Self> {
        check_len("complex leaf", shape.iter().product(), values.len())?;
        Ok(Self { shape, data: LeafData::Complex(DVector::from_vec(values)) })
    }

    /// One-dimensional real leaf.
    pub fn vector_real(values: Vec<f64>) -> Self {
        Self { shape: vec![values.len()], data: LeafData::Real(DVector::from_vec(values)) }
    }

    /// One-dimensional complex leaf.
    pub fn vector_complex(values: Vec<Complex64>) -> Self {
        Self { shape: vec![values.len()], data: LeafData::Complex(DVector::from_vec(values)) }
    }

    pub fn zeros_real(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self { shape, data: LeafData::Real(DVector::zeros(n)) }
    }

    pub fn zeros_complex(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self { shape, data: LeafData::Complex(DVector::zeros(n)) }
    }

    /// Number of scalar entries.
    pub fn len(&self) -> usize {
        match &self.data {
            LeafData::Real(v) => v.len(),
            LeafData::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.data, LeafData::Complex(_))
    }

    /// Entry `i` promoted to a complex number.
    pub fn get(&self, i: usize) -> Complex64 {
        match &self.data {
            LeafData::Real(v) => Complex64::new(v[i], 0.0),
            LeafData::Complex(v) => v[i],
        }
    }

    pub fn to_complex(&self) -> DVector<Complex64> {
        match &self.data {
            LeafData::Real(v) => v.map(|x| Complex64::new(x, 0.0)),
            LeafData::Complex(v) => v.clone(),
        }
    }

    /// Build a leaf of the same shape and dtype from complex values.
    /// Real leaves keep only the real part.
    fn with_values(&self, values: DVector<Complex64>) -> Self {
        let data = if self.is_complex() {
            LeafData::Complex(values)
        } else {
            LeafData::Real(values.map(|c| c.re))
        };
        Self { shape: self.shape.clone(), data }
    }

    fn with_complex_values(&self, values: DVector<Complex64>) -> Self {
        Self { shape: self.shape.clone(), data: LeafData::Complex(values) }
    }
}

/// A nested, heterogeneous structure of named parameter arrays.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ParamTree {
    Leaf(ParamLeaf),
    Node(BTreeMap<String, ParamTree>),
}

impl ParamTree {
    /// Build an inner node from `(name, subtree)` pairs.
    pub fn node<K: Into<String>>(entries: impl IntoIterator<Item = (K, ParamTree)>) -> Self {
        ParamTree::Node(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a leaf by a `/`-separated path, e.g. `"dense/kernel"`.
    pub fn get(&self, path: &str) -> Option<&ParamLeaf> {
        let mut node = self;
        for key in path.split('/').filter(|k| !k.is_empty()) {
            match node {
                ParamTree::Node(children) => node = children.get(key)?,
                ParamTree::Leaf(_) => return None,
            }
        }
        match node {
            ParamTree::Leaf(leaf) => Some(leaf),
            ParamTree::Node(_) => None,
        }
    }

    /// Like [`ParamTree::get`] but fails with a structure error.
    pub fn leaf(&self, path: &str) -> Result<&ParamLeaf> {
        self.get(path)
            .ok_or_else(|| RgnError::StructureMismatch(format!("missing leaf `{path}`")))
    }

    /// Leaves in traversal order.
    pub fn leaves(&self) -> Vec<&ParamLeaf> {
        fn collect<'a>(tree: &'a ParamTree, out: &mut Vec<&'a ParamLeaf>) {
            match tree {
                ParamTree::Leaf(leaf) => out.push(leaf),
                ParamTree::Node(children) => children.values().for_each(|c| collect(c, out)),
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Total number of scalar entries.
    pub fn size(&self) -> usize {
        self.leaves().iter().map(|l| l.len()).sum()
    }

    /// Number of entries stored in complex leaves.
    pub fn complex_size(&self) -> usize {
        self.leaves().iter().filter(|l| l.is_complex()).map(|l| l.len()).sum()
    }

    /// Length of the real view: one slot per real degree of freedom.
    pub fn real_dim(&self) -> usize {
        self.size() + self.complex_size()
    }

    pub fn has_complex_leaves(&self) -> bool {
        self.leaves().iter().any(|l| l.is_complex())
    }

    pub fn has_real_leaves(&self) -> bool {
        self.leaves().iter().any(|l| !l.is_complex())
    }

    /// True when all leaves are real or all leaves are complex.
    pub fn is_homogeneous(&self) -> bool {
        !(self.has_real_leaves() && self.has_complex_leaves())
    }

    /// Check that `other` has the same names and leaf shapes. Dtypes may
    /// differ; see [`ParamTree::check_same_dtypes`].
    pub fn check_isomorphic(&self, other: &ParamTree) -> Result<()> {
        fn walk(a: &ParamTree, b: &ParamTree, path: &str) -> Result<()> {
            match (a, b) {
                (ParamTree::Leaf(x), ParamTree::Leaf(y)) => {
                    if x.shape == y.shape {
                        Ok(())
                    } else {
                        Err(RgnError::StructureMismatch(format!(
                            "leaf `{path}` has shape {:?} vs {:?}",
                            x.shape, y.shape
                        )))
                    }
                }
                (ParamTree::Node(xs), ParamTree::Node(ys)) => {
                    if xs.len() != ys.len() || xs.keys().zip(ys.keys()).any(|(p, q)| p != q) {
                        return Err(RgnError::StructureMismatch(format!(
                            "node `{path}` has keys {:?} vs {:?}",
                            xs.keys().collect::<Vec<_>>(),
                            ys.keys().collect::<Vec<_>>()
                        )));
                    }
                    for (key, x) in xs {
                        walk(x, &ys[key], &format!("{path}/{key}"))?;
                    }
                    Ok(())
                }
                _ => Err(RgnError::StructureMismatch(format!(
                    "`{path}` is a leaf in one tree and a node in the other"
                ))),
            }
        }
        walk(self, other, "")
    }

    /// Like [`ParamTree::check_isomorphic`], and every pair of matching
    /// leaves is either real in both trees or complex in both.
    pub fn check_same_dtypes(&self, other: &ParamTree) -> Result<()> {
        self.check_isomorphic(other)?;
        let mismatch = self
            .leaves()
            .iter()
            .zip(other.leaves().iter())
            .position(|(a, b)| a.is_complex() != b.is_complex());
        match mismatch {
            Some(i) => Err(RgnError::StructureMismatch(format!("leaf {} differs in dtype", i))),
            None => Ok(()),
        }
    }

    /// Apply `f` to every leaf, keeping the structure.
    pub fn map_leaves(&self, f: &mut dyn FnMut(&ParamLeaf) -> ParamLeaf) -> ParamTree {
        match self {
            ParamTree::Leaf(leaf) => ParamTree::Leaf(f(leaf)),
            ParamTree::Node(children) => {
                let mut mapped = BTreeMap::new();
                for (key, child) in children {
                    mapped.insert(key.clone(), child.map_leaves(&mut *f));
                }
                ParamTree::Node(mapped)
            }
        }
    }

    /// Apply `f` leaf-wise to two isomorphic trees.
    pub fn zip_map(
        &self,
        other: &ParamTree,
        f: &mut dyn FnMut(&ParamLeaf, &ParamLeaf) -> ParamLeaf,
    ) -> Result<ParamTree> {
        self.check_isomorphic(other)?;
        let mut theirs = other.leaves().into_iter();
        Ok(self.map_leaves(&mut |leaf| match theirs.next() {
            Some(o) => f(leaf, o),
            None => leaf.clone(),
        }))
    }

    pub fn zeros_like(&self) -> ParamTree {
        self.map_leaves(&mut |leaf| leaf.with_values(DVector::zeros(leaf.len())))
    }

    /// Same structure, entries drawn from `N(0, std)`; complex leaves get
    /// independent real and imaginary parts.
    pub fn random_normal_like<R: Rng>(&self, rng: &mut R, std: f64) -> Result<ParamTree> {
        let normal = Normal::new(0.0, std)
            .map_err(|e| RgnError::InvalidConfig(format!("normal init: {e}")))?;
        Ok(self.map_leaves(&mut |leaf| {
            let values = DVector::from_fn(leaf.len(), |_, _| {
                if leaf.is_complex() {
                    Complex64::new(normal.sample(rng), normal.sample(rng))
                } else {
                    Complex64::new(normal.sample(rng), 0.0)
                }
            });
            leaf.with_values(values)
        }))
    }

    /// Conjugate complex leaves; real leaves are untouched.
    pub fn conj(&self) -> ParamTree {
        self.map_leaves(&mut |leaf| match &leaf.data {
            LeafData::Real(_) => leaf.clone(),
            LeafData::Complex(v) => leaf.with_values(v.map(|c| c.conj())),
        })
    }

    /// Unconjugated dot product of the flattened trees.
    pub fn dot(&self, other: &ParamTree) -> Result<Complex64> {
        self.check_isomorphic(other)?;
        Ok(self.ravel().dot(&other.ravel()))
    }

    /// `ord`-norm of the tree seen as one flat vector, `ord ≥ 1`.
    pub fn norm(&self, ord: i32) -> Result<f64> {
        if ord < 1 {
            return Err(RgnError::InvalidConfig(format!("norm order must be at least 1, got {}", ord)));
        }
        let flat = self.ravel();
        let sum: f64 = flat.iter().map(|c| c.norm().powi(ord)).sum();
        Ok(match ord {
            1 => sum,
            2 => sum.sqrt(),
            _ => sum.powf(1.0 / ord as f64),
        })
    }

    pub fn scale(&self, a: f64) -> ParamTree {
        self.map_leaves(&mut |leaf| match &leaf.data {
            LeafData::Real(v) => ParamLeaf { shape: leaf.shape.clone(), data: LeafData::Real(v * a) },
            LeafData::Complex(v) => leaf.with_values(v.map(|c| c * a)),
        })
    }

    /// `a * self + y`. A real leaf combined with a complex one becomes complex.
    pub fn axpy(&self, a: f64, y: &ParamTree) -> Result<ParamTree> {
        self.zip_map(y, &mut |x, y| match (&x.data, &y.data) {
            (LeafData::Real(xv), LeafData::Real(yv)) => ParamLeaf {
                shape: x.shape.clone(),
                data: LeafData::Real(xv * a + yv),
            },
            _ => x.with_complex_values(x.to_complex().map(|c| c * a) + y.to_complex()),
        })
    }

    /// Cast every leaf to the dtype of the matching leaf of `target`.
    ///
    /// Complex leaves cast to real keep only their real part.
    pub fn cast_like(&self, target: &ParamTree) -> Result<ParamTree> {
        self.zip_map(target, &mut |x, t| t.with_values(x.to_complex()))
    }

    /// Flatten to one complex entry per scalar.
    pub fn ravel(&self) -> DVector<Complex64> {
        let leaves = self.leaves();
        let mut flat = Vec::with_capacity(leaves.iter().map(|l| l.len()).sum());
        for leaf in leaves {
            flat.extend((0..leaf.len()).map(|i| leaf.get(i)));
        }
        DVector::from_vec(flat)
    }

    /// Inverse of [`ParamTree::ravel`] using `self` as the structural
    /// template. Real leaves keep only the real part.
    pub fn unravel_like(&self, flat: &DVector<Complex64>) -> Result<ParamTree> {
        check_len("unravel", self.size(), flat.len())?;
        let mut offset = 0;
        Ok(self.map_leaves(&mut |leaf| {
            let values = flat.rows(offset, leaf.len()).into_owned();
            offset += leaf.len();
            leaf.with_values(values)
        }))
    }

    /// Real view of `self`.
    pub fn to_real_vec(&self) -> DVector<f64> {
        self.split_real_imag(self)
    }

    /// Real view of `other` laid out according to `self`: real parts of all
    /// entries, then imaginary parts of the entries whose leaf in `self` is
    /// complex.
    pub fn real_view_of(&self, other: &ParamTree) -> Result<DVector<f64>> {
        self.check_isomorphic(other)?;
        Ok(self.split_real_imag(other))
    }

    fn split_real_imag(&self, other: &ParamTree) -> DVector<f64> {
        let mine = self.leaves();
        let theirs = other.leaves();
        let mut re = Vec::with_capacity(self.real_dim());
        let mut im = Vec::new();
        for (t, o) in mine.iter().zip(theirs.iter()) {
            for i in 0..o.len() {
                let c = o.get(i);
                re.push(c.re);
                if t.is_complex() {
                    im.push(c.im);
                }
            }
        }
        re.extend(im);
        DVector::from_vec(re)
    }

    /// Rebuild a tree of the same dtypes from a real view.
    pub fn with_real_vec(&self, v: &DVector<f64>) -> Result<ParamTree> {
        check_len("real view", self.real_dim(), v.len())?;
        let mut re_offset = 0;
        let mut im_offset = self.size();
        Ok(self.map_leaves(&mut |leaf| {
            let values = DVector::from_fn(leaf.len(), |i, _| {
                let re = v[re_offset + i];
                if leaf.is_complex() {
                    Complex64::new(re, v[im_offset + i])
                } else {
                    Complex64::new(re, 0.0)
                }
            });
            re_offset += leaf.len();
            if leaf.is_complex() {
                im_offset += leaf.len();
            }
            leaf.with_values(values)
        }))
    }

    /// Combine complex derivatives taken along the real view into
    /// Wirtinger derivatives `∂/∂θ = (∂/∂Re θ − i ∂/∂Im θ) / 2`.
    ///
    /// Real leaves take the derivative along their single direction. Every
    /// leaf of the result is complex.
    pub fn wirtinger_like(&self, v: &DVector<Complex64>) -> Result<ParamTree> {
        check_len("wirtinger", self.real_dim(), v.len())?;
        let i = Complex64::i();
        let mut re_offset = 0;
        let mut im_offset = self.size();
        Ok(self.map_leaves(&mut |leaf| {
            let values = DVector::from_fn(leaf.len(), |k, _| {
                let d_re = v[re_offset + k];
                if leaf.is_complex() {
                    (d_re - i * v[im_offset + k]) * 0.5
                } else {
                    d_re
                }
            });
            re_offset += leaf.len();
            if leaf.is_complex() {
                im_offset += leaf.len();
            }
            leaf.with_complex_values(values)
        }))
    }

    /// Complex-valued tree with the structure of `self` from a complex flat vector.
    pub fn unravel_complex_like(&self, flat: &DVector<Complex64>) -> Result<ParamTree> {
        check_len("unravel", self.size(), flat.len())?;
        let mut offset = 0;
        Ok(self.map_leaves(&mut |leaf| {
            let values = flat.rows(offset, leaf.len()).into_owned();
            offset += leaf.len();
            leaf.with_complex_values(values)
        }))
    }

    /// Map a flat real-view coordinate to the complex coefficient it carries
    /// for a function holomorphic in the parameters: `c` for the real part,
    /// `i·c` for the imaginary part of a complex entry.
    pub fn expand_holomorphic(&self, coeffs: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        check_len("holomorphic coefficients", self.size(), coeffs.len())?;
        let mut out = Vec::with_capacity(self.real_dim());
        out.extend(coeffs.iter().copied());
        let mut offset = 0;
        for leaf in self.leaves() {
            if leaf.is_complex() {
                out.extend(coeffs.rows(offset, leaf.len()).iter().map(|c| c * Complex64::i()));
            }
            offset += leaf.len();
        }
        Ok(DVector::from_vec(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mixed_tree() -> ParamTree {
        ParamTree::node([
            ("a", ParamTree::Leaf(ParamLeaf::real(vec![2], vec![1.0, 2.0]).unwrap())),
            (
                "b",
                ParamTree::node([(
                    "w",
                    ParamTree::Leaf(
                        ParamLeaf::complex(
                            vec![1, 2],
                            vec![Complex64::new(3.0, -1.0), Complex64::new(0.5, 2.0)],
                        )
                        .unwrap(),
                    ),
                )]),
            ),
        ])
    }

    #[test]
    fn test_leaf_shape_is_checked() {
        assert!(ParamLeaf::real(vec![2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_sizes_and_homogeneity() {
        let tree = mixed_tree();
        assert_eq!(tree.size(), 4);
        assert_eq!(tree.complex_size(), 2);
        assert_eq!(tree.real_dim(), 6);
        assert!(!tree.is_homogeneous());
        assert!(tree.get("b/w").unwrap().is_complex());
        assert!(tree.get("b/missing").is_none());
    }

    #[test]
    fn test_real_view_layout() {
        let tree = mixed_tree();
        let v = tree.to_real_vec();
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0, 0.5, -1.0, 2.0]);
        let back = tree.with_real_vec(&v).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_cast_discards_imaginary_part() {
        let target = mixed_tree();
        let all_complex = target.map_leaves(&mut |leaf| {
            ParamLeaf::complex(
                leaf.shape.clone(),
                (0..leaf.len()).map(|i| leaf.get(i) + Complex64::new(0.0, 7.0)).collect(),
            )
            .unwrap()
        });
        let cast = all_complex.cast_like(&target).unwrap();
        match &cast.get("a").unwrap().data {
            LeafData::Real(v) => assert_eq!(v.as_slice(), &[1.0, 2.0]),
            LeafData::Complex(_) => panic!("real target leaf must stay real"),
        }
        assert!(cast.get("b/w").unwrap().is_complex());
        assert_relative_eq!(cast.get("b/w").unwrap().get(0).im, 6.0);
    }

    #[test]
    fn test_axpy_dot_norm() {
        let tree = mixed_tree();
        let doubled = tree.axpy(1.0, &tree).unwrap();
        assert_relative_eq!(doubled.norm(2).unwrap(), 2.0 * tree.norm(2).unwrap(), epsilon = 1e-12);
        let d = tree.dot(&tree.conj()).unwrap();
        assert_relative_eq!(d.re, tree.norm(2).unwrap().powi(2), epsilon = 1e-12);
        assert_relative_eq!(d.im, 0.0, epsilon = 1e-12);
        assert_relative_eq!(tree.zeros_like().norm(1).unwrap(), 0.0);
    }

    #[test]
    fn test_norm_order_must_be_positive() {
        let tree = mixed_tree();
        assert!(matches!(tree.norm(0), Err(RgnError::InvalidConfig(_))));
        assert!(matches!(tree.norm(-2), Err(RgnError::InvalidConfig(_))));
        // |1| + |2| + |3 - i| + |0.5 + 2i|
        let l1 = 3.0 + 10f64.sqrt() + 4.25f64.sqrt();
        assert_relative_eq!(tree.norm(1).unwrap(), l1, epsilon = 1e-12);
    }

    #[test]
    fn test_dtype_mismatch_is_not_same_dtypes() {
        let tree = mixed_tree();
        let all_complex = tree.map_leaves(&mut |leaf| {
            ParamLeaf::complex(leaf.shape.clone(), (0..leaf.len()).map(|i| leaf.get(i)).collect()).unwrap()
        });
        assert!(tree.check_isomorphic(&all_complex).is_ok());
        assert!(matches!(tree.check_same_dtypes(&all_complex), Err(RgnError::StructureMismatch(_))));
        assert!(tree.check_same_dtypes(&tree.zeros_like()).is_ok());
    }

    #[test]
    fn test_structure_mismatch_is_reported() {
        let tree = mixed_tree();
        let other = ParamTree::node([(
            "a",
            ParamTree::Leaf(ParamLeaf::real(vec![2], vec![1.0, 2.0]).unwrap()),
        )]);
        assert!(matches!(tree.check_isomorphic(&other), Err(RgnError::StructureMismatch(_))));
    }

    #[test]
    fn test_wirtinger_of_holomorphic_direction() {
        let tree = mixed_tree();
        let coeffs = DVector::from_vec(vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 1.0),
            Complex64::new(2.0, -1.0),
            Complex64::new(-0.5, 0.5),
        ]);
        let expanded = tree.expand_holomorphic(&coeffs).unwrap();
        let w = tree.wirtinger_like(&expanded).unwrap();
        assert_eq!(w.ravel(), coeffs);
    }
}
