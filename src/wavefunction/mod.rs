//! Wavefunction module - parameter trees, the ansatz trait and lattice models.

mod traits;
mod params;
mod jastrow;
mod rbm;

pub use traits::Ansatz;
pub use params::{LeafData, ParamLeaf, ParamTree};
pub use jastrow::Jastrow;
pub use rbm::Rbm;
