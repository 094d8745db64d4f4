//! Systems module - lattice Hamiltonians for VMC calculations.

mod traits;
mod ising;

pub use traits::Hamiltonian;
pub use ising::Ising;
