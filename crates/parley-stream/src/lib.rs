pub mod fragmenter;
pub mod reassembler;
pub mod wire;

pub use fragmenter::Fragmenter;
pub use reassembler::{IngestOutcome, Reassembler, DEFAULT_REASSEMBLY_TIMEOUT};
pub use wire::{Fragment, TotalParts};
