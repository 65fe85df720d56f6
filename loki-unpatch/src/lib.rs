//! Rebuilds the original boot or recovery image from a loki-patched one.
//!
//! loki_patch hides the original kernel and ramdisk sizes in the `dt_size`
//! and `unused` header slots and tags the file with a `LOKI` marker at
//! offset 0x400. [`unpatcher::unpatch`] reverses that: it checks the marker,
//! recovers the sizes, and writes header page, kernel and ramdisk back out
//! with page-aligned strides. Second-stage and device tree payloads are not
//! reconstructed.

pub mod constants;
pub mod error;
pub mod layouts;
pub mod parser;
pub mod unpatcher;
pub mod utils;

pub use error::{Error, ErrorKind, Segment};
pub use parser::{BootHeader, ImageClass, LokiHeader, MarkerClass};
pub use unpatcher::{RamdiskAddress, ReconstructionPlan, UnpatchOptions, unpatch};
