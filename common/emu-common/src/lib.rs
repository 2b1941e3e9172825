//! Small numeric helper traits shared by the CPU cores and the system core.

pub mod num;
