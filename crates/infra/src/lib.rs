//! aggvol infrastructure: platform property bridges

pub mod audio;
