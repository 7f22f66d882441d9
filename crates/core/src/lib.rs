//! aggvol core: one volume and mute control for plain and aggregate devices

pub mod domain;
