//! Field-level fusion of per-stage winners into one record

pub mod metadata_fuser;

pub use metadata_fuser::MetadataFuser;
