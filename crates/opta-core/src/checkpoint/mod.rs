//! Undo checkpoints: per-session unified-diff patches plus an append-only
//! log, persisted under `<workdir>/.opta/checkpoints/<session>/`.

pub mod patch;
pub mod store;

pub use patch::PatchStat;
pub use store::{Checkpoint, CheckpointStore};
