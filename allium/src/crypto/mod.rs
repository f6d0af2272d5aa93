// Copyright (c) 2024 Botho Foundation

//! Session keys, session tags and the hybrid garlic engine.

mod engine;
mod key_manager;
mod tag_set;

pub use engine::{EngineError, EngineResult, GarlicEngine, DEFAULT_PADDED_SIZE, MAX_TAGS_PER_BLOCK, MIN_ENCRYPTED_SIZE};
pub use key_manager::{SessionKeyStats, TransientSessionKeyManager};
pub use tag_set::{TagSetHandle, TagSetId};
