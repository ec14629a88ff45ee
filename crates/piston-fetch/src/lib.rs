//! Minecraft game file acquisition.
//!
//! Resolves version descriptors into the libraries, natives and assets a
//! game version needs, and fetches them through an ordered list of mirror
//! sources with retry, verification and fallback. Mod dependencies from
//! Modrinth are expanded through the same pipeline.

pub mod game;

pub use game::*;
