//! Collaborators consumed at the edge of the flow engine.

pub mod content;
pub mod player;
pub mod xp;

pub use content::{
    ClipRef, ContentProvider, FlowContent, JsonContentProvider, MemoryContentProvider,
    StageContent,
};
pub use player::{ClipOutcome, ClipPlayer, PlayTrigger, SimulatedClipPlayer};
pub use xp::{JsonlXpLedger, XpEntry, XpService};
