mod scheduler;
mod sequence;
mod state_machine;
mod sustain;

pub(crate) use scheduler::{Engine, Shared, Wake, dispatch_loop};
pub use sequence::{Articulation, MAX_TIME_MS, NoteEvent, Piece, RawNote};
pub use state_machine::{ActiveKey, Command, PlaybackState, Status};
pub use sustain::{ClassifyReport, SustainClassifier};
