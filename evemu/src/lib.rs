mod machine;

pub use machine::{Fault, Hook, Machine, NullHook, RecordingHook};
