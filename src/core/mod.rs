pub mod audio;
pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    HostCapabilities, RealtimeVoice, SessionConfig, SessionController, SessionError,
    SessionResult, SessionState, Speaker, TranscriptEntry, TransportKind,
};

pub use audio::{WavFileInput, WavFileOutput};
