//! Parley stream crate - incremental reply delivery over server-sent events.
//!
//! A [`StreamDispatcher`] pulls fragments from a [`GenerationSource`], writes
//! each one to a [`FrameSink`] as a `delta` frame, persists the assembled
//! reply through the message store, and finishes with a `done` or `error`
//! frame. Client disconnects cancel the stream without persisting anything.

pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod generation;
pub mod session;
pub mod sink;

pub use dispatcher::{StreamDispatcher, StreamOutcome};
pub use error::StreamError;
pub use frame::{encode, EventFrame, EventName, FrameDecoder, FrameError, StreamEvent};
pub use generation::{
    EchoSource, FragmentStream, GenerationError, GenerationRequest, GenerationSource,
    ScriptedSource,
};
pub use session::{StreamSession, StreamState};
pub use sink::{ChannelSink, FrameSink};
