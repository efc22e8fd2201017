//! Wavehub Protocol - Wire Format and Audio Format Types
//!
//! This crate provides:
//! - Audio format and channel layout types (`AudioFormat`, `ChannelLayout`)
//! - The client/server control message set and its length-prefixed framing
//! - The fixed-size audio side-channel record (`AudioMessage`)
//!
//! It is deliberately free of socket, threading or shared-memory mapping
//! code — those live in `wavehub-daemon` and `wavehub-shm` respectively.
//! This crate is the leaf of the dependency graph (spec.md §2).

mod audio_message;
mod error;
mod format;
mod message;

pub use audio_message::{audio_socket_path, AudioMessage, AudioMessageId};
pub use error::{ProtoError, ProtoResult};
pub use format::{AudioFormat, ChannelLabel, ChannelLayout, SampleFormat, CH_MAX};
pub use message::{
    read_framed, ClientMessage, Framed, IodevSummary, NodeAttr, NodeId, ServerMessage,
    StreamDirection, StreamFlags,
};
