//! Decoder configuration types
//!
//! This module defines the configuration used by the streaming frame decoder.
//! Schema loading has no configuration: a DBC file either loads completely or
//! fails.

use crate::signals::database::ID_MASK;
use crate::types::Frame;
use serde::{Deserialize, Serialize};

/// Configuration for streaming frame decoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecoderConfig {
    /// Optional: only decode these specific CAN message IDs
    #[serde(default)]
    pub message_filter: Option<Vec<u32>>,

    /// Emit frames that cannot be decoded (unknown IDs) as raw frame events
    #[serde(default)]
    pub emit_raw_frames: bool,

    /// Drop error frames before decoding (default: true)
    #[serde(default = "default_true")]
    pub skip_error_frames: bool,

    /// Drop remote transmission requests before decoding (default: true)
    #[serde(default = "default_true")]
    pub skip_remote_frames: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            message_filter: None,
            emit_raw_frames: false,
            skip_error_frames: true,
            skip_remote_frames: true,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set message filter
    pub fn with_message_filter(mut self, messages: Vec<u32>) -> Self {
        self.message_filter = Some(messages);
        self
    }

    /// Builder method: enable raw frame emission
    pub fn with_raw_frames(mut self, enabled: bool) -> Self {
        self.emit_raw_frames = enabled;
        self
    }

    /// Builder method: keep or drop error frames
    pub fn with_error_frames_skipped(mut self, skip: bool) -> Self {
        self.skip_error_frames = skip;
        self
    }

    /// Builder method: keep or drop remote frames
    pub fn with_remote_frames_skipped(mut self, skip: bool) -> Self {
        self.skip_remote_frames = skip;
        self
    }

    /// Check if a message ID should be processed
    pub fn should_process_message(&self, can_id: u32) -> bool {
        match &self.message_filter {
            Some(messages) => messages.contains(&(can_id & ID_MASK)),
            None => true,
        }
    }

    /// Check if a frame should be processed based on filters
    pub fn should_process_frame(&self, frame: &Frame) -> bool {
        if frame.is_error && self.skip_error_frames {
            return false;
        }
        if frame.is_remote && self.skip_remote_frames {
            return false;
        }
        self.should_process_message(frame.id)
    }
}
