//! Streaming frame decoder
//!
//! [`FrameDecoder`] borrows a frozen [`Schema`] and turns a stream of frames
//! into decoded events, applying the filters of a [`DecoderConfig`]. Many
//! decoders can share one schema across threads.

use crate::config::DecoderConfig;
use crate::signals::database::Schema;
use crate::types::{DecodedEvent, Frame, Result};

/// Decodes frames against a shared schema
pub struct FrameDecoder<'s> {
    schema: &'s Schema,
    config: DecoderConfig,
}

impl<'s> FrameDecoder<'s> {
    /// Create a decoder over a loaded schema
    ///
    /// # Example
    /// ```no_run
    /// use can_dbc_decoder::{DecoderConfig, Frame, FrameDecoder, Schema};
    /// use std::path::Path;
    ///
    /// let schema = Schema::from_file(Path::new("powertrain.dbc")).unwrap();
    /// let decoder = FrameDecoder::new(&schema, DecoderConfig::new());
    ///
    /// let frames = vec![Frame::new(0x64, &[0x40, 0x1F]).unwrap()];
    /// for event in decoder.decode_iter(frames) {
    ///     match event {
    ///         Ok(decoded) => println!("Decoded event: {:?}", decoded),
    ///         Err(e) => eprintln!("Error: {}", e),
    ///     }
    /// }
    /// ```
    pub fn new(schema: &'s Schema, config: DecoderConfig) -> Self {
        Self { schema, config }
    }

    /// The schema frames are decoded against
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// The active configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a single frame.
    ///
    /// Returns `Ok(None)` for frames the configuration filters out, and for
    /// unknown IDs when raw frame emission is disabled.
    pub fn decode_frame(&self, frame: &Frame) -> Result<Option<DecodedEvent>> {
        if !self.config.should_process_frame(frame) {
            return Ok(None);
        }

        match self.schema.message(frame.id) {
            Some(message) => {
                log::debug!("Decoding message: {} (ID 0x{:X})", message.name(), frame.id);
                Ok(Some(DecodedEvent::Message(message.decode(frame)?)))
            }
            None if self.config.emit_raw_frames => {
                log::trace!("Unknown CAN ID: 0x{:X}, emitting as raw frame", frame.id);
                Ok(Some(DecodedEvent::RawFrame(frame.clone())))
            }
            None => {
                log::trace!("Unknown CAN ID: 0x{:X}, skipped", frame.id);
                Ok(None)
            }
        }
    }

    /// Lazily decode a stream of frames.
    ///
    /// Decode failures are yielded as `Err` items and do not end the stream.
    pub fn decode_iter<I>(&self, frames: I) -> DecodingIterator<'_, 's, I::IntoIter>
    where
        I: IntoIterator<Item = Frame>,
    {
        DecodingIterator {
            decoder: self,
            frames: frames.into_iter(),
        }
    }
}

/// Iterator that decodes CAN frames into decoded events
///
/// Filtered and skipped frames produce no item.
pub struct DecodingIterator<'d, 's, I>
where
    I: Iterator<Item = Frame>,
{
    decoder: &'d FrameDecoder<'s>,
    frames: I,
}

impl<'d, 's, I> Iterator for DecodingIterator<'d, 's, I>
where
    I: Iterator<Item = Frame>,
{
    type Item = Result<DecodedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        for frame in self.frames.by_ref() {
            match self.decoder.decode_frame(&frame) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue, // No event generated, get next frame
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalValue;

    const DBC: &str = r#"
BO_ 100 EngineData: 8 ECU
 SG_ RPM : 0|16@1+ (0.25,0) [0|16000] "rpm" Dash
BO_ 200 Short: 8 ECU
 SG_ Tail : 56|8@1+ (1,0) [0|255] "" Dash
"#;

    fn schema() -> Schema {
        DBC.parse().unwrap()
    }

    #[test]
    fn test_decode_known_frame() {
        let schema = schema();
        let decoder = FrameDecoder::new(&schema, DecoderConfig::new());

        let frame = Frame::new(100, &[0x40, 0x1F, 0, 0, 0, 0, 0, 0]).unwrap();
        match decoder.decode_frame(&frame).unwrap() {
            Some(DecodedEvent::Message(msg)) => {
                assert_eq!(msg.name, "EngineData");
                assert_eq!(msg.get("RPM"), Some(SignalValue::Present(2000.0)));
            }
            other => panic!("expected decoded message, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_ids() {
        let schema = schema();
        let frame = Frame::new(0x7FF, &[1, 2, 3]).unwrap();

        let decoder = FrameDecoder::new(&schema, DecoderConfig::new());
        assert!(decoder.decode_frame(&frame).unwrap().is_none());

        let decoder = FrameDecoder::new(&schema, DecoderConfig::new().with_raw_frames(true));
        match decoder.decode_frame(&frame).unwrap() {
            Some(DecodedEvent::RawFrame(raw)) => assert_eq!(raw.data(), &[1, 2, 3]),
            other => panic!("expected raw frame, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_continues_after_error() {
        let schema = schema();
        let decoder = FrameDecoder::new(&schema, DecoderConfig::new());

        let frames = vec![
            Frame::new(200, &[0; 4]).unwrap(), // too short for Tail
            Frame::new(0x7FF, &[0; 8]).unwrap(), // unknown, skipped
            Frame::new(100, &[0x04, 0x00]).unwrap(),
            Frame::new(100, &[0; 8]).unwrap().with_remote(true), // filtered
        ];

        let events: Vec<_> = decoder.decode_iter(frames).collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].as_ref().unwrap_err().is_range());
        assert_eq!(events[1].as_ref().unwrap().can_id(), 100);
    }

    #[test]
    fn test_message_filter() {
        let schema = schema();
        let decoder = FrameDecoder::new(&schema, DecoderConfig::new().with_message_filter(vec![200]));

        let frames = vec![
            Frame::new(100, &[0; 8]).unwrap(),
            Frame::new(200, &[0; 8]).unwrap(),
        ];
        let ids: Vec<u32> = decoder
            .decode_iter(frames)
            .map(|e| e.unwrap().can_id())
            .collect();
        assert_eq!(ids, vec![200]);
    }
}
