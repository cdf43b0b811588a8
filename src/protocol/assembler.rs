//! Byte-stream framing for stream transports (classic serial / SPP).
//!
//! BLE notifications already arrive one frame at a time. A stream link only
//! delivers bytes, so frames are recovered by scanning for the signature and
//! cutting [`FRAME_LEN`] bytes from there. A candidate whose checksum does not
//! match is a false sync: only its first byte is dropped and the scan resumes,
//! so a real frame overlapping it is not lost.

use bytes::{Buf, BytesMut};

use super::frame::{checksum, FRAME_LEN, SIGNATURE};

/// Incremental frame splitter.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    discarded: u64,
}

impl FrameAssembler {
    /// An empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every complete candidate frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<[u8; FRAME_LEN]> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            match find_signature(&self.buffer) {
                Some(start) => {
                    if start > 0 {
                        self.discard(start);
                    }
                }
                None => {
                    // Keep a trailing 'S' which may start the next signature.
                    let keep = usize::from(self.buffer.last() == Some(&SIGNATURE[0]));
                    let drop = self.buffer.len() - keep;
                    self.discard(drop);
                    break;
                }
            }

            if self.buffer.len() < FRAME_LEN {
                break;
            }

            if checksum(&self.buffer[..FRAME_LEN - 1]) != self.buffer[FRAME_LEN - 1] {
                self.discard(1);
                continue;
            }

            let mut frame = [0u8; FRAME_LEN];
            self.buffer.copy_to_slice(&mut frame);
            frames.push(frame);
        }

        frames
    }

    /// Bytes skipped while searching for a signature.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn discard(&mut self, len: usize) {
        self.buffer.advance(len);
        self.discarded += len as u64;
    }
}

fn find_signature(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{decode, tests::frame};

    fn sample_frame() -> [u8; FRAME_LEN] {
        frame([83, 70, 0, 0, 0, 0, 12, 0, 100, 0, 0, 0x30, 65, 0, 0, 0, 0])
    }

    #[test]
    fn test_whole_frames_pass_through() {
        let mut assembler = FrameAssembler::new();
        let mut stream = Vec::new();
        stream.extend_from_slice(&sample_frame());
        stream.extend_from_slice(&sample_frame());

        let frames = assembler.push(&stream);
        assert_eq!(frames.len(), 2);
        assert!(decode(&frames[0]).is_ok());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_split_frame_is_reassembled() {
        let mut assembler = FrameAssembler::new();
        let bytes = sample_frame();

        assert!(assembler.push(&bytes[..7]).is_empty());
        let frames = assembler.push(&bytes[7..]);
        assert_eq!(frames, vec![bytes]);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut assembler = FrameAssembler::new();
        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend_from_slice(&sample_frame());

        let frames = assembler.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(assembler.discarded(), 3);
    }

    #[test]
    fn test_false_sync_does_not_swallow_next_frame() {
        let mut assembler = FrameAssembler::new();
        let mut stream = vec![b'S', b'F', 0x01, 0x02];
        stream.extend_from_slice(&sample_frame());
        assert_ne!(checksum(&stream[..FRAME_LEN - 1]), stream[FRAME_LEN - 1]);

        let frames = assembler.push(&stream);
        assert_eq!(frames, vec![sample_frame()]);
        assert_eq!(assembler.discarded(), 4);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_signature_split_across_pushes() {
        let mut assembler = FrameAssembler::new();
        let bytes = sample_frame();

        assert!(assembler.push(&[0xFF, bytes[0]]).is_empty());
        assert_eq!(assembler.buffered(), 1);
        let frames = assembler.push(&bytes[1..]);
        assert_eq!(frames.len(), 1);
        assert!(decode(&frames[0]).is_ok());
    }
}
