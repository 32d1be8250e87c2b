//! Inbound command decoding

use std::fmt;

use super::{ProtocolError, SYSEX_END, SYSEX_START};

/// Start or stop the clip in a slot
pub const FIRE_CLIP: u8 = 9;

/// Delete the clip in a slot
pub const DELETE_CLIP: u8 = 10;

/// Duplicate a clip into another slot
pub const COPY_CLIP: u8 = 11;

/// Raw `(track, clip)` indices as received, not yet bounds-checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCoord {
    pub track: usize,
    pub clip: usize,
}

impl SlotCoord {
    pub fn new(track: usize, clip: usize) -> Self {
        Self { track, clip }
    }
}

impl fmt::Display for SlotCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {} clip {}", self.track, self.clip)
    }
}

/// A fully decoded controller command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCommand {
    /// `fire == 1` toggles the slot, other values are reserved
    FireClip { fire: u8, slot: SlotCoord },
    DeleteClip { slot: SlotCoord },
    CopyClip { source: SlotCoord, destination: SlotCoord },
}

impl InboundCommand {
    pub fn kind(&self) -> u8 {
        match self {
            InboundCommand::FireClip { .. } => FIRE_CLIP,
            InboundCommand::DeleteClip { .. } => DELETE_CLIP,
            InboundCommand::CopyClip { .. } => COPY_CLIP,
        }
    }
}

impl fmt::Display for InboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundCommand::FireClip { fire, slot } => write!(f, "fire({}) {}", fire, slot),
            InboundCommand::DeleteClip { slot } => write!(f, "delete {}", slot),
            InboundCommand::CopyClip { source, destination } => {
                write!(f, "copy {} -> {}", source, destination)
            }
        }
    }
}

fn arity(kind: u8) -> Option<usize> {
    match kind {
        FIRE_CLIP => Some(3),
        DELETE_CLIP => Some(2),
        COPY_CLIP => Some(4),
        _ => None,
    }
}

/// Decode a complete inbound frame, markers included
pub fn decode_command(frame: &[u8]) -> Result<InboundCommand, ProtocolError> {
    if frame.len() < 3 {
        return Err(ProtocolError::InvalidFrame(format!(
            "{} bytes is too short for a command frame",
            frame.len()
        )));
    }
    if frame[0] != SYSEX_START {
        return Err(ProtocolError::InvalidFrame(format!(
            "expected start marker 0xF0, got 0x{:02X}",
            frame[0]
        )));
    }
    if frame[frame.len() - 1] != SYSEX_END {
        return Err(ProtocolError::InvalidFrame("missing end marker 0xF7".to_string()));
    }

    let kind = frame[1];
    let expected = arity(kind).ok_or(ProtocolError::UnknownKind(kind))?;

    let fields = &frame[2..frame.len() - 1];
    if let Some(byte) = fields.iter().find(|b| **b >= 0x80) {
        return Err(ProtocolError::InvalidFrame(format!(
            "field byte 0x{:02X} is not a 7-bit value",
            byte
        )));
    }
    if fields.len() != expected {
        return Err(ProtocolError::MalformedMessage {
            kind,
            expected,
            actual: fields.len(),
        });
    }

    let field = |i: usize| fields[i] as usize;
    let command = match kind {
        FIRE_CLIP => InboundCommand::FireClip {
            fire: fields[0],
            slot: SlotCoord::new(field(1), field(2)),
        },
        DELETE_CLIP => InboundCommand::DeleteClip {
            slot: SlotCoord::new(field(0), field(1)),
        },
        _ => InboundCommand::CopyClip {
            source: SlotCoord::new(field(0), field(1)),
            destination: SlotCoord::new(field(2), field(3)),
        },
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fire() {
        let cmd = decode_command(&[0xF0, 9, 1, 2, 5, 0xF7]).unwrap();
        assert_eq!(
            cmd,
            InboundCommand::FireClip {
                fire: 1,
                slot: SlotCoord::new(2, 5)
            }
        );
        assert_eq!(cmd.kind(), FIRE_CLIP);
    }

    #[test]
    fn test_decode_delete_and_copy() {
        assert_eq!(
            decode_command(&[0xF0, 10, 0, 3, 0xF7]).unwrap(),
            InboundCommand::DeleteClip { slot: SlotCoord::new(0, 3) }
        );
        assert_eq!(
            decode_command(&[0xF0, 11, 1, 0, 2, 4, 0xF7]).unwrap(),
            InboundCommand::CopyClip {
                source: SlotCoord::new(1, 0),
                destination: SlotCoord::new(2, 4),
            }
        );
    }

    #[test]
    fn test_wrong_arity_is_malformed() {
        assert_eq!(
            decode_command(&[0xF0, 9, 1, 2, 0xF7]),
            Err(ProtocolError::MalformedMessage { kind: 9, expected: 3, actual: 2 })
        );
        assert_eq!(
            decode_command(&[0xF0, 10, 1, 2, 3, 0xF7]),
            Err(ProtocolError::MalformedMessage { kind: 10, expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(decode_command(&[0xF0, 0x42, 1, 0xF7]), Err(ProtocolError::UnknownKind(0x42)));
        // kind wins over bad field bytes
        assert_eq!(decode_command(&[0xF0, 0x33, 0x90, 0xF7]), Err(ProtocolError::UnknownKind(0x33)));
        assert_eq!(decode_command(&[0xF0, 0x90, 1, 0xF7]), Err(ProtocolError::UnknownKind(0x90)));
    }

    #[test]
    fn test_invalid_frames() {
        assert!(matches!(decode_command(&[0xF0, 9]), Err(ProtocolError::InvalidFrame(_))));
        assert!(matches!(
            decode_command(&[0x90, 9, 1, 2, 3, 0xF7]),
            Err(ProtocolError::InvalidFrame(_))
        ));
        assert!(matches!(
            decode_command(&[0xF0, 9, 1, 2, 3]),
            Err(ProtocolError::InvalidFrame(_))
        ));
        assert!(matches!(
            decode_command(&[0xF0, 10, 0x81, 2, 0xF7]),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_empty_body_is_malformed_not_invalid() {
        assert_eq!(
            decode_command(&[0xF0, 11, 0xF7]),
            Err(ProtocolError::MalformedMessage { kind: 11, expected: 4, actual: 0 })
        );
    }
}
