//! Record framing for the durable log
//!
//! A record is `@|^` + escape(payload) + `@|$`, where escape doubles every
//! `|`. Records are concatenated with no separator. After escaping, a single
//! `|` only ever appears inside a marker, so the scanner below never needs
//! to look further back than the current frame.

/// Marker opening every record
pub const START_MARKER: &[u8; 3] = b"@|^";

/// Marker closing every record
pub const END_MARKER: &[u8; 3] = b"@|$";

const DELIMITER: u8 = b'|';
const MARKER_LEAD: u8 = b'@';

/// Result of scanning one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameScan {
    /// A full frame: the decoded payload and the encoded length consumed
    Complete { payload: Vec<u8>, consumed: usize },
    /// The buffer ends before the frame does
    Incomplete,
    /// The bytes cannot be a frame; `at` is relative to the buffer start
    Invalid { at: usize, reason: &'static str },
}

/// Encodes a payload into a log record.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let escapes = payload.iter().filter(|&&b| b == DELIMITER).count();
    let mut out = Vec::with_capacity(payload.len() + escapes + START_MARKER.len() + END_MARKER.len());

    out.extend_from_slice(START_MARKER);
    for &byte in payload {
        out.push(byte);
        if byte == DELIMITER {
            out.push(DELIMITER);
        }
    }
    out.extend_from_slice(END_MARKER);
    out
}

/// Decodes exactly one encoded record.
///
/// Returns `None` if `frame` is not a single complete record.
pub fn decode(frame: &[u8]) -> Option<Vec<u8>> {
    match scan_frame(frame) {
        FrameScan::Complete { payload, consumed } if consumed == frame.len() => Some(payload),
        _ => None,
    }
}

/// Scans the frame starting at `buf[0]`.
pub fn scan_frame(buf: &[u8]) -> FrameScan {
    if buf.len() < START_MARKER.len() {
        return if START_MARKER.starts_with(buf) {
            FrameScan::Incomplete
        } else {
            FrameScan::Invalid {
                at: 0,
                reason: "missing start marker",
            }
        };
    }
    if &buf[..START_MARKER.len()] != START_MARKER {
        return FrameScan::Invalid {
            at: 0,
            reason: "missing start marker",
        };
    }

    let mut payload = Vec::new();
    let mut i = START_MARKER.len();

    loop {
        let Some(&byte) = buf.get(i) else {
            return FrameScan::Incomplete;
        };

        match byte {
            DELIMITER => match buf.get(i + 1) {
                Some(&DELIMITER) => {
                    payload.push(DELIMITER);
                    i += 2;
                }
                Some(_) => {
                    return FrameScan::Invalid {
                        at: i,
                        reason: "unescaped delimiter",
                    }
                }
                None => return FrameScan::Incomplete,
            },
            MARKER_LEAD => match (buf.get(i + 1), buf.get(i + 2)) {
                (None, _) | (Some(&DELIMITER), None) => return FrameScan::Incomplete,
                (Some(&DELIMITER), Some(&b'$')) => {
                    return FrameScan::Complete {
                        payload,
                        consumed: i + END_MARKER.len(),
                    }
                }
                // `@` followed by an escaped delimiter
                (Some(&DELIMITER), Some(&DELIMITER)) => {
                    payload.push(MARKER_LEAD);
                    i += 1;
                }
                (Some(&DELIMITER), Some(_)) => {
                    return FrameScan::Invalid {
                        at: i,
                        reason: "unexpected marker inside record",
                    }
                }
                (Some(_), _) => {
                    payload.push(MARKER_LEAD);
                    i += 1;
                }
            },
            other => {
                payload.push(other);
                i += 1;
            }
        }
    }
}
