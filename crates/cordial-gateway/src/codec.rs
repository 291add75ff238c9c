//! Frame normalization: compressed binary frames become the same text a
//! text frame would have carried.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{GatewayError, GatewayResult};

/// Output block size for each inflate step.
const INFLATE_BLOCK: usize = 1024;

/// A data frame as read off the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// One zlib-compressed message.
    Binary(Vec<u8>),
}

/// Turn a frame into envelope text.
///
/// # Errors
///
/// Returns [`GatewayError::Decompress`] for corrupt or truncated input and
/// [`GatewayError::InvalidUtf8`] when the inflated bytes are not UTF-8.
pub fn normalize(frame: InboundFrame) -> GatewayResult<String> {
    match frame {
        InboundFrame::Text(text) => Ok(text),
        InboundFrame::Binary(bytes) => Ok(String::from_utf8(inflate(&bytes)?)?),
    }
}

/// Inflate a complete zlib stream in fixed-size blocks.
///
/// # Errors
///
/// Returns [`GatewayError::Decompress`] when the stream is corrupt or ends
/// before the zlib trailer.
pub fn inflate(input: &[u8]) -> GatewayResult<Vec<u8>> {
    let mut decoder = Decompress::new(true);
    let mut output = Vec::with_capacity(input.len().saturating_mul(2));
    let mut block = [0u8; INFLATE_BLOCK];

    loop {
        let consumed = usize::try_from(decoder.total_in()).unwrap_or(input.len());
        let remaining = input.get(consumed..).unwrap_or(&[]);
        let before_in = decoder.total_in();
        let before_out = decoder.total_out();

        let status = decoder.decompress(remaining, &mut block, FlushDecompress::None)?;

        let produced =
            usize::try_from(decoder.total_out().saturating_sub(before_out)).unwrap_or(0);
        output.extend_from_slice(block.get(..produced).unwrap_or(&[]));

        match status {
            Status::StreamEnd => return Ok(output),
            Status::Ok | Status::BufError => {
                if decoder.total_in() == before_in && produced == 0 {
                    return Err(GatewayError::Decompress(
                        "stream ended before the zlib trailer".into(),
                    ));
                }
            },
        }
    }
}
