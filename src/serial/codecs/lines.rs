use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::serial::error::SerialPortError;

/// Controllers send short JSON lines; anything much longer is garbage from some other device.
const DEFAULT_MAX_LENGTH: usize = 8 * 1024;

/// This codec has a configurable delimiter character for reading,
/// and optionally adds a character to each line it encodes.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// If provided, which byte to append when writing (encoding) messages.
    /// If `None`, forwards the data as-is.
    write_delimiter: Option<u8>,

    /// The longest line accepted before giving up on the stream.
    max_length: usize,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_delimiter: Option<u8>) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_delimiter,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Newline in, newline out.
    pub fn newline() -> Self {
        Self::new(b'\n', Some(b'\n'))
    }

    /// Return a [StringCodec], which does the same thing as the underlying [LinesCodec].
    /// The difference is that it writes strings instead of vectors of bytes.
    /// It also reads strings, and it is configurable whether bad utf8
    /// should result in an error, or be replaced with some lossy character.
    pub fn into_string_codec(self, lossy: bool) -> StringCodec {
        StringCodec {
            lossy,
            wrapped: self,
        }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', None)
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(line[..].to_vec()))
        } else if read_to > self.max_length {
            Err(SerialPortError::LineTooLong(self.max_length))
        } else {
            // No full frame yet.
            // The same buffer `src` will be provided again, possibly with more data,
            // so there is no need to re-read the bytes already looked at.
            self.cursor = read_to;

            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        self.cursor = 0;

        if src.is_empty() {
            Ok(None)
        } else {
            // A last line without a trailing delimiter.
            let line = src.split_to(src.len());
            Ok(Some(line[..].to_vec()))
        }
    }
}

impl Encoder<Vec<u8>> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);

        if let Some(character) = self.write_delimiter {
            dst.extend_from_slice(&[character]);
        }
        Ok(())
    }
}

/// This does the same thing as the underlying [LinesCodec].
/// The difference is that it reads strings, and it is configurable whether bad utf8
/// should result in an error, or be replaced with some lossy character.
///
/// A trailing carriage return is removed from each line read.
#[derive(Debug, Clone)]
pub struct StringCodec {
    lossy: bool,
    wrapped: LinesCodec,
}

impl StringCodec {
    fn line_from(&self, mut bytes: Vec<u8>) -> Result<String, SerialPortError> {
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }

        if self.lossy {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Ok(String::from_utf8(bytes)?)
        }
    }
}

impl Decoder for StringCodec {
    type Item = String;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.wrapped.decode(src)? {
            Some(bytes) => Ok(Some(self.line_from(bytes)?)),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.wrapped.decode_eof(src)? {
            Some(bytes) => Ok(Some(self.line_from(bytes)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<String> for StringCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.wrapped.encode(item.into_bytes(), dst)
    }
}
