//! Streaming envelope encryption: XChaCha20-Poly1305 STREAM (BE32)
//!
//! Stream wire format (everything after the 72-byte wrapped-key header):
//! ```text
//! [19 bytes: random nonce prefix]
//! repeated: [u32 BE: ciphertext length, MSB set on the final frame]
//!           [ciphertext = segment plaintext + 16-byte tag]
//! ```
//!
//! Plaintext segments are `SEGMENT_SIZE` bytes except the final one, which
//! may be shorter or empty. The STREAM construction binds each segment to
//! its position and to last-ness, so reordering, truncating, or extending
//! the stream fails authentication just like flipping a ciphertext byte.

use std::io::{self, Read, Write};

use aead::stream::{DecryptorBE32, EncryptorBE32, Nonce as StreamNonce, StreamBE32};
use chacha20poly1305::{aead::KeyInit, XChaCha20Poly1305};
use rand::RngCore;

use crate::{CryptoError, CryptoResult, ObjectKey, TAG_SIZE};

/// Plaintext bytes per STREAM segment.
pub const SEGMENT_SIZE: usize = 64 * 1024;

/// STREAM (BE32) nonce prefix: 24-byte XChaCha nonce minus 4 counter bytes
/// and 1 last-block byte.
const STREAM_NONCE_SIZE: usize = 19;

/// MSB of the frame length marks the final frame.
const LAST_FRAME: u32 = 1 << 31;

fn auth_failed() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "envelope stream authentication failed")
}

impl ObjectKey {
    /// Start an encrypting layer over `out`, writing the nonce prefix
    /// immediately. Call [`EncryptingWriter::finish`] to emit the final
    /// frame; dropping the writer without it leaves a truncated stream that
    /// will fail authentication on read.
    pub fn start_writer<W: Write>(&self, mut out: W) -> CryptoResult<EncryptingWriter<W>> {
        let mut prefix = [0u8; STREAM_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut prefix);
        out.write_all(&prefix)?;

        let cipher = XChaCha20Poly1305::new(self.as_bytes().into());
        let nonce = StreamNonce::<XChaCha20Poly1305, StreamBE32<XChaCha20Poly1305>>::from_slice(&prefix);
        Ok(EncryptingWriter {
            enc: EncryptorBE32::from_aead(cipher, nonce),
            out,
            buf: Vec::with_capacity(SEGMENT_SIZE),
        })
    }

    /// Start a decrypting layer over `src`, consuming the nonce prefix.
    pub fn start_reader<R: Read>(&self, mut src: R) -> CryptoResult<DecryptingReader<R>> {
        let mut prefix = [0u8; STREAM_NONCE_SIZE];
        src.read_exact(&mut prefix).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                CryptoError::Corrupt
            } else {
                CryptoError::Io(e)
            }
        })?;

        let cipher = XChaCha20Poly1305::new(self.as_bytes().into());
        let nonce = StreamNonce::<XChaCha20Poly1305, StreamBE32<XChaCha20Poly1305>>::from_slice(&prefix);
        Ok(DecryptingReader {
            dec: Some(DecryptorBE32::from_aead(cipher, nonce)),
            src,
            plain: Vec::new(),
            pos: 0,
        })
    }
}

/// `io::Write` adapter produced by [`ObjectKey::start_writer`].
pub struct EncryptingWriter<W: Write> {
    enc: EncryptorBE32<XChaCha20Poly1305>,
    out: W,
    buf: Vec<u8>,
}

impl<W: Write> EncryptingWriter<W> {
    fn emit_segment(&mut self) -> io::Result<()> {
        let segment: Vec<u8> = self.buf.drain(..SEGMENT_SIZE).collect();
        let ct = self
            .enc
            .encrypt_next(segment.as_slice())
            .map_err(|_| auth_failed())?;
        self.out.write_all(&(ct.len() as u32).to_be_bytes())?;
        self.out.write_all(&ct)
    }

    /// Encrypt any buffered plaintext as the final frame and flush.
    /// Returns the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        while self.buf.len() >= SEGMENT_SIZE {
            self.emit_segment()?;
        }
        let Self { enc, mut out, buf } = self;
        let ct = enc.encrypt_last(buf.as_slice()).map_err(|_| auth_failed())?;
        out.write_all(&((ct.len() as u32) | LAST_FRAME).to_be_bytes())?;
        out.write_all(&ct)?;
        out.flush()?;
        Ok(out)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= SEGMENT_SIZE {
            self.emit_segment()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Partial segments cannot be emitted early; only the frame boundary
        // is flushable.
        self.out.flush()
    }
}

/// `io::Read` adapter produced by [`ObjectKey::start_reader`].
///
/// Truncation, frame corruption, and authenticator mismatches all surface as
/// `InvalidData`/`UnexpectedEof` I/O errors, which the envelope codec maps
/// to its corrupt-envelope error.
pub struct DecryptingReader<R: Read> {
    /// `None` once the final frame has been consumed.
    dec: Option<DecryptorBE32<XChaCha20Poly1305>>,
    src: R,
    plain: Vec<u8>,
    pos: usize,
}

impl<R: Read> DecryptingReader<R> {
    fn refill(&mut self) -> io::Result<()> {
        let mut len_bytes = [0u8; 4];
        self.src.read_exact(&mut len_bytes)?;
        let raw = u32::from_be_bytes(len_bytes);
        let last = raw & LAST_FRAME != 0;
        let len = (raw & !LAST_FRAME) as usize;
        if len > SEGMENT_SIZE + TAG_SIZE {
            return Err(auth_failed());
        }

        let mut ct = vec![0u8; len];
        self.src.read_exact(&mut ct)?;

        // self.dec is Some: refill is only reached while the decryptor lives.
        if last {
            let dec = self.dec.take().ok_or_else(auth_failed)?;
            self.plain = dec.decrypt_last(ct.as_slice()).map_err(|_| auth_failed())?;
        } else {
            let dec = self.dec.as_mut().ok_or_else(auth_failed)?;
            self.plain = dec.decrypt_next(ct.as_slice()).map_err(|_| auth_failed())?;
        }
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plain.len() {
            if self.dec.is_none() {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = out.len().min(self.plain.len() - self.pos);
        out[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let key = ObjectKey::generate();
        let mut w = key.start_writer(Vec::new()).unwrap();
        w.write_all(data).unwrap();
        let encrypted = w.finish().unwrap();

        let mut r = key.start_reader(encrypted.as_slice()).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_roundtrip_small() {
        let data = b"hello, encrypted stream";
        assert_eq!(roundtrip(data), data);
    }

    #[test]
    fn test_roundtrip_empty() {
        assert_eq!(roundtrip(b""), b"");
    }

    #[test]
    fn test_roundtrip_multi_segment() {
        // Three full segments plus a tail, and an exact segment multiple.
        let data: Vec<u8> = (0..SEGMENT_SIZE * 3 + 1234).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(&data), data);

        let exact: Vec<u8> = (0..SEGMENT_SIZE * 2).map(|i| (i % 13) as u8).collect();
        assert_eq!(roundtrip(&exact), exact);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = ObjectKey::generate();
        let mut w = key.start_writer(Vec::new()).unwrap();
        w.write_all(b"secret").unwrap();
        let encrypted = w.finish().unwrap();

        let other = ObjectKey::generate();
        let mut r = other.start_reader(encrypted.as_slice()).unwrap();
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_tamper_any_byte_fails() {
        let key = ObjectKey::generate();
        let mut w = key.start_writer(Vec::new()).unwrap();
        w.write_all(b"a body worth protecting").unwrap();
        let encrypted = w.finish().unwrap();

        for i in 0..encrypted.len() {
            let mut tampered = encrypted.clone();
            tampered[i] ^= 0x01;
            let mut r = key.start_reader(tampered.as_slice()).unwrap();
            let mut out = Vec::new();
            assert!(
                r.read_to_end(&mut out).is_err(),
                "flipping byte {i} must fail decryption"
            );
        }
    }

    #[test]
    fn test_truncation_fails() {
        let key = ObjectKey::generate();
        let mut w = key.start_writer(Vec::new()).unwrap();
        w.write_all(b"torn tails are detected").unwrap();
        let encrypted = w.finish().unwrap();

        for cut in [encrypted.len() - 1, encrypted.len() - 5, STREAM_NONCE_SIZE + 2] {
            let mut r = key.start_reader(&encrypted[..cut]).unwrap();
            let mut out = Vec::new();
            assert!(r.read_to_end(&mut out).is_err(), "cut at {cut} must fail");
        }
    }

    #[test]
    fn test_missing_final_frame_fails() {
        // A stream that ends cleanly after a non-final frame is still torn.
        let key = ObjectKey::generate();
        let data: Vec<u8> = vec![7u8; SEGMENT_SIZE];
        let mut w = key.start_writer(Vec::new()).unwrap();
        w.write_all(&data).unwrap();
        let encrypted = w.finish().unwrap();

        // Keep nonce + first (full, non-final) frame only.
        let first_frame_end = STREAM_NONCE_SIZE + 4 + SEGMENT_SIZE + TAG_SIZE;
        let mut r = key.start_reader(&encrypted[..first_frame_end]).unwrap();
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
