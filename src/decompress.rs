//! Decoding of concatenated compressed frames.
//!
//! Dumps are published as many independent bzip2 (or gzip) frames written
//! back to back. Each decoder below decodes one frame at a time and restarts
//! on the leftover bytes whenever a frame ends, so input chunks may be split
//! anywhere, including inside a frame header.

use crate::error::{ExtractError, FrameError};
use bzip2::{Decompress, Status};
use flate2::bufread::GzDecoder;
use log::debug;
use std::io::{self, BufRead, Read};

/// A chunk as delivered by the byte source.
pub type Chunk = io::Result<Vec<u8>>;

const BZIP2_MAGIC: &[u8] = b"BZh";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Pick from the leading magic bytes.
    Auto,
    Bzip2,
    Gzip,
    None,
}

/// Buffered view over a sequence of input chunks. Only the current chunk is
/// held; `consume` advances inside it and `fill_buf` pulls the next one.
pub struct ChunkStream<I> {
    chunks: I,
    current: Vec<u8>,
    pos: usize,
    exhausted: bool,
}

impl<I> ChunkStream<I>
where
    I: Iterator<Item = Chunk>,
{
    pub fn new(chunks: I) -> Self {
        Self {
            chunks,
            current: Vec::new(),
            pos: 0,
            exhausted: false,
        }
    }

    /// Returns up to `n` leading bytes without consuming them. Small leading
    /// chunks are merged until `n` bytes are available or input ends.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.current.len() - self.pos < n && !self.exhausted {
            match self.chunks.next() {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.current.drain(..self.pos);
                    self.pos = 0;
                    self.current.extend_from_slice(&chunk);
                }
                None => self.exhausted = true,
            }
        }
        let end = (self.pos + n).min(self.current.len());
        Ok(&self.current[self.pos..end])
    }
}

impl<I> BufRead for ChunkStream<I>
where
    I: Iterator<Item = Chunk>,
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.current.len() && !self.exhausted {
            match self.chunks.next() {
                Some(chunk) => {
                    self.current = chunk?;
                    self.pos = 0;
                }
                None => {
                    self.exhausted = true;
                    self.current = Vec::new();
                    self.pos = 0;
                }
            }
        }
        Ok(&self.current[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.current.len());
    }
}

impl<I> Read for ChunkStream<I>
where
    I: Iterator<Item = Chunk>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

/// Concatenated bzip2 frames. A fresh decoder is built at every end-of-frame
/// and fed the bytes the previous one left unconsumed.
pub struct Bzip2Frames<I> {
    input: ChunkStream<I>,
    decoder: Decompress,
    frame: u64,
    in_frame: bool,
}

impl<I> Bzip2Frames<I>
where
    I: Iterator<Item = Chunk>,
{
    pub fn new(input: ChunkStream<I>) -> Self {
        Self {
            input,
            decoder: Decompress::new(false),
            frame: 0,
            in_frame: false,
        }
    }

    /// Number of frames fully decoded so far.
    pub fn frames_completed(&self) -> u64 {
        self.frame
    }
}

impl<I> Read for Bzip2Frames<I>
where
    I: Iterator<Item = Chunk>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let input = self.input.fill_buf()?;
            if input.is_empty() {
                if self.in_frame {
                    return Err(FrameError::Truncated {
                        format: "bzip2",
                        frame: self.frame,
                    }
                    .into());
                }
                return Ok(0);
            }

            let before_in = self.decoder.total_in();
            let before_out = self.decoder.total_out();
            let status = self.decoder.decompress(input, buf).map_err(|e| FrameError::Corrupt {
                format: "bzip2",
                frame: self.frame,
                detail: e.to_string(),
            })?;
            let consumed = (self.decoder.total_in() - before_in) as usize;
            let produced = (self.decoder.total_out() - before_out) as usize;
            self.input.consume(consumed);
            if consumed > 0 {
                self.in_frame = true;
            }

            if matches!(status, Status::StreamEnd) {
                debug!("bzip2 frame {} complete", self.frame);
                self.decoder = Decompress::new(false);
                self.frame += 1;
                self.in_frame = false;
            } else if consumed == 0 && produced == 0 {
                return Err(FrameError::Corrupt {
                    format: "bzip2",
                    frame: self.frame,
                    detail: "decoder stalled".to_string(),
                }
                .into());
            }

            if produced > 0 {
                return Ok(produced);
            }
        }
    }
}

/// Concatenated gzip members, one `GzDecoder` per member. The buffered
/// decoder only takes what it needs from the stream, so the next member's
/// bytes are still there once a member ends.
pub struct GzipMembers<I> {
    decoder: Option<GzDecoder<ChunkStream<I>>>,
    member: u64,
}

impl<I> GzipMembers<I>
where
    I: Iterator<Item = Chunk>,
{
    pub fn new(input: ChunkStream<I>) -> Self {
        Self {
            decoder: Some(GzDecoder::new(input)),
            member: 0,
        }
    }

    fn classify(&self, e: io::Error) -> io::Error {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => FrameError::Corrupt {
                format: "gzip",
                frame: self.member,
                detail: e.to_string(),
            }
            .into(),
            io::ErrorKind::UnexpectedEof => FrameError::Truncated {
                format: "gzip",
                frame: self.member,
            }
            .into(),
            _ => e,
        }
    }
}

impl<I> Read for GzipMembers<I>
where
    I: Iterator<Item = Chunk>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let result = match self.decoder.as_mut() {
                Some(decoder) => decoder.read(buf),
                None => return Ok(0),
            };
            let n = result.map_err(|e| self.classify(e))?;
            if n > 0 {
                return Ok(n);
            }

            // Member finished: restart on whatever follows it.
            let mut input = match self.decoder.take() {
                Some(decoder) => decoder.into_inner(),
                None => return Ok(0),
            };
            debug!("gzip member {} complete", self.member);
            self.member += 1;
            if input.fill_buf()?.is_empty() {
                return Ok(0);
            }
            self.decoder = Some(GzDecoder::new(input));
        }
    }
}

/// The decompressed view of the input, whatever its container format.
pub enum DecodedStream<I> {
    Bzip2(Bzip2Frames<I>),
    Gzip(GzipMembers<I>),
    Plain(ChunkStream<I>),
}

impl<I> DecodedStream<I>
where
    I: Iterator<Item = Chunk>,
{
    /// Wraps `chunks` in the decoder for `compression`, sniffing the magic
    /// bytes when it is `Auto`.
    pub fn open(chunks: I, compression: Compression) -> io::Result<Self> {
        let mut input = ChunkStream::new(chunks);
        let compression = match compression {
            Compression::Auto => detect(input.peek(BZIP2_MAGIC.len())?),
            other => other,
        };
        debug!("Input compression: {:?}", compression);

        Ok(match compression {
            Compression::Bzip2 => DecodedStream::Bzip2(Bzip2Frames::new(input)),
            Compression::Gzip => DecodedStream::Gzip(GzipMembers::new(input)),
            Compression::None | Compression::Auto => DecodedStream::Plain(input),
        })
    }

    pub fn format(&self) -> &'static str {
        match self {
            DecodedStream::Bzip2(_) => "bzip2",
            DecodedStream::Gzip(_) => "gzip",
            DecodedStream::Plain(_) => "plain",
        }
    }
}

impl<I> Read for DecodedStream<I>
where
    I: Iterator<Item = Chunk>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecodedStream::Bzip2(frames) => frames.read(buf),
            DecodedStream::Gzip(members) => members.read(buf),
            DecodedStream::Plain(stream) => stream.read(buf),
        }
    }
}

fn detect(head: &[u8]) -> Compression {
    if head.starts_with(BZIP2_MAGIC) {
        Compression::Bzip2
    } else if head.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else {
        Compression::None
    }
}

/// Push-style driver: decodes concatenated bzip2 frames from `chunks` and
/// hands every decoded piece to `on_decompressed` as it is produced.
pub fn decompress<I, F>(chunks: I, mut on_decompressed: F) -> Result<u64, ExtractError>
where
    I: Iterator<Item = Chunk>,
    F: FnMut(&[u8]),
{
    let mut frames = Bzip2Frames::new(ChunkStream::new(chunks));
    let mut buf = vec![0u8; 128 * 1024];
    loop {
        let n = frames.read(&mut buf)?;
        if n == 0 {
            return Ok(frames.frames_completed());
        }
        on_decompressed(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::write::BzEncoder;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn bz(data: &[u8]) -> Vec<u8> {
        let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn split_at(data: &[u8], cuts: &[usize]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            chunks.push(Ok(data[start..cut].to_vec()));
            start = cut;
        }
        chunks.push(Ok(data[start..].to_vec()));
        chunks
    }

    fn read_all<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    const FIRST: &[u8] = b"<mediawiki><siteinfo><base>https://en.wikipedia.org/wiki/Main_Page</base></siteinfo>";
    const SECOND: &[u8] = b"<page><title>Foo</title><text>{{Infobox company | logo = Foo.svg }}</text></page></mediawiki>";

    #[test]
    fn two_frames_decode_at_every_split_point() {
        let first = bz(FIRST);
        let second = bz(SECOND);
        let joined = [first.clone(), second].concat();
        let expected = [FIRST, SECOND].concat();

        for cut in 0..=joined.len() {
            let chunks = split_at(&joined, &[cut]);
            let out = read_all(Bzip2Frames::new(ChunkStream::new(chunks.into_iter()))).unwrap();
            assert_eq!(out, expected, "split at {}", cut);
        }

        // Boundary exactly between frames, and a cut inside the second header.
        let boundary = first.len();
        let chunks = split_at(&joined, &[boundary, boundary + 2]);
        let out = read_all(Bzip2Frames::new(ChunkStream::new(chunks.into_iter()))).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn single_byte_chunks() {
        let joined = [bz(FIRST), bz(SECOND), bz(b"tail")].concat();
        let chunks: Vec<Chunk> = joined.iter().map(|b| Ok(vec![*b])).collect();
        let mut frames = Bzip2Frames::new(ChunkStream::new(chunks.into_iter()));
        let mut out = Vec::new();
        frames.read_to_end(&mut out).unwrap();
        assert_eq!(out, [FIRST, SECOND, b"tail"].concat());
        assert_eq!(frames.frames_completed(), 3);
    }

    #[test]
    fn push_driver_reports_frames() {
        let joined = [bz(FIRST), bz(SECOND)].concat();
        let mut out = Vec::new();
        let frames = decompress(split_at(&joined, &[7, 50]).into_iter(), |piece| {
            out.extend_from_slice(piece)
        })
        .unwrap();
        assert_eq!(frames, 2);
        assert_eq!(out, [FIRST, SECOND].concat());
    }

    #[test]
    fn corrupt_frame_is_fatal() {
        let mut data = bz(FIRST);
        // Block header magic follows the 4-byte "BZh9" stream header.
        for b in &mut data[4..10] {
            *b ^= 0xff;
        }
        let err = decompress(vec![Ok(data)].into_iter(), |_| {}).unwrap_err();
        assert!(matches!(err, ExtractError::CorruptStream { format: "bzip2", frame: 0, .. }), "{}", err);
    }

    #[test]
    fn garbage_after_frame_is_corrupt_second_frame() {
        let data = [bz(FIRST), b"not bzip2 at all".to_vec()].concat();
        let err = decompress(vec![Ok(data)].into_iter(), |_| {}).unwrap_err();
        assert!(matches!(err, ExtractError::CorruptStream { frame: 1, .. }), "{}", err);
    }

    #[test]
    fn truncated_frame_is_reported() {
        let data = bz(SECOND);
        let cut = data[..data.len() - 10].to_vec();
        let err = decompress(vec![Ok(cut)].into_iter(), |_| {}).unwrap_err();
        assert!(matches!(err, ExtractError::TruncatedStream { frame: 0, .. }), "{}", err);
    }

    #[test]
    fn empty_input_is_empty_output() {
        let frames = decompress(Vec::<Chunk>::new().into_iter(), |_| panic!("no output expected")).unwrap();
        assert_eq!(frames, 0);
    }

    #[test]
    fn transport_error_passes_through() {
        let chunks: Vec<Chunk> = vec![
            Ok(bz(FIRST)),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let err = decompress(chunks.into_iter(), |_| {}).unwrap_err();
        assert!(matches!(err, ExtractError::Input(_)), "{}", err);
    }

    #[test]
    fn gzip_members_decode_across_splits() {
        let joined = [gz(FIRST), gz(SECOND)].concat();
        for cut in (0..joined.len()).step_by(5) {
            let stream = DecodedStream::open(split_at(&joined, &[cut]).into_iter(), Compression::Auto).unwrap();
            assert_eq!(stream.format(), "gzip");
            assert_eq!(read_all(stream).unwrap(), [FIRST, SECOND].concat(), "split at {}", cut);
        }
    }

    #[test]
    fn detects_format_from_tiny_leading_chunks() {
        let data = bz(FIRST);
        let chunks = split_at(&data, &[1, 2]);
        let stream = DecodedStream::open(chunks.into_iter(), Compression::Auto).unwrap();
        assert_eq!(stream.format(), "bzip2");
        assert_eq!(read_all(stream).unwrap(), FIRST);
    }

    #[test]
    fn plain_input_passes_through() {
        let chunks = split_at(FIRST, &[1, 10]);
        let stream = DecodedStream::open(chunks.into_iter(), Compression::Auto).unwrap();
        assert_eq!(stream.format(), "plain");
        assert_eq!(read_all(stream).unwrap(), FIRST);
    }

    #[test]
    fn forced_format_skips_detection() {
        let stream = DecodedStream::open(vec![Ok(b"BZh not really".to_vec())].into_iter(), Compression::None).unwrap();
        assert_eq!(read_all(stream).unwrap(), b"BZh not really");
    }
}
