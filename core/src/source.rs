use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, info, warn};

use crate::iwrf::{packet_id_order, PACKET_PREFIX_LEN};
use crate::prelude::{IwrfError, IwrfResult};

/// Upper bound on a single packet; larger declared lengths are treated as
/// garbage during framing.
pub const MAX_PACKET_LEN: usize = 1 << 24;

const READ_CHUNK: usize = 64 * 1024;

/// What a pulse source hands the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One complete packet, prefix included.
    Packet(Vec<u8>),
    /// No data arrived within the read timeout; the source is still live.
    Timeout,
    EndOfStream,
}

/// Anything that can supply IWRF packets to the consumer loop.
pub trait PulseSource {
    /// Block until a packet, a timeout or the end of the stream. Errors are
    /// fatal to the stream.
    fn next_event(&mut self) -> IwrfResult<SourceEvent>;
}

impl<S: PulseSource + ?Sized> PulseSource for Box<S> {
    fn next_event(&mut self) -> IwrfResult<SourceEvent> {
        (**self).next_event()
    }
}

/// Frames IWRF packets out of a byte stream.
///
/// Each packet starts with a 4-byte id and a 4-byte total length, in either
/// byte order. Bytes that do not start a valid packet are skipped one at a
/// time until the stream lines up again.
pub struct PacketReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
    skipped: usize,
    n_packets: u64,
    n_resyncs: u64,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            eof: false,
            skipped: 0,
            n_packets: 0,
            n_resyncs: 0,
        }
    }

    pub fn n_packets(&self) -> u64 {
        self.n_packets
    }

    pub fn n_resyncs(&self) -> u64 {
        self.n_resyncs
    }

    /// Bytes read but not yet returned as a packet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_packet(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.buf.len() < PACKET_PREFIX_LEN {
                return None;
            }
            let id_bytes = [self.buf[0], self.buf[1], self.buf[2], self.buf[3]];
            let len = match packet_id_order(id_bytes) {
                Some(true) => BigEndian::read_i32(&self.buf[4..8]),
                Some(false) => LittleEndian::read_i32(&self.buf[4..8]),
                None => -1,
            };
            if len < PACKET_PREFIX_LEN as i32 || len as usize > MAX_PACKET_LEN {
                if self.skipped == 0 {
                    warn!("lost packet sync, searching for next packet id");
                }
                self.skipped += 1;
                self.buf.drain(..1);
                continue;
            }

            let len = len as usize;
            if self.buf.len() < len {
                return None;
            }
            if self.skipped > 0 {
                info!("packet sync regained after {} bytes", self.skipped);
                self.skipped = 0;
                self.n_resyncs += 1;
            }
            self.n_packets += 1;
            return Some(self.buf.drain(..len).collect());
        }
    }
}

impl<R: Read> PulseSource for PacketReader<R> {
    fn next_event(&mut self) -> IwrfResult<SourceEvent> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(packet) = self.take_packet() {
                return Ok(SourceEvent::Packet(packet));
            }
            if self.eof {
                if !self.buf.is_empty() {
                    warn!("discarding {} trailing bytes at end of stream", self.buf.len());
                    self.buf.clear();
                }
                return Ok(SourceEvent::EndOfStream);
            }
            match self.inner.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(SourceEvent::Timeout);
                }
                Err(e) => return Err(IwrfError::Io(e)),
            }
        }
    }
}

/// Connect to a live pulse server. Reads that stall longer than `timeout`
/// come back as [`SourceEvent::Timeout`].
pub fn connect_tcp<A: ToSocketAddrs + std::fmt::Debug>(
    addr: A,
    timeout: Duration,
) -> IwrfResult<PacketReader<TcpStream>> {
    let stream = TcpStream::connect(&addr)?;
    stream.set_read_timeout(Some(timeout))?;
    info!("connected to pulse server {:?}", addr);
    Ok(PacketReader::new(stream))
}

/// Replays a list of files as one continuous stream.
pub struct FileListSource {
    pending: VecDeque<PathBuf>,
    current: Option<PacketReader<BufReader<File>>>,
}

impl FileListSource {
    pub fn new<I: IntoIterator<Item = PathBuf>>(paths: I) -> Self {
        Self {
            pending: paths.into_iter().collect(),
            current: None,
        }
    }

    fn open_next(&mut self) -> IwrfResult<bool> {
        match self.pending.pop_front() {
            Some(path) => {
                let file = File::open(&path).map_err(|e| {
                    IwrfError::Io(std::io::Error::new(
                        e.kind(),
                        format!("{}: {}", path.display(), e),
                    ))
                })?;
                info!("reading pulses from {}", path.display());
                self.current = Some(PacketReader::new(BufReader::new(file)));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl PulseSource for FileListSource {
    fn next_event(&mut self) -> IwrfResult<SourceEvent> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(SourceEvent::EndOfStream);
            }
            if let Some(reader) = self.current.as_mut() {
                match reader.next_event()? {
                    SourceEvent::EndOfStream => {
                        debug!("file done after {} packets", reader.n_packets());
                        self.current = None;
                    }
                    event => return Ok(event),
                }
            }
        }
    }
}
