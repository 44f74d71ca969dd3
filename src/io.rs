//! Uniform byte I/O over plain and TLS-wrapped sockets.
//!
//! Transient failures (would-block, interrupted) are absorbed here and returned
//! as [`IoOutcome::WouldBlock`] without touching the connection's error flag;
//! everything else becomes an [`crate::error::Error`] that the caller latches.

use std::io::{IoSlice, Read, Write};

use mio::net::TcpStream as MioTcpStream;

use crate::error::{Error, Result};

#[cfg(feature = "tls")]
use openssl::ssl::SslStream;

/// Result of a single read/write/writev call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// `n` bytes transferred. `0` on read means the peer closed cleanly.
    Done(usize),
    /// Nothing transferred; try again later.
    WouldBlock,
}

/// The underlying byte transport for a [`crate::connection::Connection`].
pub enum Transport {
    Plain(MioTcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<SslStream<MioTcpStream>>),
}

impl Transport {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<IoOutcome> {
        let result = match self {
            Transport::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.read(buf),
        };
        classify(result)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<IoOutcome> {
        let result = match self {
            Transport::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => s.write(buf),
        };
        classify(result)
    }

    /// Scatter-send `vecs` starting at logical offset `skip`.
    ///
    /// For a plain socket this issues a single `writev`. TLS has no vectored
    /// write, so it is emulated with sequential writes that stop at the first
    /// short write or would-block (, §9 "vector-write skip semantics").
    pub fn writev(&mut self, vecs: &[&[u8]], skip: usize) -> Result<IoOutcome> {
        let (start, offset) = locate_start(vecs, skip)?;
        if start == vecs.len() {
            return Ok(IoOutcome::Done(0));
        }

        match self {
            Transport::Plain(s) => {
                let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(vecs.len() - start);
                slices.push(IoSlice::new(&vecs[start][offset..]));
                for v in &vecs[start + 1..] {
                    slices.push(IoSlice::new(v));
                }
                classify(s.write_vectored(&slices))
            }
            #[cfg(feature = "tls")]
            Transport::Tls(s) => {
                let mut total = 0usize;
                let first = &vecs[start][offset..];
                match write_chunk(s.as_mut(), first)? {
                    IoOutcome::Done(n) => {
                        total += n;
                        if n < first.len() {
                            return Ok(IoOutcome::Done(total));
                        }
                    }
                    IoOutcome::WouldBlock => {
                        return if total == 0 { Ok(IoOutcome::WouldBlock) } else { Ok(IoOutcome::Done(total)) };
                    }
                }
                for v in &vecs[start + 1..] {
                    match write_chunk(s.as_mut(), v)? {
                        IoOutcome::Done(n) => {
                            total += n;
                            if n < v.len() {
                                break;
                            }
                        }
                        IoOutcome::WouldBlock => break,
                    }
                }
                Ok(IoOutcome::Done(total))
            }
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            Transport::Plain(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(feature = "tls")]
            Transport::Tls(s) => {
                let _ = s.shutdown();
            }
        }
    }
}

#[cfg(feature = "tls")]
fn write_chunk<W: Write>(w: &mut W, buf: &[u8]) -> Result<IoOutcome> {
    classify(w.write(buf))
}

fn classify(result: std::io::Result<usize>) -> Result<IoOutcome> {
    match result {
        Ok(n) => Ok(IoOutcome::Done(n)),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::Interrupted => {
            Ok(IoOutcome::WouldBlock)
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// Find the vector index and in-vector offset corresponding to logical
/// offset `skip` within the concatenation of `vecs` (`writev`).
fn locate_start(vecs: &[&[u8]], skip: usize) -> Result<(usize, usize)> {
    let mut remaining = skip;
    for (idx, v) in vecs.iter().enumerate() {
        if remaining < v.len() {
            return Ok((idx, remaining));
        }
        remaining -= v.len();
    }
    if remaining == 0 {
        Ok((vecs.len(), 0))
    } else {
        Err(Error::other("writev skip exceeds total vector length"))
    }
}
