//! Reassembly of one logical response from inbound chunks.
//!
//! A response starts with a 4-byte header announcing the payload length.
//! Payloads of up to [`MAX_CHUNK_PAYLOAD`] bytes complete in the first stage,
//! possibly split over several chunks. Longer payloads continue in raw,
//! headerless chunks that are appended in arrival order until the announced
//! length is covered.

use crate::error::{Error, ResponseStage};
use crate::protocol::{MAX_CHUNK_PAYLOAD, RESPONSE_HEADER_SIZE, ResponseHeader, parse_header};
use crate::settings::Timing;
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub enum AssemblyState {
    /// Collecting the header and the first chunk's worth of payload.
    Pending {
        buffer: BytesMut,
        header: Option<ResponseHeader>,
    },
    /// Large payload: `remaining` bytes are still owed by continuation chunks.
    Completing {
        declared: usize,
        payload: BytesMut,
        remaining: usize,
    },
    Complete(Bytes),
}

/// Step-wise response assembler. Feed it chunks with [`push`](Self::push).
#[derive(Debug)]
pub struct ResponseAssembler {
    state: AssemblyState,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblyState::Pending {
                buffer: BytesMut::with_capacity(RESPONSE_HEADER_SIZE + MAX_CHUNK_PAYLOAD),
                header: None,
            },
        }
    }

    pub fn state(&self) -> &AssemblyState {
        &self.state
    }

    pub fn header(&self) -> Option<ResponseHeader> {
        match &self.state {
            AssemblyState::Pending { header, .. } => *header,
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, AssemblyState::Pending { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, AssemblyState::Complete(_))
    }

    /// Bytes still owed by continuation chunks, if in the continuation stage.
    pub fn remaining(&self) -> Option<usize> {
        match &self.state {
            AssemblyState::Completing { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }

    /// Appends one inbound chunk and advances the state machine.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), Error> {
        let next = match &mut self.state {
            AssemblyState::Pending { buffer, header } => {
                buffer.extend_from_slice(chunk);
                if header.is_none() && buffer.len() >= RESPONSE_HEADER_SIZE {
                    let parsed = parse_header(&buffer[..])?;
                    debug!(declared_length = parsed.declared_length, "Response header received");
                    *header = Some(parsed);
                }
                let Some(header) = *header else {
                    return Ok(());
                };

                let declared = header.declared_length as usize;
                if buffer.len() < RESPONSE_HEADER_SIZE + declared.min(MAX_CHUNK_PAYLOAD) {
                    return Ok(());
                }

                let mut payload = buffer.split_off(RESPONSE_HEADER_SIZE);
                let remaining = if header.is_large() {
                    declared.saturating_sub(payload.len())
                } else {
                    0
                };
                if remaining == 0 {
                    payload.truncate(declared);
                    AssemblyState::Complete(payload.freeze())
                } else {
                    debug!(declared, remaining, "Large response, awaiting continuation chunks");
                    AssemblyState::Completing {
                        declared,
                        payload,
                        remaining,
                    }
                }
            }
            AssemblyState::Completing {
                declared,
                payload,
                remaining,
            } => {
                payload.extend_from_slice(chunk);
                *remaining = remaining.saturating_sub(chunk.len());
                trace!(received = chunk.len(), remaining = *remaining, "Continuation chunk");
                if *remaining > 0 {
                    return Ok(());
                }
                let mut payload = std::mem::take(payload);
                payload.truncate(*declared);
                AssemblyState::Complete(payload.freeze())
            }
            AssemblyState::Complete(_) => {
                return Err(Error::Protocol("chunk received after response completed".to_string()));
            }
        };
        self.state = next;
        Ok(())
    }

    /// Yields the payload, or the error matching where the response stopped.
    pub fn finish(self) -> Result<Bytes, Error> {
        match self.state {
            AssemblyState::Complete(payload) => Ok(payload),
            AssemblyState::Pending { buffer, header: None } => Err(Error::TruncatedHeader {
                received: buffer.len(),
            }),
            AssemblyState::Pending { buffer, .. } => Err(Error::StreamClosed {
                stage: ResponseStage::FirstChunk,
                received: buffer.len() - RESPONSE_HEADER_SIZE,
            }),
            AssemblyState::Completing { payload, .. } => Err(Error::StreamClosed {
                stage: ResponseStage::Continuation,
                received: payload.len(),
            }),
        }
    }
}

/// Reads one complete response from `transport`.
///
/// The exclusive borrow of the transport is the subscription to its inbound
/// stream; it is released on completion, timeout or error alike. A timeout
/// abandons the response and returns no partial payload.
pub async fn assemble<T: Transport>(transport: &mut T, timing: &Timing) -> Result<Bytes, Error> {
    let mut assembler = ResponseAssembler::new();

    let first_stage = async {
        while assembler.is_pending() {
            match transport.next_chunk().await? {
                Some(chunk) => assembler.push(&chunk)?,
                None => break,
            }
        }
        Ok::<_, Error>(())
    };
    match timeout(timing.first_chunk_timeout, first_stage).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(timeout = ?timing.first_chunk_timeout, "Timeout waiting for response");
            return Err(Error::ResponseTimeout {
                stage: ResponseStage::FirstChunk,
            });
        }
    }

    while assembler.remaining().is_some() {
        let chunk = timeout(timing.continuation_timeout, transport.next_chunk())
            .await
            .map_err(|_| {
                warn!(timeout = ?timing.continuation_timeout, "Timeout waiting for additional data");
                Error::ResponseTimeout {
                    stage: ResponseStage::Continuation,
                }
            })??;
        match chunk {
            Some(chunk) => assembler.push(&chunk)?,
            None => break,
        }
    }

    assembler.finish()
}
