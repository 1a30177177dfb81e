//! All-peer byte exchange: the collective barrier of one transfer phase.
//!
//! Every rank announces to every other rank how many bytes it will send
//! (zero included), then ships the payloads. [`post`] hands everything
//! outgoing to the transport and returns at once; [`PendingExchange::complete`]
//! returns only after all announced messages have arrived, so nothing is
//! processed mid-phase. Every send/receive handle is drained before
//! returning, even on error.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::WireLen;
use crate::ddd_error::{CommError, DddError};
use std::collections::HashMap;

/// One outgoing message.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub dest: usize,
    pub bytes: Vec<u8>,
}

/// One received message.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub from: usize,
    pub bytes: Vec<u8>,
}

/// An exchange whose sends are in flight.
pub struct PendingExchange<'a, C: Communicator> {
    comm: &'a C,
    data_tag: u16,
    size_recvs: Vec<(usize, C::RecvHandle)>,
    pending_sends: Vec<C::SendHandle>,
}

/// Post `outbox` to all peers using tags `tag` (sizes) and `tag + 1` (payloads).
///
/// Messages are handed to the transport in the order given; callers sort them
/// beforehand if they care. At most one message per destination is allowed.
pub fn post<'a, C: Communicator>(
    comm: &'a C,
    tag: CommTag,
    outbox: Vec<Outgoing>,
) -> Result<PendingExchange<'a, C>, DddError> {
    let me = comm.rank();
    let n = comm.size();
    let mut pending = PendingExchange {
        comm,
        data_tag: tag.offset(1).as_u16(),
        size_recvs: Vec::new(),
        pending_sends: Vec::new(),
    };
    if comm.is_no_comm() || n <= 1 {
        return Ok(pending);
    }

    let mut out_len: HashMap<usize, usize> = HashMap::new();
    for m in &outbox {
        if m.dest >= n || m.dest == me {
            return Err(DddError::InvalidRank { rank: m.dest, size: n });
        }
        if out_len.insert(m.dest, m.bytes.len()).is_some() {
            return Err(DddError::InvariantViolation(format!(
                "two messages for rank {} in one phase",
                m.dest
            )));
        }
    }

    // --- Stage 1: announce sizes ---------------------------------------------
    for peer in (0..n).filter(|&r| r != me) {
        let mut len = WireLen::new(0);
        let h = comm.irecv(peer, tag.as_u16(), bytemuck::bytes_of_mut(&mut len));
        pending.size_recvs.push((peer, h));
    }
    for peer in (0..n).filter(|&r| r != me) {
        let len = WireLen::new(out_len.get(&peer).copied().unwrap_or(0));
        pending
            .pending_sends
            .push(comm.isend(peer, tag.as_u16(), bytemuck::bytes_of(&len)));
    }

    // --- Stage 2 (send side): payloads ----------------------------------------
    for m in outbox {
        if m.bytes.is_empty() {
            continue;
        }
        log::trace!("rank {me}: sending {} bytes to {}", m.bytes.len(), m.dest);
        pending
            .pending_sends
            .push(comm.isend(m.dest, pending.data_tag, &m.bytes));
    }
    Ok(pending)
}

impl<C: Communicator> PendingExchange<'_, C> {
    /// Wait for all announced messages. Returns the non-empty incoming
    /// messages sorted by source rank.
    pub fn complete(self) -> Result<Vec<Incoming>, DddError> {
        let PendingExchange {
            comm,
            data_tag,
            size_recvs,
            pending_sends,
        } = self;
        let mut maybe_err: Option<DddError> = None;

        let mut sizes_in: Vec<(usize, usize)> = Vec::with_capacity(size_recvs.len());
        for (peer, h) in size_recvs {
            match h.wait() {
                Some(data) if data.len() == std::mem::size_of::<WireLen>() => {
                    let len: WireLen = bytemuck::pod_read_unaligned(&data);
                    sizes_in.push((peer, len.get()));
                }
                Some(data) => {
                    maybe_err.get_or_insert_with(|| DddError::CommError {
                        neighbor: peer,
                        source: Box::new(CommError(format!(
                            "expected {} bytes for size from {}, got {}",
                            std::mem::size_of::<WireLen>(),
                            peer,
                            data.len()
                        ))),
                    });
                }
                None => {
                    maybe_err.get_or_insert_with(|| DddError::CommError {
                        neighbor: peer,
                        source: Box::new(CommError(format!("failed to recv size from {peer}"))),
                    });
                }
            }
        }

        // --- Stage 2 (receive side) -------------------------------------------
        let mut data_recvs: Vec<(usize, usize, C::RecvHandle)> = Vec::new();
        for (peer, len) in sizes_in {
            if len == 0 {
                continue;
            }
            let mut buffer = vec![0u8; len];
            let h = comm.irecv(peer, data_tag, &mut buffer);
            data_recvs.push((peer, len, h));
        }
        let mut inbox = Vec::with_capacity(data_recvs.len());
        for (peer, len, h) in data_recvs {
            match h.wait() {
                Some(raw) if raw.len() == len => inbox.push(Incoming {
                    from: peer,
                    bytes: raw,
                }),
                Some(raw) => {
                    maybe_err.get_or_insert_with(|| DddError::CommError {
                        neighbor: peer,
                        source: Box::new(CommError(format!(
                            "expected {len} bytes from {peer}, got {}",
                            raw.len()
                        ))),
                    });
                }
                None => {
                    maybe_err.get_or_insert_with(|| DddError::CommError {
                        neighbor: peer,
                        source: Box::new(CommError(format!("failed to recv payload from {peer}"))),
                    });
                }
            }
        }

        // always drain all sends
        for send in pending_sends {
            let _ = send.wait();
        }

        if let Some(err) = maybe_err {
            return Err(err);
        }
        inbox.sort_by_key(|m| m.from);
        Ok(inbox)
    }
}

/// [`post`] followed by [`PendingExchange::complete`].
pub fn exchange<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outbox: Vec<Outgoing>,
) -> Result<Vec<Incoming>, DddError> {
    post(comm, tag, outbox)?.complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn serial_exchange_is_empty() {
        let got = exchange(&NoComm, CommTag::new(1), Vec::new()).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn three_ranks_ring() {
        let world = LocalComm::world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank();
                    let next = (me + 1) % 3;
                    let out = vec![Outgoing {
                        dest: next,
                        bytes: vec![me as u8; me + 1],
                    }];
                    exchange(&comm, CommTag::new(0x40), out).unwrap()
                })
            })
            .collect();
        for (rank, h) in handles.into_iter().enumerate() {
            let inbox = h.join().unwrap();
            let prev = (rank + 2) % 3;
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].from, prev);
            assert_eq!(inbox[0].bytes, vec![prev as u8; prev + 1]);
        }
    }

    #[test]
    fn self_destination_rejected() {
        let world = LocalComm::world(2);
        let out = vec![Outgoing {
            dest: 0,
            bytes: vec![1],
        }];
        assert!(matches!(
            exchange(&world[0], CommTag::new(2), out),
            Err(DddError::InvalidRank { rank: 0, size: 2 })
        ));
    }
}
