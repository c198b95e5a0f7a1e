use std::{io, net::SocketAddr, time::Duration};

use log::{debug, info};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::{Builder, Runtime},
    time,
};

use super::{Communicator, ReduceOp, check_counts, count_mismatch};
use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};

const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// One end of a connection between the root and another rank.
struct Peer {
    rank: usize,
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
}

impl Peer {
    fn new(stream: TcpStream, rank: usize) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = crate::channel(rx, tx);
        Ok(Self { rank, rx, tx })
    }
}

enum Role {
    /// Rank 0, connected to every other rank and ordered by rank.
    Root { peers: Vec<Peer> },
    /// Any other rank, connected to the root only.
    Leaf { root: Peer },
}

/// A process group connected over TCP in a star rooted at rank 0.
///
/// The root folds every contribution in rank order and broadcasts the result, so all
/// ranks observe bit-identical values. Each collective blocks the calling thread on a
/// private single threaded runtime until the whole group has taken part.
pub struct TcpComm {
    rank: usize,
    size: usize,
    role: Role,
    scratch: Vec<u64>,
    rt: Runtime,
}

impl TcpComm {
    /// Binds `addr` and forms the group as its root.
    ///
    /// # Arguments
    /// * `addr` - The address the other ranks will connect to.
    /// * `size` - The amount of processes in the group, including the root.
    ///
    /// # Returns
    /// The root's communicator once every other rank has joined.
    pub fn bind(addr: SocketAddr, size: usize) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        Self::root(listener, size)
    }

    /// Forms the group as its root on an already bound listener.
    ///
    /// # Arguments
    /// * `listener` - A bound listener the other ranks will connect to.
    /// * `size` - The amount of processes in the group, including the root.
    ///
    /// # Returns
    /// The root's communicator once every other rank has joined.
    pub fn root(listener: std::net::TcpListener, size: usize) -> io::Result<Self> {
        if size < 2 {
            return Err(invalid_group(0, size));
        }

        let rt = runtime()?;
        listener.set_nonblocking(true)?;
        let peers = rt.block_on(accept_peers(listener, size))?;
        info!(size = size; "process group formed");

        Ok(Self {
            rank: 0,
            size,
            role: Role::Root { peers },
            scratch: Vec::new(),
            rt,
        })
    }

    /// Joins the group rooted at `root`.
    ///
    /// The connection is attempted a bounded amount of times to let the root start
    /// listening, any later failure is fatal.
    ///
    /// # Arguments
    /// * `root` - The root's listening address.
    /// * `rank` - This process' rank, in `[1, size)`.
    /// * `size` - The amount of processes in the group.
    ///
    /// # Returns
    /// This rank's communicator.
    pub fn join(root: SocketAddr, rank: usize, size: usize) -> io::Result<Self> {
        if rank == 0 || rank >= size {
            return Err(invalid_group(rank, size));
        }

        let rt = runtime()?;
        let peer = rt.block_on(async {
            let stream = connect(root).await?;
            let mut peer = Peer::new(stream, 0)?;
            peer.tx.send(&Msg::Control(Command::Join { rank, size })).await?;
            Ok::<_, io::Error>(peer)
        })?;
        info!(rank = rank, size = size; "joined process group at {root}");

        Ok(Self {
            rank,
            size,
            role: Role::Leaf { root: peer },
            scratch: Vec::new(),
            rt,
        })
    }
}

impl Communicator for TcpComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce(&mut self, buf: &mut [f64], op: ReduceOp) -> io::Result<()> {
        let Self {
            role, scratch, rt, ..
        } = self;

        rt.block_on(async {
            match role {
                Role::Root { peers } => {
                    for peer in peers.iter_mut() {
                        match peer.rx.recv_into::<Msg, _>(scratch).await? {
                            Msg::Data(Payload::Values(values)) if values.len() == buf.len() => {
                                op.fold(buf, values)
                            }
                            Msg::Data(Payload::Values(values)) => {
                                return count_mismatch(peer.rank, values.len(), buf.len());
                            }
                            other => return unexpected(peer.rank, &other, "data/values"),
                        }
                    }

                    let msg = Msg::Data(Payload::Values(&*buf));
                    for peer in peers.iter_mut() {
                        peer.tx.send(&msg).await?;
                    }
                }
                Role::Leaf { root } => {
                    root.tx.send(&Msg::Data(Payload::Values(&*buf))).await?;

                    match root.rx.recv_into::<Msg, _>(scratch).await? {
                        Msg::Data(Payload::Values(values)) if values.len() == buf.len() => {
                            buf.copy_from_slice(values)
                        }
                        Msg::Data(Payload::Values(values)) => {
                            return count_mismatch(0, values.len(), buf.len());
                        }
                        other => return unexpected(0, &other, "data/values"),
                    }
                }
            }

            Ok::<_, io::Error>(())
        })
    }

    fn all_gather(&mut self, local: &[u32], counts: &[usize]) -> io::Result<Vec<u32>> {
        check_counts(self.size, counts)?;

        let rank = self.rank;
        if counts[rank] != local.len() {
            return count_mismatch(rank, local.len(), counts[rank]);
        }

        let total = counts.iter().sum();
        let Self {
            role, scratch, rt, ..
        } = self;

        rt.block_on(async {
            match role {
                Role::Root { peers } => {
                    let mut out = Vec::with_capacity(total);
                    out.extend_from_slice(local);

                    for peer in peers.iter_mut() {
                        let expected = counts[peer.rank];

                        match peer.rx.recv_into::<Msg, _>(scratch).await? {
                            Msg::Data(Payload::Labels(labels)) if labels.len() == expected => {
                                out.extend_from_slice(labels)
                            }
                            Msg::Data(Payload::Labels(labels)) => {
                                return count_mismatch(peer.rank, labels.len(), expected);
                            }
                            other => return unexpected(peer.rank, &other, "data/labels"),
                        }
                    }

                    {
                        let msg = Msg::Data(Payload::Labels(&out));
                        for peer in peers.iter_mut() {
                            peer.tx.send(&msg).await?;
                        }
                    }

                    Ok::<_, io::Error>(out)
                }
                Role::Leaf { root } => {
                    root.tx.send(&Msg::Data(Payload::Labels(local))).await?;

                    match root.rx.recv_into::<Msg, _>(scratch).await? {
                        Msg::Data(Payload::Labels(labels)) if labels.len() == total => {
                            Ok(labels.to_vec())
                        }
                        Msg::Data(Payload::Labels(labels)) => count_mismatch(0, labels.len(), total),
                        other => unexpected(0, &other, "data/labels"),
                    }
                }
            }
        })
    }

    fn finalize(&mut self) -> io::Result<()> {
        let Self {
            rank,
            role,
            scratch,
            rt,
            ..
        } = self;

        rt.block_on(async {
            let bye = Msg::Control(Command::Disconnect);

            match role {
                Role::Root { peers } => {
                    for peer in peers.iter_mut() {
                        match peer.rx.recv_into::<Msg, _>(scratch).await? {
                            Msg::Control(Command::Disconnect) => {}
                            other => return unexpected(peer.rank, &other, "control/disconnect"),
                        }
                    }

                    for peer in peers.iter_mut() {
                        peer.tx.send(&bye).await?;
                    }
                }
                Role::Leaf { root } => {
                    root.tx.send(&bye).await?;

                    match root.rx.recv_into::<Msg, _>(scratch).await? {
                        Msg::Control(Command::Disconnect) => {}
                        other => return unexpected(0, &other, "control/disconnect"),
                    }
                }
            }

            Ok::<_, io::Error>(())
        })?;

        debug!(rank = *rank; "left process group");
        Ok(())
    }

    fn abort(&mut self, reason: &str) -> io::Result<()> {
        let Self { role, rt, .. } = self;
        let msg = Msg::Err(reason.into());

        rt.block_on(async {
            match role {
                Role::Root { peers } => {
                    // Every reachable peer is told, the first failure is reported.
                    let mut result = Ok(());
                    for peer in peers.iter_mut() {
                        let sent = peer.tx.send(&msg).await;
                        result = result.and(sent);
                    }

                    result
                }
                Role::Leaf { root } => root.tx.send(&msg).await,
            }
        })
    }
}

async fn accept_peers(listener: std::net::TcpListener, size: usize) -> io::Result<Vec<Peer>> {
    let listener = TcpListener::from_std(listener)?;
    let mut slots: Vec<Option<Peer>> = (1..size).map(|_| None).collect();

    for _ in 1..size {
        let (stream, addr) = listener.accept().await?;
        let mut peer = Peer::new(stream, 0)?;

        let (rank, group) = match peer.rx.recv::<Msg>().await? {
            Msg::Control(Command::Join { rank, size }) => (rank, size),
            other => return unexpected(0, &other, "control/join"),
        };

        if group != size || rank == 0 || rank >= size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{addr} tried to join as rank {rank} of {group}, the group has {size}"),
            ));
        }

        let slot = &mut slots[rank - 1];
        if slot.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("rank {rank} joined twice"),
            ));
        }

        debug!(rank = rank; "peer joined from {addr}");
        peer.rank = rank;
        *slot = Some(peer);
    }

    Ok(slots.into_iter().flatten().collect())
}

async fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!(attempt = attempt; "root at {addr} not reachable yet: {e}");
                attempt += 1;
                time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

fn invalid_group(rank: usize, size: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("rank {rank} is not valid in a tcp group of {size}"),
    )
}

fn unexpected<T>(rank: usize, got: &Msg<'_>, expected: &str) -> io::Result<T> {
    let detail = match got {
        Msg::Err(detail) => format!("rank {rank} failed: {detail}"),
        other => format!("expected {expected} from rank {rank}, got {}", other.kind()),
    };

    Err(io::Error::new(io::ErrorKind::InvalidData, detail))
}
