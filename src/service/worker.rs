// Per-connection state machine: read a packet, commit it, echo the whole store, repeat.
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use crate::core::assembler::PacketAssembler;
use crate::core::entry::Entry;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::EntryStore;
use crate::service::context::Context;
use crate::service::registry::{WorkerExit, WorkerSummary};

enum State {
    ReadingPacket,
    CommitAndEcho(Entry),
    Terminated(WorkerExit),
}

pub struct ConnectionWorker<S> {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    assembler: PacketAssembler,
    ctx: Arc<Context<S>>,
    chunk: Vec<u8>,
    packets: u64,
}

impl<S: EntryStore> ConnectionWorker<S> {
    /// Prepares a worker for an accepted connection.
    ///
    /// The stream must already carry read and write timeouts so the abort
    /// signal is observed while blocked on the peer.
    pub fn new(
        id: u64,
        peer: SocketAddr,
        stream: TcpStream,
        ctx: Arc<Context<S>>,
        max_packet_bytes: usize,
        recv_chunk: usize,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            assembler: PacketAssembler::with_limit(max_packet_bytes),
            ctx,
            chunk: vec![0u8; recv_chunk.max(1)],
            packets: 0,
        }
    }

    pub fn run(mut self) -> WorkerSummary {
        let span = tracing::info_span!("worker", id = self.id, peer = %self.peer);
        let _entered = span.enter();

        let mut state = State::ReadingPacket;
        let exit = loop {
            state = match state {
                State::ReadingPacket => self.read_packet(),
                State::CommitAndEcho(packet) => self.commit_and_echo(packet),
                State::Terminated(exit) => break exit,
            };
        };

        self.assembler.reset();
        let _ = self.stream.shutdown(Shutdown::Both);
        WorkerSummary {
            id: self.id,
            peer: self.peer,
            packets: self.packets,
            exit,
        }
    }

    fn read_packet(&mut self) -> State {
        match self.assembler.poll() {
            Ok(Some(packet)) => return State::CommitAndEcho(packet),
            Ok(None) => {}
            Err(err) => return State::Terminated(WorkerExit::Failed(err)),
        }
        loop {
            if self.ctx.abort().is_triggered() {
                return State::Terminated(WorkerExit::Aborted);
            }
            match self.stream.read(&mut self.chunk) {
                Ok(0) => {
                    if self.assembler.pending_len() > 0 {
                        tracing::debug!(
                            bytes = self.assembler.pending_len(),
                            "peer closed mid-packet; discarding partial input"
                        );
                    }
                    return State::Terminated(WorkerExit::PeerClosed);
                }
                Ok(n) => match self.assembler.feed(&self.chunk[..n]) {
                    Ok(Some(packet)) => return State::CommitAndEcho(packet),
                    Ok(None) => {}
                    Err(err) => return State::Terminated(WorkerExit::Failed(err)),
                },
                Err(err) if is_retryable(&err) => {}
                Err(err) => {
                    return State::Terminated(WorkerExit::Failed(Error::io(
                        err,
                        "failed to receive from peer",
                    )));
                }
            }
        }
    }

    fn commit_and_echo(&mut self, packet: Entry) -> State {
        // A received packet is committed and echoed even if abort arrives while waiting.
        let committed = match self.ctx.commit(packet.clone()) {
            Err(err) if err.kind() == ErrorKind::Interrupted => self.ctx.commit_blocking(packet),
            other => other,
        };
        if let Err(err) = committed {
            return State::Terminated(exit_for(err));
        }
        self.packets += 1;

        let snapshot = match self.ctx.snapshot() {
            Err(err) if err.kind() == ErrorKind::Interrupted => self.ctx.snapshot_blocking(),
            other => other,
        };
        let contents = match snapshot {
            Ok(contents) => contents,
            Err(err) => return State::Terminated(exit_for(err)),
        };
        match self.send_all(&contents) {
            Ok(()) => State::ReadingPacket,
            Err(err) => State::Terminated(exit_for(err)),
        }
    }

    // Like `write_all`, but timeouts only give up once the abort signal is raised.
    fn send_all(&mut self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            match self.stream.write(data) {
                Ok(0) => {
                    return Err(Error::new(ErrorKind::Io).with_message("peer accepted zero bytes"));
                }
                Ok(n) => data = &data[n..],
                Err(err) if is_retryable(&err) => {
                    if self.ctx.abort().is_triggered() {
                        return Err(Error::interrupted());
                    }
                }
                Err(err) => return Err(Error::io(err, "failed to send to peer")),
            }
        }
        Ok(())
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn exit_for(err: Error) -> WorkerExit {
    if err.kind() == ErrorKind::Interrupted {
        WorkerExit::Aborted
    } else {
        WorkerExit::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionWorker;
    use crate::core::abort::AbortSignal;
    use crate::core::ring::RingStore;
    use crate::service::context::Context;
    use crate::service::registry::WorkerExit;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pair() -> (TcpStream, TcpStream, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (server, peer) = listener.accept().expect("accept");
        server
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("timeout");
        server
            .set_write_timeout(Some(Duration::from_millis(20)))
            .expect("timeout");
        (client, server, peer)
    }

    fn read_exact_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).expect("read echo");
        buf
    }

    #[test]
    fn echoes_store_after_each_packet_then_closes() {
        let (mut client, server, peer) = pair();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            AbortSignal::new(),
            Duration::from_millis(20),
        ));
        let worker = ConnectionWorker::new(1, peer, server, ctx.clone(), 1024, 8);
        let handle = thread::spawn(move || worker.run());

        client.write_all(b"hel").expect("write");
        client.write_all(b"lo\nwor").expect("write");
        assert_eq!(read_exact_len(&mut client, 6), b"hello\n");
        client.write_all(b"ld\n").expect("write");
        assert_eq!(read_exact_len(&mut client, 12), b"hello\nworld\n");

        client.shutdown(Shutdown::Write).expect("shutdown");
        let summary = handle.join().expect("join");
        assert_eq!(summary.packets, 2);
        assert!(matches!(summary.exit, WorkerExit::PeerClosed));
    }

    #[test]
    fn two_packets_in_one_chunk_are_both_committed() {
        let (mut client, server, peer) = pair();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            AbortSignal::new(),
            Duration::from_millis(20),
        ));
        let worker = ConnectionWorker::new(1, peer, server, ctx.clone(), 1024, 64);
        let handle = thread::spawn(move || worker.run());

        client.write_all(b"a\nb\n").expect("write");
        // First echo holds "a\n"; the second holds both packets.
        assert_eq!(read_exact_len(&mut client, 2 + 4), b"a\na\nb\n");
        client.shutdown(Shutdown::Write).expect("shutdown");
        assert_eq!(handle.join().expect("join").packets, 2);
    }

    #[test]
    fn abort_stops_idle_worker() {
        let (_client, server, peer) = pair();
        let abort = AbortSignal::new();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            abort.clone(),
            Duration::from_millis(20),
        ));
        let worker = ConnectionWorker::new(7, peer, server, ctx, 1024, 64);
        let handle = thread::spawn(move || worker.run());

        thread::sleep(Duration::from_millis(50));
        abort.trigger();
        let summary = handle.join().expect("join");
        assert_eq!(summary.id, 7);
        assert!(matches!(summary.exit, WorkerExit::Aborted));
    }

    #[test]
    fn received_packet_is_committed_despite_abort_during_contention() {
        let (mut client, server, peer) = pair();
        let abort = AbortSignal::new();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            abort.clone(),
            Duration::from_millis(20),
        ));
        let held = ctx.hold_store();
        let worker = ConnectionWorker::new(3, peer, server, ctx.clone(), 1024, 64);
        let handle = thread::spawn(move || worker.run());

        client.write_all(b"kept\n").expect("write");
        thread::sleep(Duration::from_millis(60));
        abort.trigger();
        thread::sleep(Duration::from_millis(60));
        drop(held);

        assert_eq!(read_exact_len(&mut client, 5), b"kept\n");
        let summary = handle.join().expect("join");
        assert_eq!(summary.packets, 1);
        assert!(matches!(summary.exit, WorkerExit::Aborted));
        assert_eq!(ctx.snapshot_blocking().expect("snapshot").as_ref(), b"kept\n");
    }

    #[test]
    fn oversized_packet_with_delimiter_is_not_committed() {
        let (mut client, server, peer) = pair();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            AbortSignal::new(),
            Duration::from_millis(20),
        ));
        let worker = ConnectionWorker::new(1, peer, server, ctx.clone(), 8, 1024);
        let handle = thread::spawn(move || worker.run());

        let mut packet = vec![b'x'; 256];
        packet.push(b'\n');
        client.write_all(&packet).expect("write");
        let summary = handle.join().expect("join");
        assert!(matches!(summary.exit, WorkerExit::Failed(_)));
        assert_eq!(summary.packets, 0);
        assert!(ctx.snapshot().expect("snapshot").is_empty());
    }

    #[test]
    fn oversized_packet_terminates_only_that_connection() {
        let (mut client, server, peer) = pair();
        let ctx = Arc::new(Context::new(
            RingStore::new(4).expect("ring"),
            AbortSignal::new(),
            Duration::from_millis(20),
        ));
        let worker = ConnectionWorker::new(1, peer, server, ctx.clone(), 8, 64);
        let handle = thread::spawn(move || worker.run());

        client.write_all(b"way too long for the limit").expect("write");
        let summary = handle.join().expect("join");
        assert!(matches!(summary.exit, WorkerExit::Failed(_)));
        assert!(ctx.snapshot().expect("snapshot").is_empty());
    }
}
