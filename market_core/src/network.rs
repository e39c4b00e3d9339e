//! Line-oriented TCP control channel: one command per line, one reply per line.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::shutdown::ShutdownSignal;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(200);

/// One received line and the channel its reply goes back on.
#[derive(Debug)]
pub struct ControlRequest {
    pub line: String,
    pub reply: Sender<String>,
}

pub struct ControlListener {
    local_addr: SocketAddr,
    requests: Receiver<ControlRequest>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ControlListener {
    /// Binds `bind_addr` and accepts clients until `shutdown` fires.
    pub fn bind(bind_addr: SocketAddr, shutdown: Arc<ShutdownSignal>) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (sender, requests) = unbounded::<ControlRequest>();
        let accept_thread = thread::Builder::new()
            .name("control-accept".to_string())
            .spawn(move || accept_loop(listener, sender, &shutdown))?;

        info!(target: "power_market::control", %local_addr, "control_listener.bound");
        Ok(Self {
            local_addr,
            requests,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn requests(&self) -> &Receiver<ControlRequest> {
        &self.requests
    }

    /// Waits for the accept loop; returns at once unless shutdown was triggered.
    pub fn join(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                warn!(target: "power_market::control", "control_listener.panicked");
            }
        }
    }
}

fn accept_loop(listener: TcpListener, sender: Sender<ControlRequest>, shutdown: &ShutdownSignal) {
    while !shutdown.is_triggered() {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(target: "power_market::control", %addr, "control_client.connected");
                let sender = sender.clone();
                let spawned = thread::Builder::new()
                    .name(format!("control-{addr}"))
                    .spawn(move || handle_client(stream, sender));
                if let Err(err) = spawned {
                    warn!(target: "power_market::control", %addr, error = %err, "control_client.spawn_failed");
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                warn!(target: "power_market::control", error = %err, "control_listener.accept_failed");
                thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
    info!(target: "power_market::control", "control_listener.stopped");
}

fn handle_client(stream: TcpStream, sender: Sender<ControlRequest>) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(target: "power_market::control", error = %err, "control_client.blocking_failed");
        return;
    }
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(target: "power_market::control", error = %err, "control_client.clone_failed");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let (reply_tx, reply_rx) = bounded(1);
                let request = ControlRequest {
                    line: line.trim().to_string(),
                    reply: reply_tx,
                };
                if sender.send(request).is_err() {
                    break;
                }
                let Ok(reply) = reply_rx.recv() else {
                    break;
                };
                if let Err(err) = writeln!(writer, "{reply}").and_then(|()| writer.flush()) {
                    warn!(target: "power_market::control", error = %err, "control_client.write_failed");
                    break;
                }
            }
            Err(err) => {
                warn!(target: "power_market::control", error = %err, "control_client.read_failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn round_trips_lines_over_tcp() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let listener = ControlListener::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            Arc::clone(&shutdown),
        )
        .expect("bind");

        let addr = listener.local_addr();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).expect("connect");
            stream.write_all(b"report\nbogus\n").expect("write");
            let mut reader = BufReader::new(stream);
            let mut replies = Vec::new();
            for _ in 0..2 {
                let mut reply = String::new();
                reader.read_line(&mut reply).expect("read");
                replies.push(reply.trim_end().to_string());
            }
            replies
        });

        for expected in ["report", "bogus"] {
            let request = listener
                .requests()
                .recv_timeout(Duration::from_secs(5))
                .expect("request");
            assert_eq!(request.line, expected);
            request
                .reply
                .send(format!("ack {expected}"))
                .expect("reply");
        }

        assert_eq!(
            client.join().expect("client thread"),
            vec!["ack report".to_string(), "ack bogus".to_string()]
        );
        shutdown.trigger();
        listener.join();
    }
}
