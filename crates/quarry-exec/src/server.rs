//! TCP listener serving the executor protocol.
//!
//! One thread per connection. A connection handles control requests until the
//! peer hangs up, unless it opens a data stream: after `OpenStream` is
//! acknowledged the socket belongs to the executor's egress slot and the
//! connection thread exits.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::{ExecError, RpcError};
use crate::executor::Executor;
use crate::rpc::{self, Request, Response};

pub struct ExecutorServer {
    listener: TcpListener,
}

impl ExecutorServer {
    /// Bind to `addr`. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub fn bind(addr: &str) -> Result<Self, ExecError> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ExecError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve on the calling thread until the process exits.
    pub fn serve(self, executor: Arc<Executor>) -> Result<(), ExecError> {
        let stop = Arc::new(AtomicBool::new(false));
        accept_loop(self.listener, executor, stop);
        Ok(())
    }

    /// Serve on a background thread.
    pub fn spawn(self, executor: Arc<Executor>) -> Result<ServerHandle, ExecError> {
        let addr = self.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let executor = Arc::clone(&executor);
            thread::Builder::new()
                .name(format!("quarry-server-{}", executor.location().name))
                .spawn(move || accept_loop(self.listener, executor, stop))?
        };
        Ok(ServerHandle {
            addr,
            stop,
            thread: Some(thread),
            executor,
        })
    }
}

pub struct ServerHandle {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    executor: Arc<Executor>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Stop accepting connections and join the accept thread. Connections
    /// already being served finish on their own.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop_and_join();
        }
    }
}

fn accept_loop(listener: TcpListener, executor: Arc<Executor>, stop: Arc<AtomicBool>) {
    info!(
        executor = %executor.location().name,
        addr = ?listener.local_addr().ok(),
        "executor listening"
    );
    for conn in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match conn {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let executor = Arc::clone(&executor);
        let spawned = thread::Builder::new()
            .name("quarry-conn".into())
            .spawn(move || {
                if let Err(e) = handle_connection(&executor, stream) {
                    debug!(error = %e, "connection ended with error");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn connection thread");
        }
    }
    debug!(executor = %executor.location().name, "accept loop stopped");
}

fn handle_connection(executor: &Executor, mut stream: TcpStream) -> Result<(), RpcError> {
    stream.set_nodelay(true)?;
    loop {
        let request: Request = match rpc::read_message(&mut stream) {
            Ok(r) => r,
            Err(RpcError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!(executor = %executor.location().name, op = request.name(), "request");

        if let Request::OpenStream { task_id, reader } = request {
            let attached = stream
                .try_clone()
                .map_err(ExecError::from)
                .and_then(|s| executor.attach_egress(task_id, &reader, s));
            return match attached {
                Ok(()) => rpc::write_message(&mut stream, &Response::Ack),
                Err(e) => rpc::write_message(&mut stream, &error_response(e)),
            };
        }

        let response = handle_request(executor, request);
        rpc::write_message(&mut stream, &response)?;
    }
}

fn handle_request(executor: &Executor, request: Request) -> Response {
    let result = match request {
        Request::SendInstruction { instruction } => executor
            .send_instruction(&instruction)
            .map(|_| Response::Ack),
        Request::SetupWriters => executor.setup_writers().map(|_| Response::Ack),
        Request::SetupReaders => executor.setup_readers().map(|_| Response::Ack),
        Request::Run => executor.run().map(|_| Response::Ack),
        Request::Abort { task_id } => executor.abort(task_id).map(|_| Response::Ack),
        Request::Status => Ok(Response::Status(executor.status())),
        Request::FetchResults { task_id } => executor.fetch_results(task_id).and_then(|split| {
            let stream = rpc::encode_results(&split, executor.batch_rows())?;
            Ok(Response::Results { stream })
        }),
        Request::OpenStream { .. } => Err(ExecError::InvalidState {
            op: "open_stream",
            state: "control connection".into(),
        }),
    };
    result.unwrap_or_else(error_response)
}

fn error_response(e: ExecError) -> Response {
    warn!(error = %e, "request failed");
    Response::Error {
        message: e.to_string(),
    }
}
