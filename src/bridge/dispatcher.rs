use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::time::timeout;

use crate::bridge::params::{self, MAX_TRANSFER};
use crate::bridge::socket::BridgeSocket;
use crate::config::BridgeConfig;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::net::Network;
use crate::protocol::{CommandFrame, ErrorCode, Opcode, ResponseFrame};
use crate::registry::{Registry, Responder};
use crate::serial::{SerialReader, SerialWriter};
use crate::settings::{self, SharedSettings, VariableError};

/// What a handler produced. `None` means the handler wrote its own output.
type HandlerResult = Result<Option<ResponseFrame>, ErrorCode>;

/// Runs one handler per command frame and writes its response.
///
/// Owns the bridge socket and the debug channel; both are only touched from
/// the serial task.
pub struct Dispatcher<N, D> {
    network: N,
    socket: BridgeSocket,
    registry: Registry,
    settings: SharedSettings,
    serial: SerialWriter,
    debug: SerialReader<D>,
    connect_timeout: Duration,
    recv_timeout: Duration,
    reply_timeout: Option<Duration>,
}

impl<N, D> Dispatcher<N, D>
where
    N: Network,
    D: AsyncRead + Unpin,
{
    pub fn new(
        network: N,
        registry: Registry,
        settings: SharedSettings,
        serial: SerialWriter,
        debug: D,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            network,
            socket: BridgeSocket::new(),
            registry,
            settings,
            serial,
            debug: SerialReader::new(debug),
            connect_timeout: config.connect_timeout(),
            recv_timeout: config.recv_timeout(),
            reply_timeout: config.reply_timeout(),
        }
    }

    pub fn socket(&self) -> &BridgeSocket {
        &self.socket
    }

    /// Handles `frame` and queues its response.
    ///
    /// `input` is the controller channel; `send` takes its payload from it.
    /// Only a stopped serial writer is an error here; protocol failures are
    /// reported to the controller as `E` frames.
    pub async fn dispatch<R>(&mut self, frame: CommandFrame, input: &mut SerialReader<R>) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let op = frame.op();
        let params = frame.params.as_str();
        tracing::debug!(opcode = ?op, params, "Dispatching command");

        let result = match op {
            Some(Opcode::Join) => self.join(params).await,
            Some(Opcode::Check) => self.get(params).await,
            Some(Opcode::Set) => self.set(params).await,
            Some(Opcode::Poll) => self.poll(params).await,
            Some(Opcode::Send) => self.send(params, input).await,
            Some(Opcode::Recv) => self.recv(params).await,
            Some(Opcode::Close) => self.close(),
            Some(Opcode::Listen) => self.listen(params).await,
            Some(Opcode::Arg) => self.arg(params).await,
            Some(Opcode::Reply) => self.reply(params).await,
            Some(Opcode::Connect) => self.connect(params).await,
            Some(
                Opcode::Path
                | Opcode::ApScan
                | Opcode::ApGet
                | Opcode::FileInfo
                | Opcode::FileCount
                | Opcode::FileRun
                | Opcode::Udp,
            ) => Err(ErrorCode::Unimplemented),
            None => {
                tracing::trace!(opcode = frame.opcode, "Ignoring unrecognized opcode");
                Ok(Some(ResponseFrame::ok()))
            }
        };

        match result {
            Ok(Some(response)) => self.serial.send_frame(&response).await,
            Ok(None) => Ok(()),
            Err(code) => {
                tracing::debug!(opcode = ?op, ?code, "Command failed");
                self.serial.send_frame(&code.into()).await
            }
        }
    }

    /// Forwards controller bytes outside any frame to the bridge socket.
    ///
    /// Dropped silently when no socket is open.
    pub async fn forward_passthrough(&mut self, data: Bytes) {
        if !self.socket.is_open() {
            tracing::trace!(len = data.len(), "Passthrough dropped, no open socket");
            return;
        }
        if let Err(code) = self.socket.write_all(&data).await {
            tracing::warn!(?code, len = data.len(), "Passthrough write failed");
        }
    }

    async fn join(&mut self, params: &str) -> HandlerResult {
        let (ssid, password) = params::split_pair(params, ErrorCode::InvalidArgument)?;

        self.settings.write().await.wifi_ssid = ssid.to_string();
        self.network.join(ssid, password).await.map_err(|e| {
            tracing::error!(ssid, error = %e, "Join failed");
            ErrorCode::InternalError
        })?;

        if let Some(ip) = self.network.local_ipv4() {
            self.settings.write().await.station_ipaddr = ip;
        }
        Ok(Some(ResponseFrame::ok()))
    }

    async fn get(&mut self, params: &str) -> HandlerResult {
        let settings = self.settings.read().await;
        let value = settings::get_variable(&settings, params).map_err(variable_error)?;
        Ok(Some(ResponseFrame::Text(value)))
    }

    async fn set(&mut self, params: &str) -> HandlerResult {
        let (name, value) = params::split_pair(params, ErrorCode::WrongArgumentCount)?;
        let mut settings = self.settings.write().await;
        settings::set_variable(&mut settings, name, value).map_err(variable_error)?;
        Ok(Some(ResponseFrame::ok()))
    }

    async fn poll(&mut self, params: &str) -> HandlerResult {
        let filter = params.trim();
        let filter = if filter.is_empty() {
            0
        } else {
            filter.parse::<u32>().map_err(|_| ErrorCode::InvalidArgument)?
        };

        for notice in self.registry.poll(filter).await {
            self.queue(&notice).await?;
        }
        Ok(None)
    }

    async fn send<R>(&mut self, params: &str, input: &mut SerialReader<R>) -> HandlerResult
    where
        R: AsyncRead + Unpin,
    {
        let (_, len) = params::split_pair(params, ErrorCode::WrongArgumentCount)?;
        let len = params::transfer_len(len)?;
        if !self.socket.is_open() {
            return Err(ErrorCode::InvalidState);
        }

        let payload = input.read_exact_bytes(len).await.map_err(|e| {
            tracing::error!(len, error = %e, "Payload read failed");
            ErrorCode::InternalError
        })?;
        self.socket.write_all(&payload).await?;

        tracing::debug!(len, "Payload sent");
        Ok(Some(ResponseFrame::ok()))
    }

    async fn recv(&mut self, params: &str) -> HandlerResult {
        let (_, len) = params::split_pair(params, ErrorCode::WrongArgumentCount)?;
        let len = params::transfer_len(len)?;

        let data = self.socket.read_some(len, self.recv_timeout).await?;

        self.queue(&ResponseFrame::Success(data.len() as i32)).await?;
        self.serial.send(data).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to queue received data");
            ErrorCode::InternalError
        })?;
        Ok(None)
    }

    fn close(&mut self) -> HandlerResult {
        if self.socket.close() {
            Ok(Some(ResponseFrame::ok()))
        } else {
            Err(ErrorCode::InvalidState)
        }
    }

    async fn connect(&mut self, params: &str) -> HandlerResult {
        let (host, port) = params::split_pair(params, ErrorCode::WrongArgumentCount)?;
        let host = host.trim();
        let port = params::port(port)?;

        let addr = match host.parse::<Ipv4Addr>() {
            Ok(ip) => SocketAddr::from((ip, port)),
            Err(_) => self.network.resolve(host, port).await.map_err(|e| {
                tracing::warn!(host, error = %e, "Lookup failed");
                ErrorCode::LookupFailed
            })?,
        };

        self.socket
            .connect(addr, self.connect_timeout)
            .await
            .map_err(|e| {
                tracing::warn!(%addr, error = %e, "Connect failed");
                ErrorCode::ConnectFailed
            })?;

        Ok(Some(ResponseFrame::ok()))
    }

    async fn listen(&mut self, params: &str) -> HandlerResult {
        let (_, pattern) = params::split_pair(params, ErrorCode::InvalidArgument)?;
        let handle = self.registry.register(pattern.trim()).await?;
        Ok(Some(ResponseFrame::Success(handle as i32)))
    }

    async fn arg(&mut self, params: &str) -> HandlerResult {
        let (handle, name) = params::split_pair(params, ErrorCode::WrongArgumentCount)?;
        let handle = params::handle(handle)?;
        let value = self.registry.arg(handle, name).await?;
        Ok(Some(ResponseFrame::Text(value)))
    }

    /// Answers a parked request with `count` bytes from the debug channel.
    ///
    /// The controller writes the body before it sees our answer, so once
    /// `count` parses the body is drained whatever else goes wrong.
    async fn reply(&mut self, params: &str) -> HandlerResult {
        let fields: Vec<&str> = params.splitn(4, ',').collect();
        let [handle, code, total, count] = fields.as_slice() else {
            return Err(ErrorCode::WrongArgumentCount);
        };
        let count = match count.trim().parse::<usize>() {
            Ok(count) if count <= MAX_TRANSFER => count,
            _ => return Err(ErrorCode::InvalidSize),
        };

        let body = self.read_reply_body(count).await;

        let handle = params::handle(handle)?;
        let status = code
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(StatusCode::from_u16)
            .ok_or(ErrorCode::InvalidArgument)?;
        let total = total
            .trim()
            .parse::<usize>()
            .map_err(|_| ErrorCode::InvalidArgument)?;

        let mut responder = self.registry.take_responder(handle).await?;
        tracing::debug!(handle, status = status.as_u16(), total, count, "Sending reply");

        let result = match body {
            Ok(body) => write_reply(&mut responder, status, &body).await,
            Err(code) => Err(code),
        };
        if let Err(e) = responder.shutdown().await {
            tracing::debug!(handle, error = %e, "Client shutdown failed");
        }
        self.registry.release(handle).await;

        result.map(|_| Some(ResponseFrame::ok()))
    }

    /// Takes `count` bytes from the debug channel, waiting at most the reply
    /// timeout. A late body is dropped along with anything already buffered.
    async fn read_reply_body(&mut self, count: usize) -> Result<Bytes, ErrorCode> {
        let read = match self.reply_timeout {
            Some(limit) => match timeout(limit, self.debug.read_exact_bytes(count)).await {
                Ok(read) => read,
                Err(_) => {
                    let dropped = self.debug.discard_buffered();
                    tracing::warn!(count, dropped, "Reply body not received in time");
                    return Err(ErrorCode::InvalidSize);
                }
            },
            None => self.debug.read_exact_bytes(count).await,
        };

        read.map_err(|e| {
            tracing::error!(count, error = %e, "Debug channel read failed");
            ErrorCode::InternalError
        })
    }

    async fn queue(&self, frame: &ResponseFrame) -> Result<(), ErrorCode> {
        self.serial.send_frame(frame).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to queue response");
            ErrorCode::InternalError
        })
    }
}

fn variable_error(err: VariableError) -> ErrorCode {
    match err {
        VariableError::Unknown => ErrorCode::Unimplemented,
        VariableError::ReadOnly | VariableError::Rejected => ErrorCode::InvalidArgument,
    }
}

async fn write_reply(responder: &mut Responder, status: StatusCode, body: &[u8]) -> Result<(), ErrorCode> {
    let sent = async {
        ResponseWriter::new(&Response::streamed(status, body.len()))
            .write_to_stream(responder)
            .await?;
        responder.write_all(body).await?;
        responder.flush().await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    sent.map_err(|e| {
        tracing::warn!(error = %e, "Client went away during reply");
        ErrorCode::Disconnected
    })
}
