use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::registry::{BindOutcome, Registry};

pub struct Connection<S> {
    stream: Option<S>,
    buffer: Vec<u8>,
    state: ConnectionState,
    registry: Registry,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    /// Handed to the registry; the controller writes the response.
    Parked(usize),
    Closed,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S, registry: Registry) -> Self {
        Self {
            stream: Some(stream),
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            registry,
        }
    }

    /// Serves requests until the client leaves or a request gets parked.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let next = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request().await? {
                    Some(req) => ConnectionState::Processing(req),
                    None => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => self.handle_request(req).await,

                ConnectionState::Writing(mut writer, keep_alive) => {
                    let stream = self
                        .stream
                        .as_mut()
                        .ok_or_else(|| anyhow::anyhow!("connection already handed off"))?;
                    writer.write_to_stream(stream).await?;

                    if keep_alive {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Parked(handle) => {
                    tracing::debug!(handle, "Connection parked until reply");
                    self.state = ConnectionState::Parked(handle);
                    break;
                }

                ConnectionState::Closed => break,
            };
            self.state = next;
        }

        Ok(())
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("connection already handed off"))?;

        loop {
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data
                }

                Err(e) => {
                    return Err(anyhow::anyhow!("HTTP parse error: {:?}", e));
                }
            }

            let mut temp = [0u8; 1024];
            let n = stream.read(&mut temp).await?;

            if n == 0 {
                return Ok(None);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    /// Offers the request to the registry first; user patterns take
    /// priority over the built-in routes.
    async fn handle_request(&mut self, req: Request) -> ConnectionState {
        let Some(stream) = self.stream.take() else {
            return ConnectionState::Closed;
        };

        let response = match self.registry.match_and_bind(&req, stream).await {
            BindOutcome::Bound(handle) => return ConnectionState::Parked(handle),
            BindOutcome::Busy(_, stream) => {
                self.stream = Some(stream);
                Response::service_unavailable()
            }
            BindOutcome::Unmatched(stream) => {
                self.stream = Some(stream);
                Self::builtin_response(&req)
            }
        };

        let writer = ResponseWriter::new(&response);
        ConnectionState::Writing(writer, req.keep_alive())
    }

    fn builtin_response(req: &Request) -> Response {
        match req.method {
            Method::GET | Method::POST => {
                tracing::debug!(route = req.route(), "No listener for route");
                Response::not_found()
            }
            _ => Response::method_not_allowed(),
        }
    }
}
