use tokio::io;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::json_rpc::{ClientMessage, ErrorCode, RequestId, Response, ServerMessage};
use crate::transport::{Connection, TransportError};

/// Largest frame body accepted from the client
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

fn parse_header_line(header_line: &str) -> Option<(&str, &str)> {
    header_line
        .split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
}

/// Reads the next `Content-Length` framed body
///
/// Returns `Ok(None)` at the end of input. Bodies longer than `max_frame_size` are discarded
/// without being buffered. Errors other than [`TransportError::Io`] leave the reader positioned at
/// the start of the next frame.
pub async fn read_frame(
    reader: &mut (impl io::AsyncBufRead + Unpin),
    max_frame_size: usize,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut content_length: Option<Result<usize, TransportError>> = None;
    let mut header_error = None;
    let mut line_buffer = String::new();

    // Read the header
    loop {
        line_buffer.clear();
        if reader.read_line(&mut line_buffer).await? == 0 {
            return Ok(None);
        }

        let line = line_buffer.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            break;
        }

        match parse_header_line(line) {
            Some((name, value)) if name.eq_ignore_ascii_case("content-length") => {
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| TransportError::InvalidContentLength(value.to_owned())),
                );
            }
            // `Content-Type` and anything else we don't understand
            Some(_) => {}
            None => header_error = Some(TransportError::MalformedHeader(line.to_owned())),
        }
    }

    let content_length = match content_length {
        Some(Ok(content_length)) => content_length,
        Some(Err(err)) => return Err(err),
        None => return Err(header_error.unwrap_or(TransportError::MissingContentLength)),
    };

    if content_length > max_frame_size {
        io::copy(&mut (&mut *reader).take(content_length as u64), &mut io::sink()).await?;

        return Err(TransportError::FrameTooLarge {
            length: content_length,
            limit: max_frame_size,
        });
    }

    // Read the entire content
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await?;

    match header_error {
        Some(err) => Err(err),
        None => Ok(Some(body)),
    }
}

/// Decodes a frame body into a client message
pub fn decode_message(body: &[u8]) -> Result<ClientMessage, TransportError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(TransportError::InvalidJson)?;

    // Responses to our own requests carry an ID but must never be answered
    let request_id = if value.get("result").is_none() && value.get("error").is_none() {
        value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
    } else {
        None
    };

    serde_json::from_value(value).map_err(|_| TransportError::InvalidMessage(request_id))
}

/// Waits for the passed I/O future and `break`s from the current loop if it fails
///
/// This is useful to propagate closing `stdout` by closing the respective MPSC channel.
macro_rules! break_on_io_error {
    ($io_future:expr, $message:expr) => {
        if let Err(err) = $io_future.await {
            if err.kind() != io::ErrorKind::BrokenPipe {
                error!("{}: {}", $message, err);
            }
            break;
        }
    };
}

pub fn create_connection(
    mut reader: impl io::AsyncBufRead + Unpin + Send + 'static,
    mut writer: impl io::AsyncWrite + Unpin + Send + 'static,
) -> Connection {
    // Allow some concurrency with the session but 4 message is a bit excessive
    // This allows for backpressure on `stdin`/`stdout`
    let (send_outgoing, mut recv_outgoing) = mpsc::channel::<ServerMessage>(4);
    let (send_incoming, recv_incoming) = mpsc::channel::<ClientMessage>(4);

    // Write all our responses out sequentially
    tokio::spawn(async move {
        while let Some(message) = recv_outgoing.recv().await {
            let message_bytes = match message.to_vec() {
                Ok(message_bytes) => message_bytes,
                Err(err) => {
                    error!("Could not serialise message: {}", err);
                    continue;
                }
            };

            break_on_io_error!(
                writer.write_all(
                    format!("Content-Length: {}\r\n\r\n", message_bytes.len()).as_bytes()
                ),
                "Could not write message header"
            );

            break_on_io_error!(
                writer.write_all(&message_bytes),
                "Could not write message body"
            );

            break_on_io_error!(writer.flush(), "Could not flush writer");
        }
    });

    let send_rejection = send_outgoing.clone();
    tokio::spawn(async move {
        loop {
            let body = match read_frame(&mut reader, MAX_FRAME_SIZE).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("Input closed");
                    break;
                }
                Err(TransportError::Io(err)) => {
                    error!("Could not read frame: {}", err);
                    break;
                }
                Err(err) => {
                    warn!("Skipping malformed frame: {}", err);
                    continue;
                }
            };

            let client_message = match decode_message(&body) {
                Ok(client_message) => client_message,
                Err(TransportError::InvalidMessage(Some(id))) => {
                    warn!("Rejecting invalid request {:?}", id);

                    let response = Response::new_err(
                        Some(id),
                        ErrorCode::InvalidRequest,
                        "Invalid JSON-RPC request",
                    );
                    if send_rejection.send(response.into()).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    warn!("Skipping malformed message: {}", err);
                    continue;
                }
            };

            if send_incoming.send(client_message).await.is_err() {
                // Channel closed
                break;
            }
        }
    });

    Connection {
        incoming: recv_incoming,
        outgoing: send_outgoing,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::json_rpc::Notification;

    fn frame(headers: &str, body: &[u8]) -> Vec<u8> {
        let mut message = headers.as_bytes().to_vec();
        message.extend_from_slice(b"\r\n");
        message.extend_from_slice(body);
        message
    }

    #[tokio::test]
    async fn test_happy_recv_notification() {
        let body = br#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let message = frame(&format!("Content-Length: {}\r\n", body.len()), body);

        let Connection { mut incoming, .. } = create_connection(
            io::BufReader::new(std::io::Cursor::new(message)),
            Vec::new(),
        );

        let client_message = incoming.recv().await.unwrap();
        assert_eq!(
            ClientMessage::Notification(Notification::new_lsp::<
                lsp_types::notification::Initialized,
            >(lsp_types::InitializedParams {})),
            client_message,
        );
    }

    #[tokio::test]
    async fn tolerates_content_type() {
        let body = br#"{"jsonrpc":"2.0","method":"exit"}"#;
        let message = frame(
            &format!(
                "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n",
                body.len()
            ),
            body,
        );

        let Connection { mut incoming, .. } = create_connection(
            io::BufReader::new(std::io::Cursor::new(message)),
            Vec::new(),
        );

        assert_eq!(
            ClientMessage::Notification(Notification::new("exit", ())),
            incoming.recv().await.unwrap()
        );
        // End of input closes the channel
        assert!(incoming.recv().await.is_none());
    }

    #[tokio::test]
    async fn skips_malformed_frames() {
        let mut message = frame("Content-Type: text/plain\r\n", b"");
        message.extend(frame("Content-Length: 5\r\n", b"nope!"));

        let body = br#"{"jsonrpc":"2.0","method":"exit"}"#;
        message.extend(frame(&format!("Content-Length: {}\r\n", body.len()), body));

        let Connection { mut incoming, .. } = create_connection(
            io::BufReader::new(std::io::Cursor::new(message)),
            Vec::new(),
        );

        assert_eq!(
            ClientMessage::Notification(Notification::new("exit", ())),
            incoming.recv().await.unwrap()
        );
    }

    #[tokio::test]
    async fn discards_oversized_frames() {
        let mut message = frame("Content-Length: 10\r\n", b"0123456789");

        let body = br#"{"jsonrpc":"2.0","method":"exit"}"#;
        message.extend(frame(&format!("Content-Length: {}\r\n", body.len()), body));

        let mut reader = io::BufReader::new(std::io::Cursor::new(message));

        match read_frame(&mut reader, 8).await {
            Err(TransportError::FrameTooLarge { length, limit }) => {
                assert_eq!(10, length);
                assert_eq!(8, limit);
            }
            other => panic!("Expected oversized frame, got {:?}", other),
        }

        assert_eq!(
            Some(body.to_vec()),
            read_frame(&mut reader, 8 + body.len()).await.unwrap()
        );
        assert_eq!(None, read_frame(&mut reader, 8).await.unwrap());
    }

    #[tokio::test]
    async fn huge_content_length() {
        let message = frame(&format!("Content-Length: {}\r\n", u64::MAX), b"{}");
        let mut reader = io::BufReader::new(std::io::Cursor::new(message));

        assert!(matches!(
            read_frame(&mut reader, MAX_FRAME_SIZE).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
        assert_eq!(None, read_frame(&mut reader, MAX_FRAME_SIZE).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let body = br#"{"jsonrpc":"2.0","id":3,"method":12}"#;
        let message = frame(&format!("Content-Length: {}\r\n", body.len()), body);

        let (client, server) = io::duplex(4096);
        let Connection { incoming, .. } = create_connection(
            io::BufReader::new(std::io::Cursor::new(message)),
            server,
        );

        let mut client = io::BufReader::new(client);
        let body = read_frame(&mut client, MAX_FRAME_SIZE).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(3, value["id"]);
        assert_eq!(-32600, value["error"]["code"]);
        assert_eq!("2.0", value["jsonrpc"]);

        drop(incoming);
    }

    #[tokio::test]
    async fn writes_framed_messages() {
        let (client, server) = io::duplex(4096);
        let Connection { outgoing, .. } =
            create_connection(io::BufReader::new(std::io::Cursor::new(vec![])), server);

        outgoing
            .send(Notification::new("window/logMessage", ()).into())
            .await
            .unwrap();

        let mut client = io::BufReader::new(client);
        let body = read_frame(&mut client, MAX_FRAME_SIZE).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            serde_json::json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": null}),
            value
        );
    }
}
