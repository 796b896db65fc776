//! Per-connection I/O loop.
//!
//! One OS thread per client connection (specification §5's explicit
//! requirement), unlike this crate's `mio`-based teacher: the shape of a
//! `Connection` owning a socket and decoding/encoding frames is kept,
//! the non-blocking event loop around it is not. See `SPEC_FULL.md` for
//! the recorded deviation.

use std::net::TcpStream;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use outpost_wire::{decode_frame, encode_frame, Codec, Message};

use crate::error::ServerError;
use crate::handler::ChatCore;
use crate::session::ClientHandle;

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Runs one client connection to completion: decode request, dispatch,
/// encode response, repeat until the socket closes or the replica stops
/// being PRIMARY mid-stream.
#[instrument(skip_all)]
pub fn serve_connection(mut stream: TcpStream, codec: Codec, core: Arc<ChatCore>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
    info!(%peer, "client connected");
    let handle = ClientHandle::new(
        match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to clone client stream");
                return;
            }
        },
        codec,
    );

    let mut logged_in_as: Option<outpost_types::Username> = None;

    loop {
        let request = match read_request(&mut stream, codec) {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                info!(error = %e, "connection ended");
                break;
            }
        };

        let response = core.dispatch(&request, &handle);

        if !response.error {
            match request.cmd.as_str() {
                // Only remember this connection as logged in once the
                // command actually succeeded: a rejected
                // `login <victim> <wrong password>` must not make this
                // connection's teardown call `sessions().logoff(victim)`
                // and evict the victim's real session.
                "login" | "create" => {
                    if let Ok(username) = outpost_types::Username::new(request.src.clone()) {
                        logged_in_as = Some(username);
                    }
                }
                "logoff" | "delete" => logged_in_as = None,
                _ => {}
            }
        }

        if let Err(e) = write_response(&mut stream, codec, &response) {
            warn!(error = %e, "failed to write response");
            break;
        }
    }

    if let Some(username) = logged_in_as {
        core.sessions().logoff(&username);
    }
}

fn read_request(stream: &mut TcpStream, codec: Codec) -> Result<Option<Message>, ServerError> {
    let payload = match decode_frame(stream, MAX_FRAME_LEN) {
        Ok(payload) => payload,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(codec.decode(&payload)?))
}

fn write_response(stream: &mut TcpStream, codec: Codec, response: &Message) -> Result<(), ServerError> {
    let payload = codec.encode(response)?;
    encode_frame(stream, &payload)?;
    Ok(())
}
