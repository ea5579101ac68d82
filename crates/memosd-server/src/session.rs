//! Peer sessions
//!
//! One task per connection. Only op requests are serviced; any other
//! message type is logged and dropped. A message that fails body decode
//! is dropped without a reply (the peer retries against a fresh map);
//! framing-level corruption and I/O errors fault the connection.

use crate::dispatch::{ClassLoader, execute_request};
use memosd_common::OsdOptions;
use memosd_store::ObjectStore;
use memosd_wire::request::OpRequest;
use memosd_wire::{ClusterMap, Message, msg_type, read_message, write_message};
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// State shared by every session of one server, single-executor owned
pub struct ServerShared {
    /// Immutable daemon options
    pub options: OsdOptions,
    /// The object store
    pub store: RefCell<ObjectStore>,
    /// Latest cluster map; replies are stamped with its epoch
    pub map: RefCell<ClusterMap>,
    /// Optional object-class execution capability
    pub loader: Option<RefCell<Box<dyn ClassLoader>>>,
}

fn handle_osd_op(shared: &ServerShared, mut msg: Message) -> Option<Message> {
    let mut req = match OpRequest::decode(&msg) {
        Ok(req) => req,
        Err(e) => {
            warn!(tid = msg.header.tid, error = %e, "failed to decode op request");
            return None;
        }
    };
    trace!(
        tid = req.tid,
        object = %req.identity,
        ops = req.ops.len(),
        data_len = msg.header.data_len,
        "dispatching request"
    );

    let epoch = shared.map.borrow().epoch();
    let mut store = shared.store.borrow_mut();
    let reply = if let Some(loader_cell) = &shared.loader {
        let mut loader = loader_cell.borrow_mut();
        execute_request(
            &mut store,
            Some(loader.as_mut()),
            &mut req,
            &mut msg.data,
            epoch,
        )
    } else {
        execute_request(&mut store, None, &mut req, &mut msg.data, epoch)
    };
    Some(reply)
}

/// Serve one peer connection until it closes or faults
pub async fn run_session(shared: Rc<ServerShared>, mut stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "peer connected");
    loop {
        let msg = match read_message(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!(%peer, "peer disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "connection fault");
                break;
            }
        };

        match msg.header.msg_type {
            msg_type::OSD_OP => {
                let Some(mut reply) = handle_osd_op(&shared, msg) else {
                    continue;
                };
                if let Err(e) = write_message(&mut stream, &mut reply).await {
                    warn!(%peer, error = %e, "failed to send reply");
                    break;
                }
            }
            other => {
                warn!(
                    %peer,
                    msg_type = other,
                    name = msg_type::name(other),
                    "dropping unexpected message"
                );
            }
        }
    }
}
