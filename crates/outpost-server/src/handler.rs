//! Command dispatch: one method per wire command, grounded on the
//! original prototype's `ChatServer.handle_*` methods and on
//! `kimberlite-server::handler.rs`'s "one `RequestHandler` wraps the
//! durable backend" shape.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use outpost_replication::{DataUpdate, ReplicationPeer};
use outpost_store::PersistentStore;
use outpost_types::{MessageId, Username};
use outpost_wire::Message;

use crate::session::{ClientHandle, SessionTable};

const ACK_WAIT: Duration = Duration::from_millis(200);

/// The client-facing command surface: account management, presence, and
/// message delivery. Holds no socket state of its own — [`crate::connection`]
/// owns the per-connection I/O and calls into this for every decoded
/// request.
pub struct ChatCore {
    store: Arc<dyn PersistentStore>,
    replication: ReplicationPeer,
    sessions: Arc<SessionTable>,
}

impl ChatCore {
    pub fn new(store: Arc<dyn PersistentStore>, replication: ReplicationPeer, sessions: Arc<SessionTable>) -> Self {
        Self {
            store,
            replication,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    #[instrument(skip(self, request, handle), fields(cmd = %request.cmd))]
    pub fn dispatch(&self, request: &Message, handle: &ClientHandle) -> Message {
        let Ok(src) = Username::new(request.src.clone()) else {
            return Message::error_reply(request.cmd.as_str(), b"missing or invalid src username".to_vec());
        };

        if !self.replication.role().is_primary() || self.replication.is_transitioning() {
            return Message::error_reply(
                request.cmd.as_str(),
                b"Server is not primary or is in transition, please try another server".to_vec(),
            );
        }

        match request.cmd.as_str() {
            "create" => self.handle_create(&src, request, handle),
            "login" => self.handle_login(&src, request, handle),
            "logoff" => self.handle_logoff(&src),
            "list" => self.handle_list(request),
            "send" => self.handle_send(&src, request),
            "deliver" => self.handle_deliver(&src, request, handle),
            "delete_msgs" => self.handle_delete_messages(&src, request),
            "delete" => self.handle_delete(&src),
            other => Message::error_reply(other, b"unknown command".to_vec()),
        }
    }

    fn handle_create(&self, username: &Username, request: &Message, handle: &ClientHandle) -> Message {
        match self.store.user_exists(username) {
            Ok(true) => Message::error_reply("create", b"Username already exists".to_vec()),
            Ok(false) => {
                if let Err(e) = self.store.add_user(username, &request.body) {
                    warn!(error = %e, "failed to create user");
                    return Message::error_reply("create", b"Failed to create account".to_vec());
                }
                self.sessions.login(username.clone(), handle.clone());
                self.replication.broadcast_data_update(DataUpdate::AddUser {
                    username: username.as_str().to_string(),
                    password: request.body.clone(),
                });
                self.replication.wait_for_acks(ACK_WAIT);
                Message::new("create")
                    .with_to(username.as_str())
                    .with_body(b"Account created".to_vec())
            }
            Err(e) => {
                warn!(error = %e, "store error during create");
                Message::error_reply("create", b"Failed to create account".to_vec())
            }
        }
    }

    /// Deliberately stricter than the original prototype: logging in on an
    /// already-online username is rejected rather than silently stealing
    /// the session (see `SPEC_FULL.md`'s Open Question resolution).
    fn handle_login(&self, username: &Username, request: &Message, handle: &ClientHandle) -> Message {
        if self.sessions.is_online(username) {
            return Message::error_reply("login", b"Account already logged in".to_vec());
        }

        let users = match self.store.get_users() {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "store error during login");
                return Message::error_reply("login", b"Username/Password error".to_vec());
            }
        };
        let Some((_, password)) = users.iter().find(|(name, _)| name == username) else {
            return Message::error_reply("login", b"Username/Password error".to_vec());
        };
        if password != &request.body {
            return Message::error_reply("login", b"Username/Password error".to_vec());
        }

        self.sessions.login(username.clone(), handle.clone());
        let unread = self.store.get_messages(username).map(|m| m.len()).unwrap_or(0);
        Message::new("login")
            .with_to(username.as_str())
            .with_body(format!("Login successful. You have {unread} unread messages.").into_bytes())
    }

    fn handle_logoff(&self, username: &Username) -> Message {
        if !self.sessions.is_online(username) {
            return Message::error_reply("logoff", b"Not logged in".to_vec());
        }
        self.sessions.logoff(username);
        Message::new("logoff").with_body(b"Logged out successfully".to_vec())
    }

    fn handle_list(&self, request: &Message) -> Message {
        let pattern = request.body_text();
        let pattern = if pattern.is_empty() { "all".to_string() } else { pattern };

        let users = match self.store.get_users() {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "store error during list");
                return Message::error_reply("list", b"Failed to list users".to_vec());
            }
        };
        let matching: Vec<&str> = users
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| pattern == "all" || name.contains(&pattern))
            .collect();
        Message::new("list").with_body(matching.join(",").into_bytes())
    }

    fn handle_send(&self, username: &Username, request: &Message) -> Message {
        if request.body.is_empty() || request.to.is_empty() {
            return Message::error_reply("send", b"Message content and recipient are required".to_vec());
        }
        let Ok(recipient) = Username::new(request.to.clone()) else {
            return Message::error_reply("send", b"Recipient not found".to_vec());
        };
        match self.store.user_exists(&recipient) {
            Ok(true) => {}
            Ok(false) => return Message::error_reply("send", b"Recipient not found".to_vec()),
            Err(e) => {
                warn!(error = %e, "store error during send");
                return Message::error_reply("send", b"Failed to send message".to_vec());
            }
        }

        if self.replication.is_transitioning() {
            return Message::error_reply("send", b"Server is in transition, please try again later".to_vec());
        }

        let msg_id = match self.store.add_message(&recipient, username, &request.body) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "store error during send");
                return Message::error_reply("send", b"Failed to send message".to_vec());
            }
        };

        self.replication.broadcast_data_update(DataUpdate::AddMessage {
            to: recipient.as_str().to_string(),
            from: username.as_str().to_string(),
            body: request.body.clone(),
            msg_id,
        });
        self.replication.wait_for_acks(ACK_WAIT);

        self.push_inline(&recipient, username, &request.body, msg_id);

        Message::new("send").with_body(b"Message sent successfully".to_vec())
    }

    /// Pushes a `deliver` notification straight to the recipient's socket
    /// if they're online. The append and the replication broadcast have
    /// already happened by the time this runs (specification §5: "a
    /// DATA_UPDATE is only emitted after the local Persistent Store has
    /// applied the mutation", and the broadcast precedes the inline
    /// attempt so per-sender FIFO holds either way); any I/O error here
    /// just leaves the message queued for a later `deliver`.
    fn push_inline(&self, recipient: &Username, sender: &Username, body: &[u8], msg_id: MessageId) {
        if let Some(handle) = self.sessions.handle_for(recipient) {
            let notification = Message::new("deliver")
                .with_src(sender.as_str())
                .with_body(body.to_vec())
                .with_msg_ids(vec![msg_id]);
            if let Err(e) = handle.send(&notification) {
                warn!(error = %e, "failed to push live delivery, message stays queued");
            } else {
                info!(%sender, %recipient, "message delivered live");
            }
        }
    }

    fn handle_deliver(&self, username: &Username, request: &Message, handle: &ClientHandle) -> Message {
        if !self.sessions.is_online(username) {
            return Message::error_reply("deliver", b"Not logged in".to_vec());
        }
        if self.replication.is_transitioning() {
            return Message::error_reply("deliver", b"Server is in transition, please try again later".to_vec());
        }

        let queued = match self.store.get_messages(username) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "store error during deliver");
                return Message::error_reply("deliver", b"Failed to fetch messages".to_vec());
            }
        };

        let peek_only = request.limit == 0;
        let unseen: Vec<_> = queued
            .into_iter()
            .filter(|m| !self.sessions.has_seen(username, m.id))
            .collect();
        let limit = if request.limit > 0 {
            request.limit as usize
        } else {
            unseen.len()
        };
        let to_send = &unseen[..unseen.len().min(limit)];

        for msg in to_send {
            let notification = Message::new("deliver")
                .with_src(msg.sender.as_str())
                .with_body(msg.body.clone())
                .with_msg_ids(vec![msg.id]);
            if let Err(e) = handle.send(&notification) {
                warn!(error = %e, "failed to push a queued message during deliver");
            }
        }

        if peek_only {
            self.sessions.mark_seen(username, to_send.iter().map(|m| m.id));
            return Message::new("deliver")
                .with_body(format!("Delivered {} messages", to_send.len()).into_bytes());
        }

        if !to_send.is_empty() {
            if self.replication.is_transitioning() {
                return Message::new("deliver").with_body(
                    format!(
                        "Delivered {} messages, but server state changed - messages preserved",
                        to_send.len()
                    )
                    .into_bytes(),
                );
            }
            let ids: Vec<MessageId> = to_send.iter().map(|m| m.id).collect();
            self.sessions.mark_seen(username, ids.iter().copied());
            if let Err(e) = self.store.delete_messages(username, &ids) {
                warn!(error = %e, "failed to delete delivered messages");
            } else {
                self.replication.broadcast_data_update(DataUpdate::DeleteMessages {
                    username: username.as_str().to_string(),
                    msg_ids: ids,
                });
                self.replication.wait_for_acks(ACK_WAIT);
            }
        }

        Message::new("deliver").with_body(format!("Delivered {} messages", to_send.len()).into_bytes())
    }

    fn handle_delete_messages(&self, username: &Username, request: &Message) -> Message {
        if request.msg_ids.is_empty() {
            return Message::error_reply("delete_msgs", b"No message IDs provided".to_vec());
        }
        if self.replication.is_transitioning() {
            return Message::error_reply("delete_msgs", b"Server is in transition, please try again later".to_vec());
        }

        if let Err(e) = self.store.delete_messages(username, &request.msg_ids) {
            warn!(error = %e, "failed to delete messages");
            return Message::error_reply("delete_msgs", b"Failed to delete messages".to_vec());
        }

        self.replication.broadcast_data_update(DataUpdate::DeleteMessages {
            username: username.as_str().to_string(),
            msg_ids: request.msg_ids.clone(),
        });
        self.replication.wait_for_acks(ACK_WAIT);

        Message::new("delete_msgs").with_body(b"Messages deleted successfully".to_vec())
    }

    fn handle_delete(&self, username: &Username) -> Message {
        if !self.sessions.is_online(username) {
            return Message::error_reply("delete", b"Not logged in".to_vec());
        }
        if self.replication.is_transitioning() {
            return Message::error_reply("delete", b"Server is in transition, please try again later".to_vec());
        }

        if let Err(e) = self.store.delete_user(username) {
            warn!(error = %e, "failed to delete user");
            return Message::error_reply("delete", b"Failed to delete account".to_vec());
        }
        self.sessions.logoff(username);

        if !self.replication.is_transitioning() {
            self.replication.broadcast_data_update(DataUpdate::DeleteUser {
                username: username.as_str().to_string(),
            });
            self.replication.wait_for_acks(ACK_WAIT);
        }

        Message::new("delete").with_body(b"Account deleted".to_vec())
    }
}
