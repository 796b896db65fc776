//! A file-backed [`PersistentStore`] implementation.
//!
//! Keeps an in-memory index (matching every other store in this stack's
//! "in-memory index backed by durable files" approach) guarded by a
//! single [`parking_lot::Mutex`], so every operation is both atomic and
//! crash-consistent: the in-memory mutation and its flush to disk happen
//! inside the same critical section, so a reader on this replica can
//! never observe an in-memory change that a crash then loses (the
//! specification only requires that a crash not un-observe a *returned*
//! mutation, which this satisfies trivially by flushing before
//! returning).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use outpost_types::{MessageId, ReplicaRole, Username};
use parking_lot::Mutex;

use crate::{PersistentStore, QueuedMessage, StoreError};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredMessage {
    id: MessageId,
    sender: String,
    #[serde(with = "bytes_as_base64")]
    body: Vec<u8>,
}

mod bytes_as_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

struct State {
    users: BTreeMap<String, Vec<u8>>,
    messages: BTreeMap<String, Vec<StoredMessage>>,
    role: ReplicaRole,
}

/// A [`PersistentStore`] backed by JSON files under a data directory.
///
/// On-disk layout (see `SPEC_FULL.md` §4.2 for the rationale):
/// - `<data_dir>/users.json`
/// - `<data_dir>/messages/<hex(username)>.json`
/// - `<data_dir>/role.json`
pub struct FileStore {
    data_dir: PathBuf,
    state: Mutex<State>,
}

impl FileStore {
    /// Opens (creating if necessary) a store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;
        fs::create_dir_all(data_dir.join("messages")).map_err(|source| StoreError::Io {
            path: data_dir.join("messages"),
            source,
        })?;

        let users = read_json_or_default(&users_path(&data_dir))?;
        let role = read_json_or_default(&role_path(&data_dir)).map(|r: Option<ReplicaRole>| {
            r.unwrap_or(ReplicaRole::Backup)
        })?;

        let mut messages = BTreeMap::new();
        for (username, _) in &users {
            let path = message_path(&data_dir, username);
            let queue: Vec<StoredMessage> = read_json_or_default(&path)?.unwrap_or_default();
            messages.insert(username.clone(), queue);
        }

        Ok(Self {
            data_dir,
            state: Mutex::new(State {
                users,
                messages,
                role,
            }),
        })
    }

    fn flush_users(&self, state: &State) -> Result<(), StoreError> {
        write_json_atomic(&users_path(&self.data_dir), &state.users)
    }

    fn flush_role(&self, state: &State) -> Result<(), StoreError> {
        write_json_atomic(&role_path(&self.data_dir), &state.role)
    }

    fn flush_messages(&self, username: &str, queue: &[StoredMessage]) -> Result<(), StoreError> {
        write_json_atomic(&message_path(&self.data_dir, username), queue)
    }

    fn remove_message_file(&self, username: &str) -> Result<(), StoreError> {
        let path = message_path(&self.data_dir, username);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
        }
        Ok(())
    }
}

fn users_path(data_dir: &Path) -> PathBuf {
    data_dir.join("users.json")
}

fn role_path(data_dir: &Path) -> PathBuf {
    data_dir.join("role.json")
}

fn message_path(data_dir: &Path, username: &str) -> PathBuf {
    let hex: String = username.bytes().map(|b| format!("{b:02x}")).collect();
    data_dir.join("messages").join(format!("{hex}.json"))
}

fn read_json_or_default<T>(path: &Path) -> Result<Option<T>, StoreError>
where
    T: serde::de::DeserializeOwned,
{
    match fs::read(path) {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(value).expect("in-memory values always serialize");
    fs::write(&tmp_path, bytes).map_err(|source| StoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl PersistentStore for FileStore {
    fn add_user(&self, username: &Username, password: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state
            .users
            .insert(username.as_str().to_string(), password.to_vec());
        state.messages.entry(username.as_str().to_string()).or_default();
        self.flush_users(&state)
    }

    fn delete_user(&self, username: &Username) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.users.remove(username.as_str());
        state.messages.remove(username.as_str());
        self.flush_users(&state)?;
        self.remove_message_file(username.as_str())?;

        // Cascade: drop any message authored by `username` from every
        // remaining queue (specification §3).
        let other_usernames: Vec<String> = state.messages.keys().cloned().collect();
        for other in other_usernames {
            let queue = state.messages.get_mut(&other).expect("key just listed");
            let before = queue.len();
            queue.retain(|m| m.sender != username.as_str());
            if queue.len() != before {
                let queue = state.messages.get(&other).unwrap().clone();
                self.flush_messages(&other, &queue)?;
            }
        }
        Ok(())
    }

    fn user_exists(&self, username: &Username) -> Result<bool, StoreError> {
        Ok(self.state.lock().users.contains_key(username.as_str()))
    }

    fn get_users(&self) -> Result<Vec<(Username, Vec<u8>)>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .users
            .iter()
            .map(|(name, pw)| {
                (
                    Username::new(name.clone()).expect("stored usernames are never empty"),
                    pw.clone(),
                )
            })
            .collect())
    }

    fn get_messages(&self, username: &Username) -> Result<Vec<QueuedMessage>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .messages
            .get(username.as_str())
            .map(|queue| {
                queue
                    .iter()
                    .map(|m| QueuedMessage {
                        id: m.id,
                        sender: Username::new(m.sender.clone())
                            .expect("stored senders are never empty"),
                        body: m.body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn add_message(
        &self,
        to: &Username,
        from: &Username,
        body: &[u8],
    ) -> Result<MessageId, StoreError> {
        let mut state = self.state.lock();
        let id = MessageId::generate();
        state
            .messages
            .entry(to.as_str().to_string())
            .or_default()
            .push(StoredMessage {
                id,
                sender: from.as_str().to_string(),
                body: body.to_vec(),
            });
        let queue = state.messages.get(to.as_str()).unwrap().clone();
        self.flush_messages(to.as_str(), &queue)?;
        Ok(id)
    }

    fn delete_messages(&self, username: &Username, ids: &[MessageId]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let Some(queue) = state.messages.get_mut(username.as_str()) else {
            return Ok(());
        };
        let before = queue.len();
        queue.retain(|m| !ids.contains(&m.id));
        if queue.len() != before {
            let queue = queue.clone();
            self.flush_messages(username.as_str(), &queue)?;
        }
        Ok(())
    }

    fn get_role(&self) -> Result<ReplicaRole, StoreError> {
        Ok(self.state.lock().role)
    }

    fn set_role(&self, role: ReplicaRole) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.role = role;
        self.flush_role(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn username(s: &str) -> Username {
        Username::new(s).unwrap()
    }

    #[test]
    fn add_and_fetch_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.add_user(&username("alice"), b"p1").unwrap();
        assert!(store.user_exists(&username("alice")).unwrap());
        assert!(!store.user_exists(&username("bob")).unwrap());
    }

    #[test]
    fn messages_preserve_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.add_user(&username("bob"), b"p2").unwrap();
        store
            .add_message(&username("bob"), &username("alice"), b"hi")
            .unwrap();
        store
            .add_message(&username("bob"), &username("alice"), b"there")
            .unwrap();
        let messages = store.get_messages(&username("bob")).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, b"hi");
        assert_eq!(messages[1].body, b"there");
    }

    #[test]
    fn deleting_user_cascades_to_other_queues() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.add_user(&username("alice"), b"p1").unwrap();
        store.add_user(&username("bob"), b"p2").unwrap();
        store
            .add_message(&username("bob"), &username("alice"), b"hi")
            .unwrap();

        store.delete_user(&username("alice")).unwrap();

        assert!(!store.user_exists(&username("alice")).unwrap());
        let remaining = store.get_messages(&username("bob")).unwrap();
        assert!(remaining.iter().all(|m| m.sender.as_str() != "alice"));
    }

    #[test_case(&[] ; "no ids deletes nothing")]
    #[test_case(&[0] ; "matching id is removed")]
    fn delete_messages_is_silent_on_misses(present_ids: &[usize]) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.add_user(&username("bob"), b"p2").unwrap();
        let id = store
            .add_message(&username("bob"), &username("alice"), b"hi")
            .unwrap();

        let ids_to_delete: Vec<MessageId> = present_ids.iter().map(|_| id).collect();
        store
            .delete_messages(&username("bob"), &ids_to_delete)
            .unwrap();

        let remaining = store.get_messages(&username("bob")).unwrap();
        if present_ids.is_empty() {
            assert_eq!(remaining.len(), 1);
        } else {
            assert!(remaining.is_empty());
        }
    }

    #[test]
    fn role_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set_role(ReplicaRole::Primary).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_role().unwrap(), ReplicaRole::Primary);
    }

    #[test]
    fn messages_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.add_user(&username("bob"), b"p2").unwrap();
            store
                .add_message(&username("bob"), &username("alice"), b"Hello Bob!")
                .unwrap();
            store
                .add_message(&username("bob"), &username("alice"), b"How are you?")
                .unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        let messages = store.get_messages(&username("bob")).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, b"Hello Bob!");
        assert_eq!(messages[1].body, b"How are you?");
    }
}
