//! Persisted per-chat records: group token and jingle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audio::AudioRef;
use crate::error::{JingleError, JingleResult};
use crate::protocol::GroupId;

const CHATS_FILE: &str = "chats.json";
const CHATS_TEMP_FILE: &str = "chats.json.tmp";

/// Everything remembered about one chat.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ChatRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jingle: Option<AudioRef>,
}

/// Chat records kept in memory and mirrored to `chats.json`.
///
/// Every mutation rewrites the file atomically (temp file + rename) while
/// holding the records lock, so concurrent commands never interleave writes.
/// Mutations are applied to a copy and only swapped in once the copy is on
/// disk, so a failed write leaves memory matching the file.
pub struct ChatStore {
    dir: Option<PathBuf>,
    records: Mutex<BTreeMap<i64, ChatRecord>>,
}

impl ChatStore {
    /// A store that forgets everything on restart.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Opens the store in `data_dir`, loading existing records.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(data_dir: &Path) -> JingleResult<Self> {
        let path = data_dir.join(CHATS_FILE);
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                JingleError::Storage(format!("{} is not valid: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        log::info!(
            "[Store] Loaded {} chat record(s) from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            dir: Some(data_dir.to_path_buf()),
            records: Mutex::new(records),
        })
    }

    /// Returns `true` if records survive restarts.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    #[must_use]
    pub fn token(&self, chat_id: i64) -> Option<GroupId> {
        self.records
            .lock()
            .get(&chat_id)
            .and_then(|record| record.token.clone())
    }

    /// Returns the chat's token, generating one on first use.
    ///
    /// # Errors
    ///
    /// Fails if a new token cannot be persisted.
    pub fn generate_token(&self, chat_id: i64) -> JingleResult<GroupId> {
        let mut records = self.records.lock();
        if let Some(token) = records.get(&chat_id).and_then(|r| r.token.clone()) {
            return Ok(token);
        }

        let token = loop {
            let candidate = GroupId::generate();
            if !records
                .values()
                .any(|record| record.token.as_ref() == Some(&candidate))
            {
                break candidate;
            }
        };
        let mut next = records.clone();
        next.entry(chat_id).or_default().token = Some(token.clone());
        self.persist(&next)?;
        *records = next;
        log::info!("[Store] Generated token for chat {}", chat_id);
        Ok(token)
    }

    #[must_use]
    pub fn jingle(&self, chat_id: i64) -> Option<AudioRef> {
        self.records
            .lock()
            .get(&chat_id)
            .and_then(|record| record.jingle.clone())
    }

    /// Stores (or replaces) the chat's jingle.
    ///
    /// # Errors
    ///
    /// Fails if the change cannot be persisted.
    pub fn set_jingle(&self, chat_id: i64, jingle: AudioRef) -> JingleResult<()> {
        let mut records = self.records.lock();
        let mut next = records.clone();
        next.entry(chat_id).or_default().jingle = Some(jingle);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    /// Removes the chat's jingle. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Fails if the change cannot be persisted.
    pub fn delete_jingle(&self, chat_id: i64) -> JingleResult<bool> {
        let mut records = self.records.lock();
        if records.get(&chat_id).map_or(true, |record| record.jingle.is_none()) {
            return Ok(false);
        }

        let mut next = records.clone();
        if let Some(record) = next.get_mut(&chat_id) {
            record.jingle = None;
        }
        self.persist(&next)?;
        *records = next;
        Ok(true)
    }

    fn persist(&self, records: &BTreeMap<i64, ChatRecord>) -> JingleResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CHATS_FILE);
        let temp_path = dir.join(CHATS_TEMP_FILE);
        let contents = serde_json::to_string_pretty(records)
            .map_err(|e| JingleError::Storage(e.to_string()))?;

        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }
}
