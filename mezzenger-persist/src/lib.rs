// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Snapshotting for the broker's ack-tracked retention table.
//!
//! The broker treats persistence as an optional collaborator: with no
//! [`Persistence`] configured, the retention table simply lives in memory.
//! [`FilePersistence`] is the one concrete adapter this crate ships, writing
//! a whole-table snapshot to a temporary file and renaming it into place so
//! a crash mid-write never leaves a half-written snapshot behind.

mod error;

use std::path::{Path, PathBuf};

use mezzenger_proto::Message;
use snafu::ResultExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub use error::PersistError;

/// One retention-table entry as seen by the persistence layer: the instant
/// it was last (re)published, and the message itself.
pub type Entry = (u64, Message);

/// Pluggable whole-table snapshotter for the broker's retention table.
///
/// Implementations are expected to be called after every retention mutation
/// ([`Persistence::save`]) and once at broker startup ([`Persistence::load`]).
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, entries: &[Entry]) -> Result<(), PersistError>;
    async fn load(&self) -> Result<Vec<Entry>, PersistError>;
}

/// File-backed [`Persistence`] that snapshots the whole table on every save.
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        let mut name = tmp
            .file_name()
            .map(|n| n.to_owned())
            .unwrap_or_default();
        name.push(".tmp");
        tmp.set_file_name(name);
        tmp
    }
}

#[async_trait::async_trait]
impl Persistence for FilePersistence {
    async fn save(&self, entries: &[Entry]) -> Result<(), PersistError> {
        let tmp_path = self.tmp_path();
        let bytes = encode_snapshot(entries);

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .context(error::WriteSnafu { path: tmp_path.clone() })?;
        file.write_all(&bytes)
            .await
            .context(error::WriteSnafu { path: tmp_path.clone() })?;
        file.sync_all()
            .await
            .context(error::WriteSnafu { path: tmp_path.clone() })?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .context(error::RenameSnafu { path: self.path.clone() })?;

        log::debug!("persisted {} retained message(s) to {:?}", entries.len(), self.path);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Entry>, PersistError> {
        if !self.path.exists() {
            log::info!("no persist file at {:?}, starting with empty retention table", self.path);
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .context(error::ReadSnafu { path: self.path.clone() })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .context(error::ReadSnafu { path: self.path.clone() })?;

        decode_snapshot(&bytes).ok_or_else(|| {
            error::CorruptSnafu {
                path: self.path.clone(),
                reason: "snapshot length prefixes did not match file contents".to_string(),
            }
            .build()
        })
    }
}

fn encode_snapshot(entries: &[Entry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for (last_resent_at, message) in entries {
        let frame = mezzenger_proto::encode(message);
        out.extend_from_slice(&last_resent_at.to_be_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        out.extend_from_slice(&frame);
    }
    out
}

fn decode_snapshot(bytes: &[u8]) -> Option<Vec<Entry>> {
    let mut cursor = bytes;
    let count = take_u32(&mut cursor)?;
    let mut entries = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let last_resent_at = take_u64(&mut cursor)?;
        let frame_len = take_u32(&mut cursor)? as usize;
        if cursor.len() < frame_len {
            return None;
        }
        let frame = &cursor[..frame_len];
        cursor = &cursor[frame_len..];
        let message = mezzenger_proto::decode(frame).ok()?;
        entries.push((last_resent_at, message));
    }

    Some(entries)
}

fn take_u32(cursor: &mut &[u8]) -> Option<u32> {
    if cursor.len() < 4 {
        return None;
    }
    let (head, tail) = cursor.split_at(4);
    *cursor = tail;
    Some(u32::from_be_bytes(head.try_into().ok()?))
}

fn take_u64(cursor: &mut &[u8]) -> Option<u64> {
    if cursor.len() < 8 {
        return None;
    }
    let (head, tail) = cursor.split_at(8);
    *cursor = tail;
    Some(u64::from_be_bytes(head.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_snapshot_through_disk() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mezzenger-persist-test-{}", std::process::id()));
        let persistence = FilePersistence::new(&path);

        let entries = vec![
            (10, Message::now(b"a".to_vec(), b"one".to_vec(), 1)),
            (20, Message::now(b"b".to_vec(), b"two".to_vec(), 1)),
        ];
        persistence.save(&entries).await.unwrap();

        let loaded = persistence.load().await.unwrap();
        assert_eq!(loaded, entries);

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let path = std::env::temp_dir().join("mezzenger-persist-test-missing-does-not-exist");
        tokio::fs::remove_file(&path).await.ok();
        let persistence = FilePersistence::new(&path);
        assert_eq!(persistence.load().await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("mezzenger-persist-test-corrupt-{}", std::process::id()));
        tokio::fs::write(&path, b"\xff\xff\xff\xff").await.unwrap();
        let persistence = FilePersistence::new(&path);
        assert!(persistence.load().await.is_err());
        tokio::fs::remove_file(&path).await.ok();
    }
}
