//! File-backed session store: one JSON document per session.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};
use crate::session::{Session, SessionId};

/// Stores each session as `<id>.json` under one directory, pretty-printed
/// so the documents stay inspectable by hand.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at the given directory.
    ///
    /// The directory is created lazily on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the session documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write the session document, overwriting any previous version.
    pub fn save(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let data = serde_json::to_string_pretty(session).map_err(Error::Serialize)?;
        fs::write(self.path(session.id), data)?;
        Ok(())
    }

    /// Load one session by id.
    pub fn load(&self, id: SessionId) -> Result<Session> {
        let path = self.path(id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_str(&data).map_err(|source| Error::Decode {
            id: id.to_string(),
            source,
        })
    }

    /// Load every session in the directory, newest update first.
    ///
    /// A corrupt or non-matching file is skipped with a warning; it never
    /// fails the whole listing.
    pub fn list(&self) -> Result<Vec<Session>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match read_session(&path) {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable session file");
                }
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

fn read_session(path: &Path) -> Result<Session> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|source| Error::Decode {
        id: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Content, FunctionCall, FunctionResponse, Part, Role};
    use serde_json::{Map, json};

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        (dir, store)
    }

    fn heterogeneous_session() -> Session {
        let mut args = Map::new();
        args.insert("path_to_status".to_string(), json!("src"));
        let mut response = Map::new();
        response.insert("is_error".to_string(), json!(false));
        response.insert("output".to_string(), json!("clean"));

        let mut session = Session::new();
        session.push(Content::user_text("what changed?"));
        session.push(Content::new(
            Role::Model,
            vec![
                Part::text("Checking."),
                Part::FunctionCall(FunctionCall {
                    name: "git_status".to_string(),
                    args,
                }),
            ],
        ));
        session.push(Content::new(
            Role::User,
            vec![Part::FunctionResponse(FunctionResponse {
                name: "git_status".to_string(),
                response,
            })],
        ));
        session
    }

    #[test]
    fn save_load_round_trip() {
        let (_dir, store) = store();
        let session = heterogeneous_session();

        store.save(&session).unwrap();
        let loaded = store.load(session.id).unwrap();

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.history, session.history);
    }

    #[test]
    fn save_is_full_overwrite() {
        let (_dir, store) = store();
        let mut session = heterogeneous_session();
        store.save(&session).unwrap();

        session.history.push(Content::user_text("and now?"));
        store.save(&session).unwrap();

        let loaded = store.load(session.id).unwrap();
        assert_eq!(loaded.history.len(), session.history.len());
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.load(SessionId::new()).err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn load_corrupt_is_decode_error() {
        let (_dir, store) = store();
        let id = SessionId::new();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join(format!("{id}.json")), "{ not json").unwrap();

        let err = store.load(id).err().unwrap();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn list_skips_corrupt_files() {
        let (_dir, store) = store();
        let session = heterogeneous_session();
        store.save(&session).unwrap();
        fs::write(store.dir().join("broken.json"), "{ not json").unwrap();
        fs::write(store.dir().join("notes.txt"), "not a session").unwrap();

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, session.id);
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn stored_document_shape() {
        let (_dir, store) = store();
        let mut session = Session::new();
        session.push(Content::user_text("hello"));
        store.save(&session).unwrap();

        let raw = fs::read_to_string(store.dir().join(format!("{}.json", session.id))).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(doc["id"], json!(session.id.to_string()));
        assert_eq!(doc["history"][0]["role"], json!("user"));
        assert_eq!(doc["history"][0]["parts"][0]["type"], json!("text"));
        assert_eq!(doc["history"][0]["parts"][0]["content"], json!("hello"));
        // Pretty-printed for inspectability.
        assert!(raw.contains('\n'));
    }
}
