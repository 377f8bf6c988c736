use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::RwLock,
};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    errors::SessionError,
    models::{AuthToken, User},
};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

/// Key-value storage for the persisted session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<ahash::HashMap<String, String>>,
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut values = self.values.write().map_err(|_| SessionError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let mut values = self.values.write().map_err(|_| SessionError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

/// Stores the session as a small json object on disk, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Memory only changes once the file was written.
    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), SessionError> {
        let mut values = self.values.write().map_err(|_| SessionError::Poisoned)?;
        let mut next = values.clone();
        f(&mut next);
        fs::write(&self.path, serde_json::to_string_pretty(&next)?)?;
        *values = next;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Anonymous,
    Authenticated(User),
    /// the backend rejected the token, the session was torn down
    Expired,
}

/// The process-wide login state.
///
/// Only login, logout and a rejected token write to it. Every request reads the token at send
/// time, so a login or logout between two requests is always picked up.
pub struct Session {
    store: Box<dyn SessionStore>,
    state: watch::Sender<AuthState>,
}

impl Session {
    pub fn new(store: impl SessionStore + 'static) -> Self {
        let initial = match (store.get(TOKEN_KEY), read_user(&store)) {
            (Some(_), Some(user)) => AuthState::Authenticated(user),
            _ => AuthState::Anonymous,
        };

        Self {
            store: Box::new(store),
            state: watch::channel(initial).0,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::default())
    }

    pub fn token(&self) -> Option<String> {
        self.store.get(TOKEN_KEY)
    }

    pub fn user(&self) -> Option<User> {
        read_user(&*self.store)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn store(&self, token: &AuthToken) -> Result<(), SessionError> {
        self.store.set(TOKEN_KEY, &token.access_token)?;
        self.store
            .set(USER_KEY, &serde_json::to_string(&token.user)?)?;

        info!(user = %token.user.email, "logged in");
        self.state
            .send_replace(AuthState::Authenticated(token.user.clone()));
        Ok(())
    }

    /// explicit logout
    pub fn clear(&self) -> Result<(), SessionError> {
        self.remove_all()?;
        info!("logged out");
        self.state.send_replace(AuthState::Anonymous);
        Ok(())
    }

    /// tears the session down after the backend rejected the token
    pub fn expire(&self) {
        if let Err(e) = self.remove_all() {
            warn!(error = %e, "failed to remove expired session");
        }
        info!("session expired");
        self.state.send_replace(AuthState::Expired);
    }

    /// Expires the session only if `token` is still the stored one.
    ///
    /// Returns whether the session was torn down.
    pub fn expire_if(&self, token: &str) -> bool {
        let current = self.token();
        if current.as_deref() != Some(token) {
            debug!("rejected token was already replaced");
            return false;
        }
        self.expire();
        true
    }

    fn remove_all(&self) -> Result<(), SessionError> {
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USER_KEY)
    }
}

fn read_user(store: &dyn SessionStore) -> Option<User> {
    let raw = store.get(USER_KEY)?;
    match serde_json::from_str(&raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable stored user");
            None
        }
    }
}
