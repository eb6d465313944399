//! Durable client-side storage: a key/value table standing in for browser
//! local storage, and a cookie table with expiry.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use axum_extra::extract::cookie::{Cookie, SameSite};
use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::error::StorageError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cookies (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    );
";

/// Handle to the storage database. Clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Writes all entries and one cookie in a single transaction. The cookie
    /// expires per its own max age or expiry date; without either it lives
    /// until removed.
    pub fn put_all(&self, entries: &[(&str, &str)], cookie: &Cookie<'_>) -> Result<(), StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )?;
        }
        let expires_at = cookie_expiry(cookie);
        tx.execute(
            "INSERT INTO cookies (name, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            (cookie.name(), cookie.value(), expires_at),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removes the given keys and cookie in a single transaction.
    pub fn remove_all(&self, keys: &[&str], cookie_name: &str) -> Result<(), StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        }
        tx.execute("DELETE FROM cookies WHERE name = ?1", [cookie_name])?;
        tx.commit()?;
        Ok(())
    }

    /// Returns the cookie if it exists and has not expired. The returned
    /// cookie carries the remaining lifetime as its max age.
    pub fn cookie(&self, name: &str) -> Result<Option<Cookie<'static>>, StorageError> {
        let conn = self.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, expires_at FROM cookies WHERE name = ?1",
                [name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        Ok(row
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, expires_at)| {
                Cookie::build((name.to_string(), value))
                    .path("/")
                    .same_site(SameSite::Lax)
                    .max_age(time::Duration::seconds(expires_at - now))
                    .build()
            }))
    }

    pub fn cleanup_expired_cookies(&self) -> Result<usize, StorageError> {
        let conn = self.lock();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let removed = conn.execute("DELETE FROM cookies WHERE expires_at <= ?1", [now])?;
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn expire_cookie(&self, name: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE cookies SET expires_at = 0 WHERE name = ?1",
            [name],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }
}

fn cookie_expiry(cookie: &Cookie<'_>) -> i64 {
    if let Some(max_age) = cookie.max_age() {
        (OffsetDateTime::now_utc() + max_age).unix_timestamp()
    } else if let Some(expires) = cookie.expires_datetime() {
        expires.unix_timestamp()
    } else {
        i64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_set_get_remove() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get("auth_token").unwrap(), None);

        store.set("auth_token", "abc").unwrap();
        store.set("auth_token", "def").unwrap();
        assert_eq!(store.get("auth_token").unwrap().as_deref(), Some("def"));

        store.remove("auth_token").unwrap();
        assert_eq!(store.get("auth_token").unwrap(), None);
    }

    #[test]
    fn put_all_and_remove_all() {
        let store = Store::open_in_memory().unwrap();
        let cookie = Cookie::new("auth_token", "abc");
        store
            .put_all(&[("auth_token", "abc"), ("auth_user", "{}")], &cookie)
            .unwrap();

        assert_eq!(store.get("auth_user").unwrap().as_deref(), Some("{}"));
        let stored = store.cookie("auth_token").unwrap().unwrap();
        assert_eq!(stored.value(), "abc");
        assert_eq!(stored.path(), Some("/"));

        store.remove_all(&["auth_token", "auth_user"], "auth_token").unwrap();
        assert_eq!(store.get("auth_token").unwrap(), None);
        assert_eq!(store.get("auth_user").unwrap(), None);
        assert!(store.cookie("auth_token").unwrap().is_none());
    }

    #[test]
    fn expired_cookie_is_hidden_and_cleaned() {
        let store = Store::open_in_memory().unwrap();
        let cookie = Cookie::new("auth_token", "abc");
        store.put_all(&[("auth_token", "abc")], &cookie).unwrap();
        store.expire_cookie("auth_token").unwrap();

        assert!(store.cookie("auth_token").unwrap().is_none());
        assert_eq!(store.cleanup_expired_cookies().unwrap(), 1);
    }

    #[test]
    fn cookie_expiry_follows_its_max_age() {
        let store = Store::open_in_memory().unwrap();
        let cookie = Cookie::build(("auth_token", "abc"))
            .max_age(time::Duration::seconds(90))
            .build();
        store.put_all(&[], &cookie).unwrap();

        let remaining = store.cookie("auth_token").unwrap().unwrap().max_age().unwrap();
        assert!(remaining > time::Duration::ZERO);
        assert!(remaining <= time::Duration::seconds(90));

        let spent = Cookie::build(("auth_token", "abc"))
            .max_age(time::Duration::ZERO)
            .build();
        store.put_all(&[], &spent).unwrap();
        assert!(store.cookie("auth_token").unwrap().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        Store::open(&path).unwrap().set("auth_token", "abc").unwrap();
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.get("auth_token").unwrap().as_deref(), Some("abc"));
    }
}
