//! Durable participant identities.
//!
//! Rows are keyed by the cross-session uuid when the platform supplies one,
//! else by userid. Updates never blank out an identifier already known.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Database;
use crate::platform::ParticipantIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub platform: String,
    pub uuid: Option<String>,
    pub userid: Option<String>,
    pub open_id: Option<String>,
    pub ms_open_id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl UserRecord {
    pub fn identity(&self) -> ParticipantIdentity {
        ParticipantIdentity {
            userid: self.userid.clone(),
            uuid: self.uuid.clone(),
            open_id: self.open_id.clone(),
            ms_open_id: self.ms_open_id.clone(),
            name: self.name.clone(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            platform: row.get(1)?,
            uuid: row.get(2)?,
            userid: row.get(3)?,
            open_id: row.get(4)?,
            ms_open_id: row.get(5)?,
            name: row.get(6)?,
            phone: row.get(7)?,
        })
    }
}

const USER_COLUMNS: &str = "id, platform, uuid, userid, open_id, ms_open_id, name, phone";

pub struct UserRepository;

impl UserRepository {
    /// Insert or update by uuid, else userid. Returns `None` when the
    /// identity carries neither.
    pub fn upsert(
        conn: &Connection,
        platform: &str,
        identity: &ParticipantIdentity,
        phone: Option<&str>,
    ) -> Result<Option<i64>> {
        if identity.external_key().is_none() {
            return Ok(None);
        }

        let mut existing = match &identity.uuid {
            Some(uuid) => Self::find_by_uuid(conn, platform, uuid)?,
            None => None,
        };
        if existing.is_none() {
            if let Some(userid) = &identity.userid {
                // A userid-only row may be claimed by the first uuid seen for it.
                existing = Self::find_by_userid(conn, platform, userid)?.filter(|record| {
                    record.uuid.is_none() || record.uuid == identity.uuid
                });
            }
        }

        match existing {
            Some(record) => {
                conn.execute(
                    "UPDATE users SET \
                     uuid = COALESCE(?1, uuid), userid = COALESCE(?2, userid), \
                     open_id = COALESCE(?3, open_id), ms_open_id = COALESCE(?4, ms_open_id), \
                     name = COALESCE(?5, name), phone = COALESCE(?6, phone), \
                     updated_at = CURRENT_TIMESTAMP WHERE id = ?7",
                    params![
                        identity.uuid,
                        identity.userid,
                        identity.open_id,
                        identity.ms_open_id,
                        identity.name,
                        phone,
                        record.id,
                    ],
                )
                .context("Failed to update user")?;
                Ok(Some(record.id))
            }
            None => {
                conn.execute(
                    "INSERT INTO users (platform, uuid, userid, open_id, ms_open_id, name, phone) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        platform,
                        identity.uuid,
                        identity.userid,
                        identity.open_id,
                        identity.ms_open_id,
                        identity.name,
                        phone,
                    ],
                )
                .context("Failed to insert user")?;
                Ok(Some(conn.last_insert_rowid()))
            }
        }
    }

    pub fn find_by_uuid(conn: &Connection, platform: &str, uuid: &str) -> Result<Option<UserRecord>> {
        Self::find_one(conn, "uuid", platform, uuid)
    }

    pub fn find_by_userid(
        conn: &Connection,
        platform: &str,
        userid: &str,
    ) -> Result<Option<UserRecord>> {
        Self::find_one(conn, "userid", platform, userid)
    }

    /// Most recently updated user carrying this display name.
    pub fn find_by_name(conn: &Connection, platform: &str, name: &str) -> Result<Option<UserRecord>> {
        Self::find_one(conn, "name", platform, name)
    }

    fn find_one(
        conn: &Connection,
        column: &str,
        platform: &str,
        value: &str,
    ) -> Result<Option<UserRecord>> {
        let sql = format!(
            "SELECT {} FROM users WHERE platform = ?1 AND {} = ?2 \
             ORDER BY updated_at DESC, id DESC LIMIT 1",
            USER_COLUMNS, column
        );
        conn.query_row(&sql, params![platform, value], UserRecord::from_row)
            .optional()
            .with_context(|| format!("Failed to query user by {}", column))
    }

    pub fn count(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")
    }
}

/// Identity store consulted by speaker resolution and written by handlers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn upsert(&self, identity: &ParticipantIdentity, phone: Option<&str>)
        -> Result<Option<i64>>;
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<UserRecord>>;
    async fn find_by_userid(&self, userid: &str) -> Result<Option<UserRecord>>;
    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>>;
}

/// [`UserStore`] over the service database, scoped to one platform.
#[derive(Clone)]
pub struct SqliteUserStore {
    db: Database,
    platform: String,
}

impl SqliteUserStore {
    pub fn new(db: Database, platform: impl Into<String>) -> Self {
        Self {
            db,
            platform: platform.into(),
        }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn upsert(
        &self,
        identity: &ParticipantIdentity,
        phone: Option<&str>,
    ) -> Result<Option<i64>> {
        let platform = self.platform.clone();
        let identity = identity.clone();
        let phone = phone.map(str::to_string);
        self.db
            .call(move |conn| UserRepository::upsert(conn, &platform, &identity, phone.as_deref()))
            .await
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<UserRecord>> {
        let platform = self.platform.clone();
        let uuid = uuid.to_string();
        self.db
            .call(move |conn| UserRepository::find_by_uuid(conn, &platform, &uuid))
            .await
    }

    async fn find_by_userid(&self, userid: &str) -> Result<Option<UserRecord>> {
        let platform = self.platform.clone();
        let userid = userid.to_string();
        self.db
            .call(move |conn| UserRepository::find_by_userid(conn, &platform, &userid))
            .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        let platform = self.platform.clone();
        let name = name.to_string();
        self.db
            .call(move |conn| UserRepository::find_by_name(conn, &platform, &name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn identity(uuid: Option<&str>, userid: Option<&str>, name: Option<&str>) -> ParticipantIdentity {
        ParticipantIdentity {
            uuid: uuid.map(str::to_string),
            userid: userid.map(str::to_string),
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_by_uuid_is_idempotent() {
        let conn = setup();
        let first = UserRepository::upsert(&conn, "tencent", &identity(Some("U1"), None, Some("Alice")), None)
            .unwrap()
            .unwrap();
        let second = UserRepository::upsert(
            &conn,
            "tencent",
            &identity(Some("U1"), Some("alice"), None),
            Some("555"),
        )
        .unwrap()
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(UserRepository::count(&conn).unwrap(), 1);

        let record = UserRepository::find_by_uuid(&conn, "tencent", "U1").unwrap().unwrap();
        // Name kept, userid and phone filled in.
        assert_eq!(record.name.as_deref(), Some("Alice"));
        assert_eq!(record.userid.as_deref(), Some("alice"));
        assert_eq!(record.phone.as_deref(), Some("555"));
    }

    #[test]
    fn test_upsert_falls_back_to_userid() {
        let conn = setup();
        UserRepository::upsert(&conn, "tencent", &identity(None, Some("bob"), Some("Bob")), None).unwrap();
        UserRepository::upsert(&conn, "tencent", &identity(None, Some("bob"), Some("Robert")), None).unwrap();

        assert_eq!(UserRepository::count(&conn).unwrap(), 1);
        let record = UserRepository::find_by_userid(&conn, "tencent", "bob").unwrap().unwrap();
        assert_eq!(record.name.as_deref(), Some("Robert"));
    }

    #[test]
    fn test_upsert_without_keys_is_skipped() {
        let conn = setup();
        let id = UserRepository::upsert(&conn, "tencent", &identity(None, None, Some("Ghost")), None).unwrap();
        assert_eq!(id, None);
        assert_eq!(UserRepository::count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_lookups_are_platform_scoped() {
        let conn = setup();
        UserRepository::upsert(&conn, "tencent", &identity(Some("U1"), None, Some("Alice")), None).unwrap();
        assert!(UserRepository::find_by_name(&conn, "tencent", "Alice").unwrap().is_some());
        assert!(UserRepository::find_by_name(&conn, "other", "Alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_user_store() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteUserStore::new(db, "tencent");
        store
            .upsert(&identity(Some("U9"), Some("carol"), Some("Carol")), None)
            .await
            .unwrap();

        let by_userid = store.find_by_userid("carol").await.unwrap().unwrap();
        assert_eq!(by_userid.uuid.as_deref(), Some("U9"));
        assert!(store.find_by_name("Carol").await.unwrap().is_some());
        assert!(store.find_by_uuid("missing").await.unwrap().is_none());
    }
}
