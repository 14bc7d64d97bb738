use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("record is protected")] Protected,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait AdminRepo: Send + Sync {
    /// Exact, case-sensitive username match.
    async fn find_admin_by_username(&self, username: &str) -> RepoResult<Option<Admin>>;
    async fn any_admin_with_username(&self, username: &str) -> RepoResult<bool>;
    /// Fails with `Conflict` when the username is taken.
    async fn insert_admin(&self, new: NewAdmin) -> RepoResult<Admin>;
    async fn list_admins(&self) -> RepoResult<Vec<Admin>>;
    async fn update_admin(&self, id: Id, upd: UpdateAdmin) -> RepoResult<Admin>;
    /// Fails with `Protected` for the first administrator.
    async fn delete_admin(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait PageRepo: Send + Sync {
    async fn list_pages(&self) -> RepoResult<Vec<Page>>;
    async fn create_page(&self, new: NewPage) -> RepoResult<Page>;
    async fn update_page(&self, upd: UpdatePage) -> RepoResult<Page>;
}

#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    async fn apply_migrations(&self) -> RepoResult<()>;
}

pub trait Repo: AdminRepo + PageRepo + SchemaMigrator {}

impl<T> Repo for T where T: AdminRepo + PageRepo + SchemaMigrator {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{info, warn};

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        admins: BTreeMap<Id, Admin>,
        pages: BTreeMap<Id, Page>,
        next_admin_id: Id,
        next_page_id: Id,
    }

    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Ephemeral store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Store persisted as JSON at `path`, loaded if it already exists.
        pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        /// Persist under `PRIMROSE_DATA_DIR` when it is set.
        pub fn from_env() -> Self {
            match std::env::var("PRIMROSE_DATA_DIR") {
                Ok(dir) => Self::with_snapshot(Path::new(&dir).join("state.json")),
                Err(_) => Self::new(),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "failed to parse snapshot: {e}; starting empty");
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn read(&self) -> RwLockReadGuard<'_, State> {
            self.state.read().unwrap_or_else(PoisonError::into_inner)
        }

        fn write(&self) -> RwLockWriteGuard<'_, State> {
            self.state.write().unwrap_or_else(PoisonError::into_inner)
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match serde_json::to_vec_pretty(&*self.read()) {
                Ok(b) => b,
                Err(e) => {
                    warn!("failed to serialise snapshot: {e}");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path, bytes) {
                warn!(path = %path.display(), "failed to write snapshot: {e}");
            }
        }
    }

    #[async_trait]
    impl AdminRepo for InMemRepo {
        async fn find_admin_by_username(&self, username: &str) -> RepoResult<Option<Admin>> {
            let s = self.read();
            Ok(s.admins.values().find(|a| a.username == username).cloned())
        }

        async fn any_admin_with_username(&self, username: &str) -> RepoResult<bool> {
            Ok(self.read().admins.values().any(|a| a.username == username))
        }

        async fn insert_admin(&self, new: NewAdmin) -> RepoResult<Admin> {
            let mut s = self.write();
            if s.admins.values().any(|a| a.username == new.username) {
                return Err(RepoError::Conflict);
            }
            s.next_admin_id += 1;
            let admin = Admin {
                id: s.next_admin_id,
                username: new.username,
                password_hash: new.password_hash,
                is_admin: new.is_admin,
                role: new.role,
                created_at: new.created_at,
            };
            s.admins.insert(admin.id, admin.clone());
            drop(s);
            self.persist();
            Ok(admin)
        }

        async fn list_admins(&self) -> RepoResult<Vec<Admin>> {
            Ok(self.read().admins.values().cloned().collect())
        }

        async fn update_admin(&self, id: Id, upd: UpdateAdmin) -> RepoResult<Admin> {
            let mut s = self.write();
            let admin = s.admins.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(h) = upd.password_hash { admin.password_hash = h; }
            if let Some(r) = upd.role { admin.role = r; }
            if let Some(flag) = upd.is_admin { admin.is_admin = flag; }
            let updated = admin.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_admin(&self, id: Id) -> RepoResult<()> {
            if id == PROTECTED_ADMIN_ID {
                return Err(RepoError::Protected);
            }
            let mut s = self.write();
            s.admins.remove(&id).ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl PageRepo for InMemRepo {
        async fn list_pages(&self) -> RepoResult<Vec<Page>> {
            Ok(self.read().pages.values().cloned().collect())
        }

        async fn create_page(&self, new: NewPage) -> RepoResult<Page> {
            let mut s = self.write();
            s.next_page_id += 1;
            let page = Page { id: s.next_page_id, description: new.description, url: new.url };
            s.pages.insert(page.id, page.clone());
            drop(s);
            self.persist();
            Ok(page)
        }

        async fn update_page(&self, upd: UpdatePage) -> RepoResult<Page> {
            let mut s = self.write();
            let page = s.pages.get_mut(&upd.id).ok_or(RepoError::NotFound)?;
            page.description = upd.description;
            page.url = upd.url;
            let updated = page.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl SchemaMigrator for InMemRepo {
        async fn apply_migrations(&self) -> RepoResult<()> {
            Ok(())
        }
    }
}

#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::connection::parse_segments;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{Pool, Postgres};

    fn map_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            other => RepoError::Internal(other.to_string()),
        }
    }

    /// Map a `Key=Value;` connection string onto Postgres options.
    pub fn connect_options(conn: &str) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new();
        for (k, v) in parse_segments(conn) {
            opts = match k.as_str() {
                "server" | "host" | "data source" => match v.split_once(',') {
                    Some((host, port)) => match port.trim().parse::<u16>() {
                        Ok(p) => opts.host(host.trim()).port(p),
                        Err(_) => opts.host(host.trim()),
                    },
                    None => opts.host(&v),
                },
                "port" => match v.parse::<u16>() {
                    Ok(p) => opts.port(p),
                    Err(_) => opts,
                },
                "database" | "initial catalog" => opts.database(&v),
                "user" | "user id" | "username" | "uid" => opts.username(&v),
                "password" | "pwd" => opts.password(&v),
                _ => opts,
            };
        }
        opts
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub fn connect_lazy(conn: &str) -> Self {
            let pool = PgPoolOptions::new().max_connections(5).connect_lazy_with(connect_options(conn));
            Self::new(pool)
        }
    }

    const ADMIN_COLUMNS: &str = "id, username, password_hash, is_admin, role, created_at";

    #[async_trait]
    impl AdminRepo for PgRepo {
        async fn find_admin_by_username(&self, username: &str) -> RepoResult<Option<Admin>> {
            sqlx::query_as::<_, Admin>(&format!("SELECT {ADMIN_COLUMNS} FROM admins WHERE username = $1"))
                .bind(username)
                .fetch_optional(&self.pool).await.map_err(map_err)
        }

        async fn any_admin_with_username(&self, username: &str) -> RepoResult<bool> {
            let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM admins WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(exists)
        }

        async fn insert_admin(&self, new: NewAdmin) -> RepoResult<Admin> {
            sqlx::query_as::<_, Admin>(&format!(
                "INSERT INTO admins (username, password_hash, is_admin, role, created_at) VALUES ($1,$2,$3,$4,$5) RETURNING {ADMIN_COLUMNS}"
            ))
            .bind(&new.username).bind(&new.password_hash).bind(new.is_admin).bind(&new.role).bind(new.created_at)
            .fetch_one(&self.pool).await.map_err(map_err)
        }

        async fn list_admins(&self) -> RepoResult<Vec<Admin>> {
            sqlx::query_as::<_, Admin>(&format!("SELECT {ADMIN_COLUMNS} FROM admins ORDER BY id"))
                .fetch_all(&self.pool).await.map_err(map_err)
        }

        async fn update_admin(&self, id: Id, upd: UpdateAdmin) -> RepoResult<Admin> {
            sqlx::query_as::<_, Admin>(&format!(
                "UPDATE admins SET password_hash = COALESCE($2, password_hash), role = COALESCE($3, role), is_admin = COALESCE($4, is_admin) WHERE id = $1 RETURNING {ADMIN_COLUMNS}"
            ))
            .bind(id).bind(upd.password_hash.as_ref()).bind(upd.role.as_ref()).bind(upd.is_admin)
            .fetch_one(&self.pool).await.map_err(map_err)
        }

        async fn delete_admin(&self, id: Id) -> RepoResult<()> {
            if id == PROTECTED_ADMIN_ID {
                return Err(RepoError::Protected);
            }
            let res = sqlx::query("DELETE FROM admins WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl PageRepo for PgRepo {
        async fn list_pages(&self) -> RepoResult<Vec<Page>> {
            sqlx::query_as::<_, Page>("SELECT id, description, url FROM pages ORDER BY id")
                .fetch_all(&self.pool).await.map_err(map_err)
        }

        async fn create_page(&self, new: NewPage) -> RepoResult<Page> {
            sqlx::query_as::<_, Page>("INSERT INTO pages (description, url) VALUES ($1,$2) RETURNING id, description, url")
                .bind(&new.description).bind(&new.url)
                .fetch_one(&self.pool).await.map_err(map_err)
        }

        async fn update_page(&self, upd: UpdatePage) -> RepoResult<Page> {
            sqlx::query_as::<_, Page>("UPDATE pages SET description = $2, url = $3 WHERE id = $1 RETURNING id, description, url")
                .bind(upd.id).bind(&upd.description).bind(&upd.url)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
    }

    #[async_trait]
    impl SchemaMigrator for PgRepo {
        async fn apply_migrations(&self) -> RepoResult<()> {
            sqlx::migrate!("./migrations")
                .run(&self.pool).await
                .map_err(|e| RepoError::Internal(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::connect_options;

        #[test]
        fn options_from_key_value_string() {
            let o = connect_options("Server=db,5433;Database=primrose;User=app;Password=pw;");
            assert_eq!(o.get_host(), "db");
            assert_eq!(o.get_port(), 5433);
            assert_eq!(o.get_database(), Some("primrose"));
            assert_eq!(o.get_username(), "app");
        }
    }
}
