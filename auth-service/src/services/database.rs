//! Relational storage for users, applications, refresh tokens, permissions
//! and organizations.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::ServiceError;
use crate::models::{Application, Organization, Permission, RefreshToken, Role, User};

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    // ==================== Users ====================

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, ServiceError>;
    async fn list_users(&self) -> Result<Vec<User>, ServiceError>;
    async fn set_user_verified(&self, id: Uuid) -> Result<(), ServiceError>;
    async fn update_user_password(&self, id: Uuid, encoded: &str) -> Result<(), ServiceError>;

    // ==================== Applications ====================

    async fn insert_application(&self, app: &Application) -> Result<(), ServiceError>;
    async fn find_application(&self, id: Uuid) -> Result<Option<Application>, ServiceError>;
    async fn find_application_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Application>, ServiceError>;
    async fn list_applications(&self) -> Result<Vec<Application>, ServiceError>;
    /// Persist name, description, redirect URI and secret of `app`.
    async fn update_application(&self, app: &Application) -> Result<(), ServiceError>;
    /// Delete the application, its refresh tokens and every user permission
    /// on exactly `resource`. Returns the users who lost a permission, or
    /// `None` when the application did not exist.
    async fn delete_application(
        &self,
        id: Uuid,
        resource: &str,
    ) -> Result<Option<Vec<Uuid>>, ServiceError>;

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError>;
    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, ServiceError>;
    async fn delete_refresh_token(&self, token: &str) -> Result<bool, ServiceError>;

    // ==================== Permissions ====================

    async fn list_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, ServiceError>;
    async fn insert_user_permission(&self, permission: &Permission) -> Result<(), ServiceError>;
    async fn delete_user_permission(&self, user_id: Uuid, id: Uuid) -> Result<bool, ServiceError>;

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError>;
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, ServiceError>;
    async fn insert_role_permission(&self, permission: &Permission) -> Result<(), ServiceError>;
    async fn add_role_user(&self, role_id: Uuid, user_id: Uuid) -> Result<(), ServiceError>;
    /// Permissions of every role `user_id` holds.
    async fn list_role_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError>;

    // ==================== Organizations ====================

    async fn insert_organization(&self, org: &Organization) -> Result<(), ServiceError>;
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, ServiceError>;
    async fn list_organizations(&self) -> Result<Vec<Organization>, ServiceError>;
    /// Delete memberships, then permissions, then the organization row.
    async fn delete_organization(&self, id: Uuid) -> Result<bool, ServiceError>;
    async fn add_organization_member(&self, org_id: Uuid, user_id: Uuid)
        -> Result<(), ServiceError>;
    async fn remove_organization_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError>;
    async fn list_organization_members(&self, org_id: Uuid) -> Result<Vec<User>, ServiceError>;
    async fn list_organization_permissions(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError>;
    async fn insert_organization_permission(
        &self,
        permission: &Permission,
    ) -> Result<(), ServiceError>;
    async fn delete_organization_permission(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<bool, ServiceError>;
    /// Permissions of every organization `user_id` is a member of.
    async fn list_organization_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError>;
}

fn db_error(e: sqlx::Error) -> ServiceError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return ServiceError::DuplicateEntity;
        }
    }
    ServiceError::Database(anyhow::anyhow!(e))
}

/// PostgreSQL implementation of [`AuthStore`].
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_returning_count(
        &self,
        sql: &str,
        a: Uuid,
        b: Option<Uuid>,
    ) -> Result<bool, ServiceError> {
        let mut query = sqlx::query(sql).bind(a);
        if let Some(b) = b {
            query = query.bind(b);
        }
        let result = query.execute(&self.pool).await.map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuthStore for Database {
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                db_error(e)
            })?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO "user" (id, name, email, password, verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        sqlx::query_as::<_, User>(r#"SELECT * FROM "user" WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        sqlx::query_as::<_, User>(r#"SELECT * FROM "user" WHERE email = LOWER($1)"#)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, ServiceError> {
        sqlx::query_as::<_, User>(r#"SELECT * FROM "user" WHERE name = $1 LIMIT 1"#)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        sqlx::query_as::<_, User>(r#"SELECT * FROM "user" ORDER BY created_at"#)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn set_user_verified(&self, id: Uuid) -> Result<(), ServiceError> {
        sqlx::query(r#"UPDATE "user" SET verified = TRUE, updated_at = NOW() WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn update_user_password(&self, id: Uuid, encoded: &str) -> Result<(), ServiceError> {
        sqlx::query(r#"UPDATE "user" SET password = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(id)
            .bind(encoded)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn insert_application(&self, app: &Application) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO application (id, client_id, client_secret, redirect_uri, name, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(app.id)
        .bind(&app.client_id)
        .bind(&app.client_secret)
        .bind(&app.redirect_uri)
        .bind(&app.name)
        .bind(&app.description)
        .bind(app.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_application(&self, id: Uuid) -> Result<Option<Application>, ServiceError> {
        sqlx::query_as::<_, Application>("SELECT * FROM application WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn find_application_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Application>, ServiceError> {
        sqlx::query_as::<_, Application>("SELECT * FROM application WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn list_applications(&self) -> Result<Vec<Application>, ServiceError> {
        sqlx::query_as::<_, Application>("SELECT * FROM application ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn update_application(&self, app: &Application) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE application
            SET name = $2, description = $3, redirect_uri = $4, client_secret = $5
            WHERE id = $1
            "#,
        )
        .bind(app.id)
        .bind(&app.name)
        .bind(&app.description)
        .bind(&app.redirect_uri)
        .bind(&app.client_secret)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_application(
        &self,
        id: Uuid,
        resource: &str,
    ) -> Result<Option<Vec<Uuid>>, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("DELETE FROM refresh_token WHERE app_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        let deleted = sqlx::query("DELETE FROM application WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();
        if deleted == 0 {
            // Dropping the transaction rolls it back
            return Ok(None);
        }
        let mut affected: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM user_permission WHERE resource = $1 RETURNING user_id")
                .bind(resource)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        affected.sort();
        affected.dedup();
        Ok(Some(affected))
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO refresh_token (token, user_id, app_id, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.app_id)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, ServiceError> {
        sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_token WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, ServiceError> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, ServiceError> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, user_id AS owner_id, resource, action, effect FROM user_permission WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn insert_user_permission(&self, permission: &Permission) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO user_permission (id, user_id, resource, action, effect) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(permission.id)
        .bind(permission.owner_id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.effect)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_user_permission(&self, user_id: Uuid, id: Uuid) -> Result<bool, ServiceError> {
        self.execute_returning_count(
            "DELETE FROM user_permission WHERE user_id = $1 AND id = $2",
            user_id,
            Some(id),
        )
        .await
    }

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        sqlx::query("INSERT INTO role (id, name) VALUES ($1, $2)")
            .bind(role.id)
            .bind(&role.name)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, ServiceError> {
        sqlx::query_as::<_, Role>("SELECT id, name FROM role WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn insert_role_permission(&self, permission: &Permission) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO role_permission (id, role_id, resource, action, effect) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(permission.id)
        .bind(permission.owner_id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.effect)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn add_role_user(&self, role_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query("INSERT INTO role_user (role_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(role_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_role_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        sqlx::query_as::<_, Permission>(
            r#"
            SELECT rp.id, rp.role_id AS owner_id, rp.resource, rp.action, rp.effect
            FROM role_permission rp
            JOIN role_user ru ON ru.role_id = rp.role_id
            WHERE ru.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO organization (id, name, description, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.description)
        .bind(org.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, ServiceError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organization WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, ServiceError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organization ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn delete_organization(&self, id: Uuid) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for sql in [
            "DELETE FROM organization_user WHERE org_id = $1",
            "DELETE FROM organization_permission WHERE org_id = $1",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        let deleted = sqlx::query("DELETE FROM organization WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();
        tx.commit().await.map_err(db_error)?;
        Ok(deleted > 0)
    }

    async fn add_organization_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO organization_user (org_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(org_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn remove_organization_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        self.execute_returning_count(
            "DELETE FROM organization_user WHERE org_id = $1 AND user_id = $2",
            org_id,
            Some(user_id),
        )
        .await
    }

    async fn list_organization_members(&self, org_id: Uuid) -> Result<Vec<User>, ServiceError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM "user" u
            JOIN organization_user ou ON ou.user_id = u.id
            WHERE ou.org_id = $1
            ORDER BY u.name
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn list_organization_permissions(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, org_id AS owner_id, resource, action, effect FROM organization_permission WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn insert_organization_permission(
        &self,
        permission: &Permission,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO organization_permission (id, org_id, resource, action, effect) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(permission.id)
        .bind(permission.owner_id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.effect)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_organization_permission(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<bool, ServiceError> {
        self.execute_returning_count(
            "DELETE FROM organization_permission WHERE org_id = $1 AND id = $2",
            org_id,
            Some(id),
        )
        .await
    }

    async fn list_organization_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        sqlx::query_as::<_, Permission>(
            r#"
            SELECT op.id, op.org_id AS owner_id, op.resource, op.action, op.effect
            FROM organization_permission op
            JOIN organization_user ou ON ou.org_id = op.org_id
            WHERE ou.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }
}

#[derive(Default)]
struct MockData {
    users: Vec<User>,
    applications: Vec<Application>,
    refresh_tokens: Vec<RefreshToken>,
    user_permissions: Vec<Permission>,
    roles: Vec<Role>,
    role_permissions: Vec<Permission>,
    role_users: Vec<(Uuid, Uuid)>,
    organizations: Vec<Organization>,
    organization_permissions: Vec<Permission>,
    organization_users: Vec<(Uuid, Uuid)>,
}

/// In-memory [`AuthStore`] for tests. Clones share state.
#[derive(Clone, Default)]
pub struct MockStore {
    data: Arc<Mutex<MockData>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockData) -> T) -> Result<T, ServiceError> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| ServiceError::Database(anyhow::anyhow!("mock store poisoned: {}", e)))?;
        Ok(f(&mut data))
    }
}

fn remove_where<T>(rows: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> bool {
    let before = rows.len();
    rows.retain(|row| !pred(row));
    rows.len() != before
}

#[async_trait]
impl AuthStore for MockStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        self.with(|d| {
            if d.users.iter().any(|u| u.email == user.email || u.id == user.id) {
                return Err(ServiceError::DuplicateEntity);
            }
            d.users.push(user.clone());
            Ok(())
        })?
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        self.with(|d| d.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let email = email.to_lowercase();
        self.with(|d| d.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, ServiceError> {
        self.with(|d| d.users.iter().find(|u| u.name == name).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        self.with(|d| d.users.clone())
    }

    async fn set_user_verified(&self, id: Uuid) -> Result<(), ServiceError> {
        self.with(|d| {
            if let Some(user) = d.users.iter_mut().find(|u| u.id == id) {
                user.verified = true;
                user.updated_at = chrono::Utc::now();
            }
        })
    }

    async fn update_user_password(&self, id: Uuid, encoded: &str) -> Result<(), ServiceError> {
        self.with(|d| {
            if let Some(user) = d.users.iter_mut().find(|u| u.id == id) {
                user.password = encoded.to_string();
                user.updated_at = chrono::Utc::now();
            }
        })
    }

    async fn insert_application(&self, app: &Application) -> Result<(), ServiceError> {
        self.with(|d| {
            if d.applications.iter().any(|a| a.client_id == app.client_id) {
                return Err(ServiceError::DuplicateEntity);
            }
            d.applications.push(app.clone());
            Ok(())
        })?
    }

    async fn find_application(&self, id: Uuid) -> Result<Option<Application>, ServiceError> {
        self.with(|d| d.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn find_application_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Application>, ServiceError> {
        self.with(|d| {
            d.applications
                .iter()
                .find(|a| a.client_id == client_id)
                .cloned()
        })
    }

    async fn list_applications(&self) -> Result<Vec<Application>, ServiceError> {
        self.with(|d| d.applications.clone())
    }

    async fn update_application(&self, app: &Application) -> Result<(), ServiceError> {
        self.with(|d| {
            if let Some(existing) = d.applications.iter_mut().find(|a| a.id == app.id) {
                *existing = app.clone();
            }
        })
    }

    async fn delete_application(
        &self,
        id: Uuid,
        resource: &str,
    ) -> Result<Option<Vec<Uuid>>, ServiceError> {
        self.with(|d| {
            if !remove_where(&mut d.applications, |a| a.id == id) {
                return None;
            }
            remove_where(&mut d.refresh_tokens, |t| t.app_id == id);
            let mut affected: Vec<Uuid> = d
                .user_permissions
                .iter()
                .filter(|p| p.resource == resource)
                .map(|p| p.owner_id)
                .collect();
            remove_where(&mut d.user_permissions, |p| p.resource == resource);
            affected.sort();
            affected.dedup();
            Some(affected)
        })
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        self.with(|d| d.refresh_tokens.push(token.clone()))
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, ServiceError> {
        self.with(|d| d.refresh_tokens.iter().find(|t| t.token == token).cloned())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, ServiceError> {
        self.with(|d| remove_where(&mut d.refresh_tokens, |t| t.token == token))
    }

    async fn list_user_permissions(&self, user_id: Uuid) -> Result<Vec<Permission>, ServiceError> {
        self.with(|d| {
            d.user_permissions
                .iter()
                .filter(|p| p.owner_id == user_id)
                .cloned()
                .collect()
        })
    }

    async fn insert_user_permission(&self, permission: &Permission) -> Result<(), ServiceError> {
        self.with(|d| d.user_permissions.push(permission.clone()))
    }

    async fn delete_user_permission(&self, user_id: Uuid, id: Uuid) -> Result<bool, ServiceError> {
        self.with(|d| {
            remove_where(&mut d.user_permissions, |p| {
                p.owner_id == user_id && p.id == id
            })
        })
    }

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        self.with(|d| {
            if d.roles.iter().any(|r| r.name == role.name) {
                return Err(ServiceError::DuplicateEntity);
            }
            d.roles.push(role.clone());
            Ok(())
        })?
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, ServiceError> {
        self.with(|d| d.roles.iter().find(|r| r.name == name).cloned())
    }

    async fn insert_role_permission(&self, permission: &Permission) -> Result<(), ServiceError> {
        self.with(|d| d.role_permissions.push(permission.clone()))
    }

    async fn add_role_user(&self, role_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        self.with(|d| {
            if !d.role_users.contains(&(role_id, user_id)) {
                d.role_users.push((role_id, user_id));
            }
        })
    }

    async fn list_role_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        self.with(|d| {
            d.role_permissions
                .iter()
                .filter(|p| d.role_users.contains(&(p.owner_id, user_id)))
                .cloned()
                .collect()
        })
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), ServiceError> {
        self.with(|d| {
            if d.organizations.iter().any(|o| o.name == org.name) {
                return Err(ServiceError::DuplicateEntity);
            }
            d.organizations.push(org.clone());
            Ok(())
        })?
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, ServiceError> {
        self.with(|d| d.organizations.iter().find(|o| o.id == id).cloned())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, ServiceError> {
        self.with(|d| d.organizations.clone())
    }

    async fn delete_organization(&self, id: Uuid) -> Result<bool, ServiceError> {
        self.with(|d| {
            remove_where(&mut d.organization_users, |(org, _)| *org == id);
            remove_where(&mut d.organization_permissions, |p| p.owner_id == id);
            remove_where(&mut d.organizations, |o| o.id == id)
        })
    }

    async fn add_organization_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.with(|d| {
            if !d.organization_users.contains(&(org_id, user_id)) {
                d.organization_users.push((org_id, user_id));
            }
        })
    }

    async fn remove_organization_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        self.with(|d| {
            remove_where(&mut d.organization_users, |m| *m == (org_id, user_id))
        })
    }

    async fn list_organization_members(&self, org_id: Uuid) -> Result<Vec<User>, ServiceError> {
        self.with(|d| {
            d.users
                .iter()
                .filter(|u| d.organization_users.contains(&(org_id, u.id)))
                .cloned()
                .collect()
        })
    }

    async fn list_organization_permissions(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        self.with(|d| {
            d.organization_permissions
                .iter()
                .filter(|p| p.owner_id == org_id)
                .cloned()
                .collect()
        })
    }

    async fn insert_organization_permission(
        &self,
        permission: &Permission,
    ) -> Result<(), ServiceError> {
        self.with(|d| d.organization_permissions.push(permission.clone()))
    }

    async fn delete_organization_permission(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<bool, ServiceError> {
        self.with(|d| {
            remove_where(&mut d.organization_permissions, |p| {
                p.owner_id == org_id && p.id == id
            })
        })
    }

    async fn list_organization_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        self.with(|d| {
            d.organization_permissions
                .iter()
                .filter(|p| d.organization_users.contains(&(p.owner_id, user_id)))
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Effect;

    #[tokio::test]
    async fn test_mock_rejects_duplicate_email() {
        let store = MockStore::new();
        store
            .insert_user(&User::new("a".into(), "A@Example.com".into(), "h".into()))
            .await
            .unwrap();
        let dup = User::new("b".into(), "a@example.com".into(), "h".into());
        assert!(matches!(
            store.insert_user(&dup).await,
            Err(ServiceError::DuplicateEntity)
        ));
    }

    #[tokio::test]
    async fn test_mock_org_delete_cascades() {
        let store = MockStore::new();
        let org = Organization::new("acme".into(), String::new());
        let user = User::new("u".into(), "u@example.com".into(), "h".into());
        store.insert_user(&user).await.unwrap();
        store.insert_organization(&org).await.unwrap();
        store.add_organization_member(org.id, user.id).await.unwrap();
        store
            .insert_organization_permission(&Permission::new(org.id, "/x", "read", Effect::Allow))
            .await
            .unwrap();

        assert_eq!(
            store.list_organization_permissions_for_user(user.id).await.unwrap().len(),
            1
        );
        assert!(store.delete_organization(org.id).await.unwrap());
        assert!(store.list_organization_members(org.id).await.unwrap().is_empty());
        assert!(store
            .list_organization_permissions_for_user(user.id)
            .await
            .unwrap()
            .is_empty());
        assert!(!store.delete_organization(org.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_application_delete_revokes_grants() {
        let store = MockStore::new();
        let owner = User::new("o".into(), "o@example.com".into(), "h".into());
        store.insert_user(&owner).await.unwrap();
        let app = Application::new("a".into(), String::new(), "https://a.example.com/cb".into(), "h".into());
        store.insert_application(&app).await.unwrap();
        store
            .insert_user_permission(&Permission::new(owner.id, &app.resource(), "*", Effect::Allow))
            .await
            .unwrap();
        store
            .insert_user_permission(&Permission::new(owner.id, "/org", "create", Effect::Allow))
            .await
            .unwrap();

        let affected = store.delete_application(app.id, &app.resource()).await.unwrap();
        assert_eq!(affected, Some(vec![owner.id]));
        let remaining = store.list_user_permissions(owner.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].resource, "/org");

        assert_eq!(store.delete_application(app.id, &app.resource()).await.unwrap(), None);
    }
}
