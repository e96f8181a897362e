//! Ordered schema steps. Append only; never edit a released step.

pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users",
        statements: &[r#"
            CREATE TABLE "user" (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                verified BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
        "#],
    },
    Migration {
        version: 2,
        name: "applications",
        statements: &[
            r#"
            CREATE TABLE application (
                id UUID PRIMARY KEY,
                client_id TEXT NOT NULL UNIQUE,
                client_secret TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE refresh_token (
                token TEXT PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES "user"(id),
                app_id UUID NOT NULL REFERENCES application(id),
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        ],
    },
    Migration {
        version: 3,
        name: "rbac",
        statements: &[
            r#"
            CREATE TABLE user_permission (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES "user"(id),
                resource TEXT NOT NULL,
                action TEXT NOT NULL,
                effect TEXT NOT NULL CHECK (effect IN ('allow', 'deny'))
            )
            "#,
            "CREATE TABLE role (id UUID PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
            r#"
            CREATE TABLE role_permission (
                id UUID PRIMARY KEY,
                role_id UUID NOT NULL REFERENCES role(id),
                resource TEXT NOT NULL,
                action TEXT NOT NULL,
                effect TEXT NOT NULL CHECK (effect IN ('allow', 'deny'))
            )
            "#,
            r#"
            CREATE TABLE role_user (
                role_id UUID NOT NULL REFERENCES role(id),
                user_id UUID NOT NULL REFERENCES "user"(id),
                PRIMARY KEY (role_id, user_id)
            )
            "#,
            "CREATE INDEX user_permission_user_idx ON user_permission (user_id)",
        ],
    },
    Migration {
        version: 4,
        name: "organizations",
        statements: &[
            r#"
            CREATE TABLE organization (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE organization_permission (
                id UUID PRIMARY KEY,
                org_id UUID NOT NULL REFERENCES organization(id),
                resource TEXT NOT NULL,
                action TEXT NOT NULL,
                effect TEXT NOT NULL CHECK (effect IN ('allow', 'deny'))
            )
            "#,
            r#"
            CREATE TABLE organization_user (
                org_id UUID NOT NULL REFERENCES organization(id),
                user_id UUID NOT NULL REFERENCES "user"(id),
                PRIMARY KEY (org_id, user_id)
            )
            "#,
            "CREATE INDEX organization_user_user_idx ON organization_user (user_id)",
        ],
    },
];
