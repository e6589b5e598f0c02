use sqlx::{Pool, Postgres};

pub async fn run_inline_migrations(pool: &Pool<Postgres>) {
    println!("📦 Running Migrations (Inline Schema)...");

    let schema_sql = r#"
        CREATE TYPE instance_status AS ENUM (
            'provisioning', 'active', 'failed', 'terminated'
        );
        CREATE TYPE volume_status AS ENUM (
            'creating', 'available', 'in-use', 'error', 'deleting'
        );
        CREATE TABLE IF NOT EXISTS volumes (
            id UUID PRIMARY KEY,
            remote_ref VARCHAR(255) UNIQUE NOT NULL,
            name VARCHAR(255) NOT NULL,
            size_gb INTEGER NOT NULL,
            bootable BOOLEAN NOT NULL DEFAULT FALSE,
            owner_id VARCHAR(255),
            status volume_status NOT NULL DEFAULT 'creating',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE TABLE IF NOT EXISTS instances (
            id UUID PRIMARY KEY,
            remote_ref VARCHAR(255) UNIQUE NOT NULL,
            name VARCHAR(255) NOT NULL,
            owner_id VARCHAR(255),
            availability_zone VARCHAR(255),
            status instance_status NOT NULL DEFAULT 'provisioning',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            terminated_at TIMESTAMPTZ
        );
        CREATE TABLE IF NOT EXISTS disks (
            id UUID PRIMARY KEY,
            instance_ref VARCHAR(255) NOT NULL,
            volume_ref VARCHAR(255) NOT NULL,
            device VARCHAR(64),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(instance_ref, volume_ref)
        );
        CREATE TABLE IF NOT EXISTS action_logs (
            id UUID PRIMARY KEY,
            action_type VARCHAR(100) NOT NULL,
            component VARCHAR(50) NOT NULL DEFAULT 'orchestrator',
            status VARCHAR(50) NOT NULL,
            instance_ref VARCHAR(255),
            error_message TEXT,
            metadata JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ,
            duration_ms BIGINT
        );
        CREATE INDEX IF NOT EXISTS idx_action_logs_created_at ON action_logs (created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_disks_instance_ref ON disks (instance_ref)
    "#;

    // CREATE TYPE has no IF NOT EXISTS; failures on re-run are expected.
    for statement in schema_sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            let _ = sqlx::query(stmt).execute(pool).await;
        }
    }

    println!("✅ Migrations up to date");
}
