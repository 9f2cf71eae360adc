use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Vendor {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Validated, user-editable vendor fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorFields {
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

impl Vendor {
    pub fn fields(&self) -> VendorFields {
        VendorFields {
            name: self.name.clone(),
            contact_name: self.contact_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            category: self.category.clone(),
            address: self.address.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Owner-scoped vendor storage.
#[async_trait]
pub trait VendorRepo: Send + Sync {
    /// Newest first. `q` matches name, contact, email or category,
    /// case-insensitively.
    async fn list(
        &self,
        owner: Uuid,
        q: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Vendor>>;

    /// Every vendor of the owner, oldest first.
    async fn list_all(&self, owner: Uuid) -> anyhow::Result<Vec<Vendor>>;
    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Vendor>>;
    async fn create(&self, owner: Uuid, fields: &VendorFields) -> anyhow::Result<Vendor>;

    /// Inserts all rows in one transaction.
    async fn create_many(&self, owner: Uuid, rows: &[VendorFields]) -> anyhow::Result<Vec<Vendor>>;
    async fn update(
        &self,
        owner: Uuid,
        id: Uuid,
        fields: &VendorFields,
    ) -> anyhow::Result<Option<Vendor>>;
    async fn delete(&self, owner: Uuid, id: Uuid) -> anyhow::Result<bool>;
}

const VENDOR_COLUMNS: &str = "id, owner_id, name, contact_name, email, phone, category, \
                              address, notes, created_at, updated_at";

/// Escapes LIKE wildcards so user input matches literally.
fn like_pattern(q: &str) -> String {
    let escaped = q
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub struct PgVendorRepo {
    db: PgPool,
}

impl PgVendorRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VendorRepo for PgVendorRepo {
    async fn list(
        &self,
        owner: Uuid,
        q: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Vendor>> {
        let rows = sqlx::query_as::<_, Vendor>(&format!(
            r#"
            SELECT {VENDOR_COLUMNS}
            FROM vendors
            WHERE owner_id = $1
              AND ($2::TEXT IS NULL
                   OR name ILIKE $2
                   OR contact_name ILIKE $2
                   OR email ILIKE $2
                   OR category ILIKE $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(owner)
        .bind(q.map(like_pattern))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn list_all(&self, owner: Uuid) -> anyhow::Result<Vec<Vendor>> {
        let rows = sqlx::query_as::<_, Vendor>(&format!(
            "SELECT {VENDOR_COLUMNS} FROM vendors WHERE owner_id = $1 ORDER BY created_at, name"
        ))
        .bind(owner)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Vendor>> {
        let row = sqlx::query_as::<_, Vendor>(&format!(
            "SELECT {VENDOR_COLUMNS} FROM vendors WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn create(&self, owner: Uuid, f: &VendorFields) -> anyhow::Result<Vendor> {
        let row = sqlx::query_as::<_, Vendor>(&format!(
            r#"
            INSERT INTO vendors (owner_id, name, contact_name, email, phone, category, address, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {VENDOR_COLUMNS}
            "#
        ))
        .bind(owner)
        .bind(&f.name)
        .bind(&f.contact_name)
        .bind(&f.email)
        .bind(&f.phone)
        .bind(&f.category)
        .bind(&f.address)
        .bind(&f.notes)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn create_many(&self, owner: Uuid, rows: &[VendorFields]) -> anyhow::Result<Vec<Vendor>> {
        let mut tx = self.db.begin().await?;
        let mut created = Vec::with_capacity(rows.len());
        for f in rows {
            let row = sqlx::query_as::<_, Vendor>(&format!(
                r#"
                INSERT INTO vendors (owner_id, name, contact_name, email, phone, category, address, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {VENDOR_COLUMNS}
                "#
            ))
            .bind(owner)
            .bind(&f.name)
            .bind(&f.contact_name)
            .bind(&f.email)
            .bind(&f.phone)
            .bind(&f.category)
            .bind(&f.address)
            .bind(&f.notes)
            .fetch_one(&mut *tx)
            .await?;
            created.push(row);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn update(
        &self,
        owner: Uuid,
        id: Uuid,
        f: &VendorFields,
    ) -> anyhow::Result<Option<Vendor>> {
        let row = sqlx::query_as::<_, Vendor>(&format!(
            r#"
            UPDATE vendors
               SET name = $3, contact_name = $4, email = $5, phone = $6,
                   category = $7, address = $8, notes = $9, updated_at = now()
             WHERE id = $1 AND owner_id = $2
            RETURNING {VENDOR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(&f.name)
        .bind(&f.contact_name)
        .bind(&f.email)
        .bind(&f.phone)
        .bind(&f.category)
        .bind(&f.address)
        .bind(&f.notes)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM vendors WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
