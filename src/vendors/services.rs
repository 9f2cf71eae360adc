use tracing::info;
use uuid::Uuid;

use super::{
    dto::{ImportResponse, VendorQuery, VendorRequest},
    excel::{vendors_from_xlsx, vendors_to_xlsx},
    repo::Vendor,
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// Rows accepted from one spreadsheet.
pub const MAX_IMPORT_ROWS: usize = 5000;

pub async fn list(st: &AppState, owner: Uuid, query: &VendorQuery) -> AppResult<Vec<Vendor>> {
    let q = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let rows = st
        .vendors
        .list(owner, q, query.limit.clamp(1, 200), query.offset.max(0))
        .await?;
    Ok(rows)
}

pub async fn get(st: &AppState, owner: Uuid, id: Uuid) -> AppResult<Vendor> {
    st.vendors
        .get(owner, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Vendor not found".into()))
}

pub async fn create(st: &AppState, owner: Uuid, req: VendorRequest) -> AppResult<Vendor> {
    let fields = req.into_fields()?;
    let vendor = st.vendors.create(owner, &fields).await?;
    info!(user_id = %owner, vendor_id = %vendor.id, "vendor created");
    Ok(vendor)
}

pub async fn update(st: &AppState, owner: Uuid, id: Uuid, req: VendorRequest) -> AppResult<Vendor> {
    let fields = req.into_fields()?;
    st.vendors
        .update(owner, id, &fields)
        .await?
        .ok_or_else(|| AppError::NotFound("Vendor not found".into()))
}

pub async fn delete(st: &AppState, owner: Uuid, id: Uuid) -> AppResult<()> {
    if !st.vendors.delete(owner, id).await? {
        return Err(AppError::NotFound("Vendor not found".into()));
    }
    info!(user_id = %owner, vendor_id = %id, "vendor deleted");
    Ok(())
}

pub async fn export(st: &AppState, owner: Uuid) -> AppResult<Vec<u8>> {
    let vendors = st.vendors.list_all(owner).await?;
    let bytes = vendors_to_xlsx(&vendors)?;
    info!(user_id = %owner, rows = vendors.len(), "vendors exported");
    Ok(bytes)
}

/// Creates a vendor for every valid row; invalid rows are reported and
/// skipped.
pub async fn import(st: &AppState, owner: Uuid, bytes: &[u8]) -> AppResult<ImportResponse> {
    let parsed = vendors_from_xlsx(bytes)?;
    if parsed.rows.len() > MAX_IMPORT_ROWS {
        return Err(AppError::validation(
            "file",
            format!("At most {MAX_IMPORT_ROWS} rows can be imported at once"),
        ));
    }
    let rows: Vec<_> = parsed.rows.into_iter().map(|(_, f)| f).collect();
    let created = if rows.is_empty() {
        Vec::new()
    } else {
        st.vendors.create_many(owner, &rows).await?
    };
    info!(
        user_id = %owner,
        imported = created.len(),
        skipped = parsed.errors.len(),
        "vendors imported"
    );
    Ok(ImportResponse {
        imported: created.len(),
        skipped: parsed.errors.len(),
        errors: parsed.errors,
    })
}
