use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{Vendor, VendorFields};
use crate::{auth::password::is_valid_email, error::AppError};

const MAX_NAME_LEN: usize = 200;
const MAX_FIELD_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct VendorQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub q: Option<String>,
}

fn default_limit() -> i64 {
    50
}

/// Body of create and replace. Blank optional fields are stored as null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorRequest {
    #[serde(default)]
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

fn clean(field: &'static str, v: Option<String>) -> Result<Option<String>, AppError> {
    let v = v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    if let Some(s) = &v {
        if s.chars().count() > MAX_FIELD_LEN {
            return Err(AppError::validation(field, format!("{field} is too long")));
        }
    }
    Ok(v)
}

impl VendorRequest {
    pub fn into_fields(self) -> Result<VendorFields, AppError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name", "Vendor name is required"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::validation("name", "Vendor name is too long"));
        }
        let email = clean("email", self.email)?;
        if let Some(e) = &email {
            if !is_valid_email(e) {
                return Err(AppError::validation("email", "Invalid email"));
            }
        }
        Ok(VendorFields {
            name,
            contact_name: clean("contact_name", self.contact_name)?,
            email,
            phone: clean("phone", self.phone)?,
            category: clean("category", self.category)?,
            address: clean("address", self.address)?,
            notes: clean("notes", self.notes)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct VendorResponse {
    pub id: Uuid,
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Vendor> for VendorResponse {
    fn from(v: Vendor) -> Self {
        Self {
            id: v.id,
            name: v.name,
            contact_name: v.contact_name,
            email: v.email,
            phone: v.phone,
            category: v.category,
            address: v.address,
            notes: v.notes,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RowError {
    /// 1-based spreadsheet row.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_fields_trims_and_nulls_blanks() {
        let f = VendorRequest {
            name: "  Acme Corp ".into(),
            contact_name: Some("   ".into()),
            email: Some(" sales@acme.io ".into()),
            phone: None,
            ..Default::default()
        }
        .into_fields()
        .unwrap();
        assert_eq!(f.name, "Acme Corp");
        assert_eq!(f.contact_name, None);
        assert_eq!(f.email.as_deref(), Some("sales@acme.io"));
    }

    #[test]
    fn into_fields_validates_name_and_email() {
        let missing = VendorRequest::default().into_fields();
        assert!(matches!(missing, Err(AppError::Validation { field: "name", .. })));

        let bad_email = VendorRequest {
            name: "Acme".into(),
            email: Some("not-an-email".into()),
            ..Default::default()
        }
        .into_fields();
        assert!(matches!(bad_email, Err(AppError::Validation { field: "email", .. })));
    }
}
