//! `.xlsx` export and import of vendor lists.
//!
//! Export writes one header row followed by one row per vendor. Import maps
//! columns by header name (case-insensitive, with a few common aliases), so
//! column order and extra columns do not matter.

use std::{collections::HashMap, io::Cursor};

use anyhow::Context;
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook};

use super::{
    dto::{RowError, VendorRequest},
    repo::{Vendor, VendorFields},
};
use crate::error::AppError;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Name,
    ContactName,
    Email,
    Phone,
    Category,
    Address,
    Notes,
}

const COLUMNS: [(Column, &str, f64); 7] = [
    (Column::Name, "Name", 30.0),
    (Column::ContactName, "Contact Name", 24.0),
    (Column::Email, "Email", 30.0),
    (Column::Phone, "Phone", 18.0),
    (Column::Category, "Category", 18.0),
    (Column::Address, "Address", 40.0),
    (Column::Notes, "Notes", 50.0),
];

impl Column {
    fn from_header(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "name" | "vendor" | "vendor_name" | "company" | "company_name" => Some(Column::Name),
            "contact" | "contact_name" | "contact_person" => Some(Column::ContactName),
            "email" | "e_mail" | "email_address" => Some(Column::Email),
            "phone" | "phone_number" | "telephone" | "tel" => Some(Column::Phone),
            "category" | "type" => Some(Column::Category),
            "address" => Some(Column::Address),
            "notes" | "note" | "comments" => Some(Column::Notes),
            _ => None,
        }
    }

    fn value(self, f: &VendorFields) -> Option<&str> {
        match self {
            Column::Name => Some(f.name.as_str()),
            Column::ContactName => f.contact_name.as_deref(),
            Column::Email => f.email.as_deref(),
            Column::Phone => f.phone.as_deref(),
            Column::Category => f.category.as_deref(),
            Column::Address => f.address.as_deref(),
            Column::Notes => f.notes.as_deref(),
        }
    }
}

pub fn vendors_to_xlsx(vendors: &[Vendor]) -> anyhow::Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Vendors")?;
        for (col, (_, title, width)) in COLUMNS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &header)?;
            sheet.set_column_width(col as u16, *width)?;
        }
        sheet.set_freeze_panes(1, 0)?;

        for (i, vendor) in vendors.iter().enumerate() {
            let fields = vendor.fields();
            let row = (i + 1) as u32;
            for (col, (column, _, _)) in COLUMNS.iter().enumerate() {
                if let Some(v) = column.value(&fields) {
                    sheet.write_string(row, col as u16, v)?;
                }
            }
        }
    }
    workbook.save_to_buffer().context("serialize workbook")
}

/// Valid rows (with their spreadsheet row numbers) and per-row errors.
#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub rows: Vec<(usize, VendorFields)>,
    pub errors: Vec<RowError>,
}

pub fn vendors_from_xlsx(bytes: &[u8]) -> Result<ParsedSheet, AppError> {
    let unreadable = |_| AppError::validation("file", "File is not a readable .xlsx workbook");

    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).map_err(unreadable)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::validation("file", "Workbook has no sheets"))?
        .map_err(unreadable)?;

    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(ParsedSheet::default());
    };

    let columns: HashMap<Column, usize> = header
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| Column::from_header(&cell.to_string()).map(|c| (c, i)))
        .rev() // first occurrence wins
        .collect();
    if !columns.contains_key(&Column::Name) {
        return Err(AppError::validation("file", "Missing required column: Name"));
    }

    let mut parsed = ParsedSheet::default();
    for (i, cells) in rows.enumerate() {
        // header is row first_row + 1 in 1-based numbering
        let row_number = first_row + i + 2;
        if cells.iter().all(|c| cell_text(c).is_none()) {
            continue;
        }
        let get = |col: Column| {
            columns
                .get(&col)
                .and_then(|&idx| cells.get(idx))
                .and_then(cell_text)
        };
        let request = VendorRequest {
            name: get(Column::Name).unwrap_or_default(),
            contact_name: get(Column::ContactName),
            email: get(Column::Email),
            phone: get(Column::Phone),
            category: get(Column::Category),
            address: get(Column::Address),
            notes: get(Column::Notes),
        };
        match request.into_fields() {
            Ok(fields) => parsed.rows.push((row_number, fields)),
            Err(e) => parsed.errors.push(RowError {
                row: row_number,
                message: e.to_string(),
            }),
        }
    }
    Ok(parsed)
}

fn cell_text(cell: &Data) -> Option<String> {
    let s = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    };
    (!s.is_empty()).then_some(s)
}
