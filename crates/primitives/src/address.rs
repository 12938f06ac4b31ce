//! Address and range helpers for spreadsheet-style A1 labels.
//!
//! All coordinates here are 1-based `(column, row)` pairs.

use crate::CellLocation;

pub const MAX_ROW_COUNT: u32 = 1_048_576;
pub const MAX_COLUMN_COUNT: u32 = 16_384;

/// Converts column letters to a 1-based index (`"A"` => 1, `"AA"` => 27).
pub fn column_name_to_index(name: &str) -> Option<u32> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut result: u32 = 0;
    for ch in name.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let value = u32::from(ch.to_ascii_uppercase() as u8 - b'A' + 1);
        result = result.checked_mul(26)?.checked_add(value)?;
    }
    (result <= MAX_COLUMN_COUNT).then_some(result)
}

/// Converts a 1-based column index to letters (27 => `"AA"`).
pub fn column_index_to_name(index: u32) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Converts coordinates to a cell name (`(2, 3)` => `"B3"`).
pub fn coordinates_to_cell_name(col: u32, row: u32) -> Option<String> {
    if col == 0 || row == 0 || col > MAX_COLUMN_COUNT || row > MAX_ROW_COUNT {
        return None;
    }
    Some(format!("{}{}", column_index_to_name(col), row))
}

/// Parses a cell name (`"B3"`, `"$b$3"`) into `(column, row)`.
pub fn cell_name_to_coordinates(name: &str) -> Option<(u32, u32)> {
    let name = name.trim();
    let mut chars = name.chars().peekable();

    if chars.peek() == Some(&'$') {
        chars.next();
    }
    let mut col_letters = String::new();
    while let Some(ch) = chars.peek().copied() {
        if ch.is_ascii_alphabetic() {
            col_letters.push(ch);
            chars.next();
        } else {
            break;
        }
    }
    if chars.peek() == Some(&'$') {
        chars.next();
    }
    let mut row_digits = String::new();
    while let Some(ch) = chars.peek().copied() {
        if ch.is_ascii_digit() {
            row_digits.push(ch);
            chars.next();
        } else {
            break;
        }
    }
    if chars.peek().is_some()
        || col_letters.is_empty()
        || row_digits.is_empty()
        || row_digits.starts_with('0')
    {
        return None;
    }

    let col = column_name_to_index(&col_letters)?;
    let row = row_digits.parse::<u32>().ok()?;
    (row <= MAX_ROW_COUNT).then_some((col, row))
}

/// Parses a range string (`"A1:B3"`) into its normalized corners, so the
/// first location is always the top-left one.
pub fn cell_range_as_string_to_coordinates(range: &str) -> Option<(CellLocation, CellLocation)> {
    let (start, end) = range.split_once(':')?;
    let (c1, r1) = cell_name_to_coordinates(start)?;
    let (c2, r2) = cell_name_to_coordinates(end)?;
    Some(normalize_corners(
        CellLocation::new(c1, r1),
        CellLocation::new(c2, r2),
    ))
}

/// Get selection bounds from two opposite corners.
pub fn normalize_corners(a: CellLocation, b: CellLocation) -> (CellLocation, CellLocation) {
    (
        CellLocation::new(a.col.min(b.col), a.row.min(b.row)),
        CellLocation::new(a.col.max(b.col), a.row.max(b.row)),
    )
}
