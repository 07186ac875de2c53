use std::cmp::Ordering;

use crate::row::{CellValue, RowData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SortCriterion {
    pub attribute: String,
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Multi-criteria row comparison. A field absent from a row counts as
/// [`CellValue::Missing`], which sorts last in ascending order.
pub fn compare_rows(a: &RowData, b: &RowData, criteria: &[SortCriterion]) -> Ordering {
    for criterion in criteria {
        let left = a.get(&criterion.attribute).unwrap_or(&CellValue::Missing);
        let right = b.get(&criterion.attribute).unwrap_or(&CellValue::Missing);
        let ordering = match criterion.direction {
            SortDirection::Ascending => left.compare(right),
            SortDirection::Descending => right.compare(left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
