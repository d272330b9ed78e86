use std::cmp::Ordering;

use crate::model::{ResourceKind, RowEvent, TableData};

const AGE_COLUMN: &str = "AGE";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SortColumn {
    pub index: usize,
    pub column_count: usize,
    pub ascending: bool,
}

impl SortColumn {
    pub fn new(index: usize, column_count: usize, ascending: bool) -> Self {
        Self {
            index,
            column_count,
            ascending,
        }
    }

    /// Sort on the column `offset` places right of the kind's NAME column.
    pub fn relative(kind: ResourceKind, offset: usize, ascending: bool) -> Self {
        Self::new(
            kind.name_column() + offset,
            kind.header().len(),
            ascending,
        )
    }

    pub fn by_name(kind: ResourceKind) -> Self {
        Self::relative(kind, 0, true)
    }
}

/// Returns the rows of `table` ordered by `sort`.
///
/// The sort is stable: rows with equal keys keep their snapshot order, in
/// both directions.
pub fn sorted_rows<'a>(table: &'a TableData, sort: SortColumn) -> Vec<&'a RowEvent> {
    let mut rows = table.rows().iter().collect::<Vec<_>>();
    sort_rows(&mut rows, sort, CellOrder::of(table, sort.index));
    rows
}

/// How the cells of one column compare.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum CellOrder {
    Text,
    Numeric,
    Age,
}

impl CellOrder {
    fn of(table: &TableData, column: usize) -> Self {
        if table.header.get(column).is_some_and(|name| name == AGE_COLUMN) {
            Self::Age
        } else if table.is_numeric(column) {
            Self::Numeric
        } else {
            Self::Text
        }
    }
}

fn sort_rows(rows: &mut [&RowEvent], sort: SortColumn, order: CellOrder) {
    if sort.index >= sort.column_count {
        return;
    }

    rows.sort_by(|left, right| {
        let ordering = compare_cells(left.field(sort.index), right.field(sort.index), order);
        if sort.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

fn compare_cells(left: &str, right: &str, order: CellOrder) -> Ordering {
    match order {
        CellOrder::Numeric => parse_numeric(left).total_cmp(&parse_numeric(right)),
        CellOrder::Age => parse_age(left).total_cmp(&parse_age(right)),
        CellOrder::Text => left.cmp(right),
    }
}

/// Parses a numeric cell; anything unparseable sorts as the minimum.
fn parse_numeric(cell: &str) -> f64 {
    let cell = cell.trim();
    let cell = cell.split_once('/').map(|(head, _)| head).unwrap_or(cell);
    let cell = cell.strip_suffix('%').unwrap_or(cell).trim();
    match cell.parse::<f64>() {
        Ok(value) if !value.is_nan() => value,
        _ => f64::NEG_INFINITY,
    }
}

/// Parses ages such as `45s`, `10m` or `1d2h` into seconds.
/// Anything unparseable sorts as the minimum.
fn parse_age(cell: &str) -> f64 {
    let mut total = 0u64;
    let mut digits = String::new();
    let mut seen_unit = false;
    for ch in cell.trim().chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let scale = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            'y' => 31_536_000,
            _ => return f64::NEG_INFINITY,
        };
        let Ok(value) = digits.parse::<u64>() else {
            return f64::NEG_INFINITY;
        };
        total = total.saturating_add(value.saturating_mul(scale));
        digits.clear();
        seen_unit = true;
    }
    if !seen_unit || !digits.is_empty() {
        return f64::NEG_INFINITY;
    }
    total as f64
}
