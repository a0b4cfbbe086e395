//! Row projection and model mapping (§4.9 "result projection exposes row
//! access by index/name with per-cell conversion"). Grounded on
//! `original_source/framework/include/blaze/{model,reflection,traits}.h`:
//! no proc-macro derive fits the crate's dependency stack, so `FromRow` is
//! implemented by hand per model type, matching column names.

use crate::error::{Error, ResourceError};

/// The result type every DB operation returns (§4.9).
pub type DbResult<T> = Result<T, Error>;

/// A column value, driver-agnostic. Each driver adapter converts its native
/// wire representation into this shape before handing rows back to
/// application code.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// One result row: an ordered list of named cells (§4.9).
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    cells: Vec<Cell>,
}

impl Row {
    pub fn new(columns: Vec<String>, cells: Vec<Cell>) -> Self {
        Self { columns, cells }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_named(&self, name: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.cells.get(i))
    }

    /// Converts the cell at `index` to `T`, failing with
    /// [`ResourceError::Query`] if the index is out of range or the
    /// conversion fails.
    pub fn get<T: FromCell>(&self, index: usize) -> DbResult<T> {
        let cell = self
            .cell(index)
            .ok_or_else(|| ResourceError::Query(format!("no column at index {index}")))?;
        T::from_cell(cell)
    }

    /// Converts the cell named `name` to `T`.
    pub fn get_named<T: FromCell>(&self, name: &str) -> DbResult<T> {
        let cell = self
            .cell_named(name)
            .ok_or_else(|| ResourceError::Query(format!("no column named {name:?}")))?;
        T::from_cell(cell)
    }
}

/// Converts one [`Cell`] to a Rust value (§4.9 "per-cell conversion").
pub trait FromCell: Sized {
    fn from_cell(cell: &Cell) -> DbResult<Self>;
}

macro_rules! impl_from_cell_int {
    ($($t:ty),*) => {
        $(impl FromCell for $t {
            fn from_cell(cell: &Cell) -> DbResult<Self> {
                match cell {
                    Cell::Int(v) => <$t>::try_from(*v)
                        .map_err(|_| ResourceError::Query(format!("{v} out of range for {}", stringify!($t))).into()),
                    other => Err(ResourceError::Query(format!("expected integer, found {other:?}")).into()),
                }
            }
        })*
    };
}
impl_from_cell_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromCell for f64 {
    fn from_cell(cell: &Cell) -> DbResult<Self> {
        match cell {
            Cell::Float(v) => Ok(*v),
            Cell::Int(v) => Ok(*v as f64),
            other => Err(ResourceError::Query(format!("expected float, found {other:?}")).into()),
        }
    }
}

impl FromCell for bool {
    fn from_cell(cell: &Cell) -> DbResult<Self> {
        match cell {
            Cell::Bool(v) => Ok(*v),
            other => Err(ResourceError::Query(format!("expected bool, found {other:?}")).into()),
        }
    }
}

impl FromCell for String {
    fn from_cell(cell: &Cell) -> DbResult<Self> {
        match cell {
            Cell::Text(v) => Ok(v.clone()),
            other => Err(ResourceError::Query(format!("expected text, found {other:?}")).into()),
        }
    }
}

impl FromCell for Vec<u8> {
    fn from_cell(cell: &Cell) -> DbResult<Self> {
        match cell {
            Cell::Bytes(v) => Ok(v.clone()),
            other => Err(ResourceError::Query(format!("expected bytes, found {other:?}")).into()),
        }
    }
}

impl<T: FromCell> FromCell for Option<T> {
    fn from_cell(cell: &Cell) -> DbResult<Self> {
        match cell {
            Cell::Null => Ok(None),
            other => T::from_cell(other).map(Some),
        }
    }
}

/// Maps a whole [`Row`] to a model type by column name (§4.9, a "BLAZE-model
/// type"). Implemented by hand per model, the way
/// `original_source/framework/include/blaze/model.h` reflects field names.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> DbResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_matching_cells() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Cell::Int(7), Cell::Text("alice".into())],
        );
        assert_eq!(row.get::<i64>(0).unwrap(), 7);
        assert_eq!(row.get_named::<String>("name").unwrap(), "alice");
    }

    #[test]
    fn null_converts_to_none() {
        let row = Row::new(vec!["deleted_at".into()], vec![Cell::Null]);
        assert_eq!(row.get::<Option<String>>(0).unwrap(), None);
    }

    #[test]
    fn type_mismatch_is_a_query_error() {
        let row = Row::new(vec!["id".into()], vec![Cell::Text("not a number".into())]);
        assert!(row.get::<i64>(0).is_err());
    }
}
