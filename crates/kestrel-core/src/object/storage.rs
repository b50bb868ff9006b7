//! Instance storage
//!
//! Each declared variable gets one [`Cell`]. Mixed variables are stored
//! type-tagged as a full [`Value`]; every other variable type is stored as a
//! [`ShortValue`] whose variant is fixed by the declaration.

use super::ObjectId;
use crate::program::{Program, VarType};
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Single-type storage slot payload
#[derive(Debug, Clone, PartialEq)]
pub enum ShortValue {
    /// Integer slot
    Int(i64),
    /// Float slot
    Float(f64),
    /// String slot (`None` is the null string)
    Str(Option<Arc<str>>),
    /// Strong object slot
    Object(Option<ObjectId>),
    /// Weak object slot, never owning
    WeakObject(Option<ObjectId>),
}

impl ShortValue {
    /// Zero value for a short type
    ///
    /// `Mixed` has no short representation and maps to the null object.
    pub fn zero(ty: VarType) -> Self {
        match ty {
            VarType::Int => ShortValue::Int(0),
            VarType::Float => ShortValue::Float(0.0),
            VarType::String => ShortValue::Str(None),
            VarType::WeakObject => ShortValue::WeakObject(None),
            VarType::Object | VarType::Mixed => ShortValue::Object(None),
        }
    }
}

/// One storage cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Type-tagged value
    Tagged(Value),
    /// Short value
    Short(ShortValue),
}

impl Cell {
    /// Zero-initialized cell for a declared type
    pub fn zero(ty: VarType) -> Self {
        if ty.is_tagged() {
            Cell::Tagged(Value::Undefined)
        } else {
            Cell::Short(ShortValue::zero(ty))
        }
    }

    /// Object this cell owns a reference to
    #[inline]
    pub fn strong_ref(&self) -> Option<ObjectId> {
        match self {
            Cell::Tagged(value) => value.object_ref(),
            Cell::Short(ShortValue::Object(id)) => *id,
            Cell::Short(_) => None,
        }
    }

    /// Object this cell refers to without owning
    #[inline]
    pub fn weak_ref(&self) -> Option<ObjectId> {
        match self {
            Cell::Short(ShortValue::WeakObject(id)) => *id,
            _ => None,
        }
    }

    /// Read the cell as a value
    ///
    /// Null strings and objects read as `Undefined`. Weak cells are returned
    /// as is; liveness is checked by the caller.
    pub fn read(&self) -> Value {
        match self {
            Cell::Tagged(value) => value.clone(),
            Cell::Short(ShortValue::Int(i)) => Value::Int(*i),
            Cell::Short(ShortValue::Float(f)) => Value::Float(*f),
            Cell::Short(ShortValue::Str(s)) => s.clone().map_or(Value::Undefined, Value::Str),
            Cell::Short(ShortValue::Object(id)) | Cell::Short(ShortValue::WeakObject(id)) => {
                id.map_or(Value::Undefined, Value::Object)
            }
        }
    }

    /// Convert a value for storage in a cell of type `ty`
    ///
    /// Returns `None` if the value's type does not fit.
    pub fn encode(ty: VarType, value: Value) -> Option<Self> {
        let cell = match (ty, value) {
            (VarType::Mixed, value) => Cell::Tagged(value),
            (VarType::Int, Value::Int(i)) => Cell::Short(ShortValue::Int(i)),
            (VarType::Float, Value::Float(f)) => Cell::Short(ShortValue::Float(f)),
            (VarType::Float, Value::Int(i)) => Cell::Short(ShortValue::Float(i as f64)),
            (VarType::String, Value::Str(s)) => Cell::Short(ShortValue::Str(Some(s))),
            (VarType::String, Value::Undefined) => Cell::Short(ShortValue::Str(None)),
            (VarType::Object, Value::Object(id)) => Cell::Short(ShortValue::Object(Some(id))),
            (VarType::Object, Value::Undefined) => Cell::Short(ShortValue::Object(None)),
            (VarType::WeakObject, Value::Object(id)) => {
                Cell::Short(ShortValue::WeakObject(Some(id)))
            }
            (VarType::WeakObject, Value::Undefined) => Cell::Short(ShortValue::WeakObject(None)),
            _ => return None,
        };
        Some(cell)
    }
}

/// Storage blob of one instance
pub struct Storage {
    cells: Box<[Cell]>,
    native: Box<[Option<Box<dyn Any + Send>>]>,
}

impl Storage {
    /// Allocate zero-initialized storage for a program
    pub fn for_program(program: &Program) -> Self {
        let mut cells = Vec::with_capacity(program.storage_size());
        for inherit in program.inherits() {
            debug_assert_eq!(cells.len(), inherit.storage_offset());
            cells.extend(inherit.context().variable_types().iter().map(|ty| Cell::zero(*ty)));
        }
        let native = (0..program.inherits().len()).map(|_| None).collect();
        Self {
            cells: cells.into_boxed_slice(),
            native,
        }
    }

    /// Number of cells
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check whether there are no cells
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All cells
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Borrow one cell
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Mutably borrow one cell
    pub fn cell_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    /// Replace a cell, returning the previous content
    pub fn replace(&mut self, index: usize, cell: Cell) -> Option<Cell> {
        self.cells
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, cell))
    }

    /// Native data of a context
    pub fn native(&self, context: usize) -> Option<&(dyn Any + Send + 'static)> {
        self.native.get(context)?.as_deref()
    }

    /// Mutable native data of a context
    pub fn native_mut(&mut self, context: usize) -> Option<&mut (dyn Any + Send + 'static)> {
        self.native.get_mut(context)?.as_deref_mut()
    }

    /// Set native data of a context
    pub fn set_native(&mut self, context: usize, value: Box<dyn Any + Send>) {
        if let Some(slot) = self.native.get_mut(context) {
            *slot = Some(value);
        }
    }

    /// Remove native data of a context
    pub fn take_native(&mut self, context: usize) -> Option<Box<dyn Any + Send>> {
        self.native.get_mut(context)?.take()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("cells", &self.cells)
            .field(
                "native",
                &self.native.iter().filter(|n| n.is_some()).count(),
            )
            .finish()
    }
}
