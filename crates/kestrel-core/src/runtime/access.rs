//! Variable and index access
//!
//! Variables are addressed by identifier index. `index`/`arrow` and their
//! assigning forms accept a name or a resolved [`Value::SlotRef`] and defer
//! to the program's `` `[] ``, `` `-> ``, `` `[]= `` and `` `->= `` lfuns when
//! it defines them.

use super::Runtime;
use crate::object::{Cell, ObjectId};
use crate::program::{IdentifierKind, Lfun, Program};
use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};
use rustc_hash::FxHashSet;
use std::sync::Arc;

impl Runtime {
    fn live_program(&mut self, object: ObjectId) -> RuntimeResult<Arc<Program>> {
        match self.program_of(object) {
            Some(program) => Ok(program),
            None => Err(self.raise(RuntimeError::DestructedObject)),
        }
    }

    /// Read a cell, checking the liveness of weak targets
    ///
    /// A weak target with no strong references is already on its way out
    /// and reads as undefined.
    fn read_cell(&self, cell: &Cell) -> Value {
        match cell.weak_ref() {
            Some(target) if self.is_destructed(target) || self.refs(target) == 0 => {
                Value::Undefined
            }
            _ => cell.read(),
        }
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Read the identifier at `identifier`
    ///
    /// Variables read their cell, functions read as a bound
    /// [`Value::Function`] and constants read as their value. The result is
    /// a non-owning handle.
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject` or `UnknownIdentifier`.
    pub fn get_variable(&mut self, object: ObjectId, identifier: usize) -> RuntimeResult<Value> {
        let program = self.live_program(object)?;
        let Some(resolved) = program.identifier(identifier) else {
            return Err(self.raise(RuntimeError::UnknownIdentifier(identifier)));
        };
        let value = match &resolved.identifier.kind {
            IdentifierKind::Variable { .. } => {
                let cell = resolved
                    .cell
                    .and_then(|index| self.storage(object)?.cell(index));
                cell.map_or(Value::Undefined, |cell| self.read_cell(cell))
            }
            IdentifierKind::Function(_) => Value::Function { object, identifier },
            IdentifierKind::Constant(value) => value.clone(),
        };
        Ok(value)
    }

    /// Assign the variable at `identifier`
    ///
    /// The slot takes its own reference to the new value and releases the
    /// old one. Weak slots take no reference.
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject`, `UnknownIdentifier`,
    /// `NonAssignableIdentifier` for functions and constants, and
    /// `TypeMismatch` if the value does not fit a short slot.
    pub fn set_variable(&mut self, object: ObjectId, identifier: usize, value: Value) -> RuntimeResult<()> {
        let program = self.live_program(object)?;
        let Some(resolved) = program.identifier(identifier) else {
            return Err(self.raise(RuntimeError::UnknownIdentifier(identifier)));
        };
        let name = resolved.identifier.name.clone();
        let (ty, index) = match (&resolved.identifier.kind, resolved.cell) {
            (IdentifierKind::Variable { ty, .. }, Some(index)) => (*ty, index),
            _ => return Err(self.raise(RuntimeError::NonAssignableIdentifier { name })),
        };

        let found = value.type_name();
        let Some(cell) = Cell::encode(ty, value) else {
            return Err(self.raise(RuntimeError::TypeMismatch {
                name,
                expected: ty,
                found,
            }));
        };

        if let Some(target) = cell.strong_ref() {
            self.add_ref(target);
        }
        let old = self
            .storage_mut(object)
            .and_then(|storage| storage.replace(index, cell));
        if let Some(target) = old.as_ref().and_then(Cell::strong_ref) {
            self.release_reference(target);
        }
        Ok(())
    }

    // ========================================================================
    // Index / Arrow
    // ========================================================================

    /// `object[key]`
    ///
    /// Unknown names read as `Undefined`.
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject`, or `IllegalLookupType` for keys that are
    /// neither strings nor slot references. Errors from `` `[] `` propagate.
    pub fn index(&mut self, object: ObjectId, key: &Value) -> RuntimeResult<Value> {
        self.lookup(object, key, Lfun::Index)
    }

    /// `object->key`
    ///
    /// # Errors
    ///
    /// As [`index`](Self::index), with `` `-> `` as the override.
    pub fn arrow(&mut self, object: ObjectId, key: &Value) -> RuntimeResult<Value> {
        self.lookup(object, key, Lfun::Arrow)
    }

    fn lookup(&mut self, object: ObjectId, key: &Value, lfun: Lfun) -> RuntimeResult<Value> {
        if let Some(value) = self.call_lfun(object, lfun, std::slice::from_ref(key))? {
            return Ok(value);
        }
        let program = self.live_program(object)?;
        match key {
            Value::Str(name) => match program.find_identifier(name) {
                Some(identifier) => self.get_variable(object, identifier),
                None => Ok(Value::Undefined),
            },
            Value::SlotRef(identifier) => self.get_variable(object, *identifier),
            other => Err(self.raise(RuntimeError::IllegalLookupType {
                found: other.type_name(),
            })),
        }
    }

    /// `object[key] = value`
    ///
    /// # Errors
    ///
    /// Raises `NoSuchVariable` for unknown names, otherwise as
    /// [`set_variable`](Self::set_variable). Errors from `` `[]= `` propagate.
    pub fn set_index(&mut self, object: ObjectId, key: &Value, value: Value) -> RuntimeResult<()> {
        self.assign(object, key, value, Lfun::AssignIndex)
    }

    /// `object->key = value`
    ///
    /// # Errors
    ///
    /// As [`set_index`](Self::set_index), with `` `->= `` as the override.
    pub fn set_arrow(&mut self, object: ObjectId, key: &Value, value: Value) -> RuntimeResult<()> {
        self.assign(object, key, value, Lfun::AssignArrow)
    }

    fn assign(&mut self, object: ObjectId, key: &Value, value: Value, lfun: Lfun) -> RuntimeResult<()> {
        let program = self.live_program(object)?;
        if let Some(identifier) = program.find_lfun(lfun) {
            self.call_function(object, identifier, &[key.clone(), value])?;
            return Ok(());
        }
        match key {
            Value::Str(name) => match program.find_identifier(name) {
                Some(identifier) => self.set_variable(object, identifier, value),
                None => Err(self.raise(RuntimeError::NoSuchVariable { name: name.clone() })),
            },
            Value::SlotRef(identifier) => self.set_variable(object, *identifier, value),
            other => Err(self.raise(RuntimeError::IllegalLookupType {
                found: other.type_name(),
            })),
        }
    }

    // ========================================================================
    // Reflection
    // ========================================================================

    /// Names of every visible identifier, in identifier order
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject`.
    pub fn indices(&mut self, object: ObjectId) -> RuntimeResult<Vec<Value>> {
        let program = self.live_program(object)?;
        Ok(program
            .visible_identifiers()
            .into_iter()
            .map(|(name, _)| Value::Str(name))
            .collect())
    }

    /// Values of every visible identifier, matching [`indices`](Self::indices)
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject`.
    pub fn values(&mut self, object: ObjectId) -> RuntimeResult<Vec<Value>> {
        let program = self.live_program(object)?;
        let visible = program.visible_identifiers();
        let mut values = Vec::with_capacity(visible.len());
        for (_, identifier) in visible {
            values.push(self.get_variable(object, identifier)?);
        }
        Ok(values)
    }

    /// Structural equality
    ///
    /// Distinct objects are equal when they share a program and their cells
    /// are pairwise equal. A pair already under comparison is assumed equal,
    /// so cyclic structures terminate.
    pub fn equal(&self, a: &Value, b: &Value) -> bool {
        let mut work = vec![(a.clone(), b.clone())];
        let mut assumed: FxHashSet<(ObjectId, ObjectId)> = FxHashSet::default();

        while let Some((a, b)) = work.pop() {
            let (x, y) = match (&a, &b) {
                (Value::Object(x), Value::Object(y)) => (*x, *y),
                _ => {
                    if a != b {
                        return false;
                    }
                    continue;
                }
            };
            if x == y || !assumed.insert((x, y)) {
                continue;
            }
            let (Some(px), Some(py)) = (self.program_of(x), self.program_of(y)) else {
                return false;
            };
            if !Arc::ptr_eq(&px, &py) {
                return false;
            }
            let (Some(sx), Some(sy)) = (self.storage(x), self.storage(y)) else {
                return false;
            };
            for (cx, cy) in sx.cells().iter().zip(sy.cells()) {
                work.push((self.read_cell(cx), self.read_cell(cy)));
            }
        }
        true
    }
}
