//! Function calls
//!
//! ```text
//! call_function(object, identifier, args)
//!   1. resolve identifier → native method
//!   2. push args onto the value stack (owned copies)   ← locals_base
//!   3. push Frame (owns object + parent)
//!   4. run method
//!   5. Ok  → pop frame, truncate to locals_base, release
//!      Err → leave everything; the throw already unwound
//! ```

use super::Runtime;
use crate::object::{ObjectHeader, ObjectId};
use crate::program::{IdentifierKind, Lfun};
use crate::stack::Frame;
use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};

impl Runtime {
    /// Call the function at `identifier` bound to `object`
    ///
    /// The returned value is a non-owning handle.
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject`, `UnknownIdentifier` or `NotAFunction` if
    /// the call cannot be resolved, `StackOverflow` if the stacks are full,
    /// and propagates whatever the function raises.
    pub fn call_function(
        &mut self,
        object: ObjectId,
        identifier: usize,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        let Some(program) = self.program_of(object) else {
            return Err(self.raise(RuntimeError::DestructedObject));
        };
        let (method, context, name) = match program.identifier(identifier) {
            Some(resolved) => match &resolved.identifier.kind {
                IdentifierKind::Function(method) => (
                    method.clone(),
                    resolved.inherit,
                    resolved.identifier.name.clone(),
                ),
                _ => {
                    let name = resolved.identifier.name.clone();
                    return Err(self.raise(RuntimeError::NotAFunction(name)));
                }
            },
            None => return Err(self.raise(RuntimeError::UnknownIdentifier(identifier))),
        };

        self.record_backlog(format!("{}{}->{}()", program.name(), object, name));
        log::trace!("call {}->{}() with {} args", object, name, args.len());

        let locals_base = self.stack.depth();
        for arg in args {
            self.retain_value(arg);
            self.push_value(arg.clone())?;
        }

        let parent = self.object(object).and_then(ObjectHeader::parent);
        self.add_ref(object);
        if let Some(parent) = parent {
            self.add_ref(parent);
        }
        let frame = Frame {
            object,
            program,
            context,
            identifier,
            parent,
            locals_base,
        };
        if let Err(err) = self.stack.push_frame(frame) {
            self.release_reference(object);
            if let Some(parent) = parent {
                self.release_reference(parent);
            }
            return Err(self.raise(err));
        }

        let result = method(self, object, args);
        if result.is_ok() {
            if let Some(frame) = self.stack.pop_frame() {
                self.release_frame(frame);
            }
            let locals = self.stack.truncate(locals_base);
            for value in locals.into_iter().rev() {
                self.release_value(&value);
            }
        }
        result
    }

    /// Call an lfun if the object's program defines it
    ///
    /// Returns `None` when the program has no such lfun.
    ///
    /// # Errors
    ///
    /// Raises `DestructedObject` for a destructed object and propagates
    /// whatever the lfun raises.
    pub fn call_lfun(
        &mut self,
        object: ObjectId,
        lfun: Lfun,
        args: &[Value],
    ) -> RuntimeResult<Option<Value>> {
        let Some(program) = self.program_of(object) else {
            return Err(self.raise(RuntimeError::DestructedObject));
        };
        match program.find_lfun(lfun) {
            Some(identifier) => self.call_function(object, identifier, args).map(Some),
            None => Ok(None),
        }
    }

    /// Call a function by name
    ///
    /// # Errors
    ///
    /// Raises `NoSuchVariable` if the name does not resolve, otherwise as
    /// [`call_function`](Self::call_function).
    pub fn call_method(&mut self, object: ObjectId, name: &str, args: &[Value]) -> RuntimeResult<Value> {
        let Some(program) = self.program_of(object) else {
            return Err(self.raise(RuntimeError::DestructedObject));
        };
        match program.find_identifier(name) {
            Some(identifier) => self.call_function(object, identifier, args),
            None => Err(self.raise(RuntimeError::NoSuchVariable {
                name: name.into(),
            })),
        }
    }
}
