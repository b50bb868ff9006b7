//! Native modules
//!
//! A native module registers programs and functions when it is loaded and
//! gets its `exit` hook run at shutdown, most recently loaded first. Programs
//! whose hooks live in a module must not be instantiated after that module
//! has exited.

use crate::runtime::Runtime;
use crate::RuntimeResult;

/// A native module
pub trait NativeModule: Send {
    /// Module name
    fn name(&self) -> &str;

    /// Called once when the module is loaded
    ///
    /// # Errors
    ///
    /// A raised error aborts loading; `exit` is not called for the module.
    fn init(&mut self, runtime: &mut Runtime) -> RuntimeResult<()> {
        let _ = runtime;
        Ok(())
    }

    /// Called once at shutdown
    fn exit(&mut self, runtime: &mut Runtime) {
        let _ = runtime;
    }
}

/// Loaded modules in load order
pub(crate) struct ModuleRegistry {
    modules: Vec<Box<dyn NativeModule>>,
}

impl ModuleRegistry {
    pub(crate) fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }
}

impl Runtime {
    /// Load a native module, running its `init`
    ///
    /// # Errors
    ///
    /// Propagates errors raised by `init`; the module is not registered.
    pub fn load_module(&mut self, mut module: Box<dyn NativeModule>) -> RuntimeResult<()> {
        log::debug!("loading native module {}", module.name());
        module.init(self)?;
        self.modules.modules.push(module);
        Ok(())
    }

    /// Names of the loaded modules in load order
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.modules.iter().map(|module| module.name()).collect()
    }

    /// Run every module's `exit`, most recently loaded first
    pub(crate) fn unload_modules(&mut self) {
        while let Some(mut module) = self.modules.modules.pop() {
            log::debug!("exiting native module {}", module.name());
            module.exit(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl NativeModule for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn init(&mut self, runtime: &mut Runtime) -> RuntimeResult<()> {
            self.log.lock().push(format!("init {}", self.name));
            if self.fail {
                return Err(runtime.raise(RuntimeError::Custom("init failed".to_string())));
            }
            Ok(())
        }

        fn exit(&mut self, _runtime: &mut Runtime) {
            self.log.lock().push(format!("exit {}", self.name));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Box<dyn NativeModule> {
        Box::new(Recorder {
            name,
            log: log.clone(),
            fail,
        })
    }

    #[test]
    fn test_modules_exit_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rt = Runtime::new();
        rt.catch(|rt| {
            rt.load_module(recorder("a", &log, false))?;
            rt.load_module(recorder("b", &log, false))
        })
        .unwrap()
        .unwrap();
        assert_eq!(rt.module_names(), vec!["a", "b"]);

        rt.shutdown();
        assert_eq!(*log.lock(), vec!["init a", "init b", "exit b", "exit a"]);
        assert!(rt.module_names().is_empty());
    }

    #[test]
    fn test_failed_init_is_not_registered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rt = Runtime::new();
        let thrown = rt
            .catch(|rt| rt.load_module(recorder("bad", &log, true)))
            .unwrap()
            .unwrap_err();
        assert_eq!(thrown.message(), "init failed");
        assert!(rt.module_names().is_empty());

        rt.shutdown();
        assert_eq!(*log.lock(), vec!["init bad"]);
    }
}
