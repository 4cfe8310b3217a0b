//! The function registry.
//!
//! A [`Registry`] maps function names to [`Function`]s in insertion order.
//! Each function owns its kernel sets in registration order, which is also
//! the order in which the selector tries them.

use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{GumathError, Result};
use crate::kernel::{KernelInit, KernelSet};
use crate::kernels;
use crate::ndtypes::{FunctionSig, ScalarKind, Type, Typedefs};

/// A named multimethod.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    kernels: Vec<KernelSet>,
}

impl Function {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kernels: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel sets in priority order.
    pub fn kernels(&self) -> &[KernelSet] {
        &self.kernels
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Registered functions, typedefs and the engine configuration.
#[derive(Debug, Clone)]
pub struct Registry {
    funcs: IndexMap<String, Function>,
    typedefs: Typedefs,
    config: EngineConfig,
}

impl Registry {
    /// Create a registry, registering the built-in kernels when
    /// `config.builtin_kernels` is set.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate().map_err(|message| GumathError::Config {
            path: PathBuf::from("<engine config>"),
            message,
        })?;
        let mut registry = Self {
            funcs: IndexMap::new(),
            typedefs: Typedefs::default(),
            config,
        };
        if registry.config.builtin_kernels {
            kernels::init(&mut registry)?;
        }
        Ok(registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn typedefs(&self) -> &Typedefs {
        &self.typedefs
    }

    /// Get or create the function `name`.
    pub fn add_function(&mut self, name: &str) -> &mut Function {
        self.funcs
            .entry(name.to_string())
            .or_insert_with(|| Function::new(name))
    }

    /// Register one kernel set. Nothing is created or appended on failure.
    pub fn add_kernel(&mut self, init: KernelInit) -> Result<()> {
        let sig = FunctionSig::parse(&init.sig, &self.typedefs)?;
        if !init.has_body() {
            return Err(GumathError::InvalidArgument(format!(
                "{}: kernel `{sig}` has no body",
                init.name
            )));
        }

        if let Some(func) = self.funcs.get(&init.name) {
            if func.kernels.len() >= self.config.max_kernels {
                return Err(GumathError::Capacity {
                    name: init.name,
                    max: self.config.max_kernels,
                });
            }
            if let Some(existing) = func.kernels.iter().find(|k| k.sig.equivalent(&sig)) {
                return Err(GumathError::Conflict {
                    name: init.name,
                    signature: existing.sig.to_string(),
                });
            }
        }

        debug!(
            function = %init.name,
            signature = %sig,
            vectorize = init.vectorize,
            "registered kernel"
        );
        let name = init.name.clone();
        self.add_function(&name).kernels.push(init.into_set(sig));
        Ok(())
    }

    /// Register kernel sets in order, stopping at the first error.
    pub fn add_kernels(&mut self, inits: impl IntoIterator<Item = KernelInit>) -> Result<()> {
        inits.into_iter().try_for_each(|init| self.add_kernel(init))
    }

    /// Define a named element type for use in later signatures.
    pub fn add_typedef(&mut self, name: &str, type_text: &str) -> Result<()> {
        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(GumathError::InvalidArgument(format!(
                "typedef name `{name}` must be a lowercase identifier"
            )));
        }
        let builtin = ScalarKind::from_name(name).is_some() || matches!(name, "string" | "var");
        if builtin || self.typedefs.contains_key(name) {
            return Err(GumathError::Conflict {
                name: name.to_string(),
                signature: type_text.to_string(),
            });
        }

        let ty = Type::parse(type_text, &self.typedefs)?;
        if !ty.is_concrete() {
            return Err(GumathError::InvalidArgument(format!(
                "typedef `{name}` must be concrete, got `{ty}`"
            )));
        }
        debug!(typedef = name, ty = %ty, "registered typedef");
        self.typedefs.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Function> {
        self.funcs.get(name)
    }

    /// Functions in registration order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.funcs.values()
    }

    /// Visit every function in registration order, stopping at the first
    /// error the visitor returns.
    pub fn for_each<E>(
        &self,
        mut visit: impl FnMut(&Function) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        self.funcs.values().try_for_each(|f| visit(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelResult;
    use crate::xnd::View;
    use pretty_assertions::assert_eq;

    fn noop(_: &mut [View<'_>]) -> KernelResult {
        Ok(())
    }

    fn empty() -> Registry {
        Registry::new(EngineConfig {
            builtin_kernels: false,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_add_function_is_idempotent() {
        let mut reg = empty();
        reg.add_function("f");
        reg.add_function("f");
        assert_eq!(reg.functions().count(), 1);
        assert!(reg.lookup("f").unwrap().is_empty());
    }

    const MAX: usize = 128;

    #[test]
    fn test_capacity_limit() {
        let mut reg = empty();
        for n in 1..=MAX {
            reg.add_kernel(KernelInit::new("f", format!("{n} * int64 -> {n} * int64")).xnd(noop))
                .unwrap();
        }
        let err = reg
            .add_kernel(KernelInit::new("f", "1000 * int64 -> 1000 * int64").xnd(noop))
            .unwrap_err();
        assert!(matches!(err, GumathError::Capacity { max: 128, .. }));
        assert_eq!(reg.lookup("f").unwrap().len(), MAX);
    }

    #[test]
    fn test_configured_capacity() {
        let mut reg = Registry::new(EngineConfig {
            max_kernels: 1,
            builtin_kernels: false,
            ..EngineConfig::default()
        })
        .unwrap();
        reg.add_kernel(KernelInit::new("g", "int8 -> int8").xnd(noop)).unwrap();
        assert!(reg.add_kernel(KernelInit::new("g", "int16 -> int16").xnd(noop)).is_err());
    }

    #[test]
    fn test_equivalent_signature_conflicts() {
        let mut reg = empty();
        reg.add_kernel(KernelInit::new("f", "... * N * T -> ... * N * T").xnd(noop))
            .unwrap();
        let err = reg
            .add_kernel(KernelInit::new("f", "... * M * U -> ... * M * U").xnd(noop))
            .unwrap_err();
        assert!(matches!(err, GumathError::Conflict { .. }));
        assert_eq!(reg.lookup("f").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_registration_creates_nothing() {
        let mut reg = empty();
        assert!(reg.add_kernel(KernelInit::new("bad", "N * int64 -> M * int64").xnd(noop)).is_err());
        assert!(reg.add_kernel(KernelInit::new("bare", "int64 -> int64")).is_err());
        assert!(reg.lookup("bad").is_none());
        assert!(reg.lookup("bare").is_none());
    }

    #[test]
    fn test_typedefs() {
        let mut reg = empty();
        reg.add_typedef("pair", "{a: int32, b: int32}").unwrap();
        reg.add_kernel(KernelInit::new("swap", "... * pair -> ... * pair").xnd(noop))
            .unwrap();
        assert!(matches!(
            reg.add_typedef("pair", "int8"),
            Err(GumathError::Conflict { .. })
        ));
        assert!(reg.add_typedef("int64", "int8").is_err());
        assert!(reg.add_typedef("Pair", "int8").is_err());
        assert!(reg.add_typedef("dims", "N * int8").is_err());
    }

    #[test]
    fn test_for_each_stops_early() {
        let mut reg = empty();
        for name in ["a", "b", "c"] {
            reg.add_function(name);
        }
        let mut seen = Vec::new();
        let result = reg.for_each(|f| {
            seen.push(f.name().to_string());
            if f.name() == "b" {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_registry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }

    #[test]
    fn test_builtins_registered_in_order() {
        let reg = Registry::new(EngineConfig::default()).unwrap();
        let names: Vec<&str> = reg.functions().map(Function::name).collect();
        assert_eq!(names, vec!["copy", "sin", "add_scalar", "count_valid_missing"]);
    }
}
