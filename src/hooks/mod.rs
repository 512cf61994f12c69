/*
 *
 *    Thin layer over retour. Every function we redirect goes through one DetourEngine so that the
 *    same target can never be patched twice. A Detour keeps its trampoline alive for as long as it
 *    exists, which in practice is the rest of the process: the engine's detours are stored in
 *    statics and never dropped.
 *
 * */

use std::sync::Mutex;

use retour::{Function, GenericDetour};

use crate::error::DetourError;

#[derive(Debug, Default)]
pub struct DetourEngine {
    targets: Mutex<Vec<usize>>,
}

impl DetourEngine {
    pub const fn new() -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
        }
    }

    ///Builds the redirection of `target` to `replacement` and reserves `target`. The detour is
    ///not live until `Detour::enable`, so it can be stored where the replacement will look for it
    ///first.
    ///
    /// # Safety
    /// `target` must be the entry point of a function with exactly the signature `F`.
    pub unsafe fn prepare<F: Function>(
        &self,
        target: usize,
        replacement: F,
    ) -> Result<Detour<F>, DetourError> {
        if target == 0 {
            return Err(DetourError::NullTarget);
        }

        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        if targets.contains(&target) {
            return Err(DetourError::AlreadyHooked(target));
        }

        let inner = unsafe {
            let original = F::from_ptr(target as *const ());
            GenericDetour::new(original, replacement)
                .map_err(|source| DetourError::Patch { target, source })?
        };

        targets.push(target);
        Ok(Detour { target, inner })
    }

    pub fn is_hooked(&self, target: usize) -> bool {
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&target)
    }
}

///An installed redirection. The original behavior stays reachable through `original()`.
pub struct Detour<F: Function> {
    target: usize,
    inner: GenericDetour<F>,
}

impl<F: Function> Detour<F> {
    pub fn target(&self) -> usize {
        self.target
    }

    ///Callable that runs the unhooked code of the target.
    pub fn original(&self) -> F {
        unsafe { F::from_ptr(self.inner.trampoline() as *const ()) }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    ///Patches the target. From here on every call to it reaches the replacement.
    ///
    /// # Safety
    /// The replacement must be ready to be called from any thread.
    pub unsafe fn enable(&self) -> Result<(), DetourError> {
        unsafe { self.inner.enable() }.map_err(|source| DetourError::Patch {
            target: self.target,
            source,
        })?;
        log::debug!("Detoured {:#x}", self.target);
        Ok(())
    }
}

impl<F: Function> std::fmt::Debug for Detour<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detour")
            .field("target", &format_args!("{:#x}", self.target))
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
