//! Capability-driven technique selection.
//!
//! Every texture-side operation family has two or three ways to reach the
//! device; which one applies depends on what the device reports in
//! [`DeviceCaps`]. Selection runs once at context setup and the chosen
//! variants are fixed afterwards, so per-call code never re-checks
//! capabilities. The variant sets are closed enums rather than trait
//! objects: three known techniques per family, no open extension point.

use std::collections::HashMap;

use crate::caps::DeviceCaps;
use crate::command::{Command, ParamPath, PixelData, StoragePath, UploadPath, completion};
use crate::device::{TexParams, TexRegion, TextureAllocation, TextureId};
use crate::queue::{DispatchError, Dispatcher};

/// How texture handles come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureCreate {
    /// Handle creation by direct state access, no bind required.
    Direct,
    /// Generate a name, then bind it to make it a real texture.
    GenerateBind,
}

impl TextureCreate {
    fn select(caps: &DeviceCaps) -> Self {
        if caps.direct_state_access {
            Self::Direct
        } else {
            Self::GenerateBind
        }
    }

    /// Blocking create: the handle is needed immediately, so this waits on
    /// the consumer.
    pub fn create(&self, dispatcher: &Dispatcher) -> Result<TextureId, DispatchError> {
        let (reply, token) = completion();
        dispatcher.submit_wait(
            Command::CreateTexture {
                direct: matches!(self, Self::Direct),
                reply,
            },
            token,
        )
    }
}

/// How texture storage gets allocated. The immutable variants remember the
/// last handle they initialized and skip the redundant re-allocation a
/// second init of the same handle would be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureStorage {
    ImmutableDirect { last: Option<TextureId> },
    ImmutableBind { last: Option<TextureId> },
    MutableImage,
}

impl TextureStorage {
    fn select(caps: &DeviceCaps) -> Self {
        if !caps.texture_storage {
            Self::MutableImage
        } else if caps.direct_state_access {
            Self::ImmutableDirect { last: None }
        } else {
            Self::ImmutableBind { last: None }
        }
    }

    /// Enqueue a storage allocation. Returns `false` when the immutable-path
    /// cache suppressed a repeat init of the same handle.
    pub fn init(
        &mut self,
        dispatcher: &Dispatcher,
        tex: TextureId,
        alloc: TextureAllocation,
    ) -> Result<bool, DispatchError> {
        let path = match self {
            Self::ImmutableDirect { last } => {
                if *last == Some(tex) {
                    return Ok(false);
                }
                *last = Some(tex);
                StoragePath::Direct
            }
            Self::ImmutableBind { last } => {
                if *last == Some(tex) {
                    return Ok(false);
                }
                *last = Some(tex);
                StoragePath::Bound
            }
            Self::MutableImage => StoragePath::Legacy,
        };
        dispatcher.submit(Command::InitTextureStorage { tex, alloc, path })?;
        Ok(true)
    }

    /// Drop cached state for a deleted handle so a recycled id is not
    /// mistaken for an already-initialized texture.
    pub fn forget(&mut self, deleted: TextureId) {
        if let Self::ImmutableDirect { last } | Self::ImmutableBind { last } = self {
            if *last == Some(deleted) {
                *last = None;
            }
        }
    }
}

/// How sub-image pixel uploads reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUpdate {
    /// Staged through the pixel buffer, addressed by handle.
    BufferedDirect,
    /// Staged through the pixel buffer, addressed via bind.
    BufferedBind,
    /// Straight from client memory.
    Unbuffered,
}

impl TextureUpdate {
    fn select(caps: &DeviceCaps) -> Self {
        if !caps.buffer_storage {
            Self::Unbuffered
        } else if caps.direct_state_access {
            Self::BufferedDirect
        } else {
            Self::BufferedBind
        }
    }

    pub fn upload(
        &self,
        dispatcher: &Dispatcher,
        tex: TextureId,
        region: TexRegion,
        data: PixelData,
    ) -> Result<(), DispatchError> {
        let path = match self {
            Self::BufferedDirect => UploadPath::BufferedDirect,
            Self::BufferedBind => UploadPath::BufferedBind,
            Self::Unbuffered => UploadPath::Unbuffered,
        };
        dispatcher.submit(Command::UploadSubImage {
            tex,
            region,
            data,
            path,
        })
    }
}

/// How sampler parameters get applied. The direct path keeps a per-handle
/// cache and skips applications that would not change anything; the bind
/// path cannot cache (bind state is global and may be perturbed elsewhere).
#[derive(Debug, Clone, PartialEq)]
pub enum TexParamStrategy {
    DirectCached { cache: HashMap<TextureId, TexParams> },
    Bind,
}

impl TexParamStrategy {
    fn select(caps: &DeviceCaps) -> Self {
        if caps.direct_state_access {
            Self::DirectCached {
                cache: HashMap::new(),
            }
        } else {
            Self::Bind
        }
    }

    /// Enqueue a parameter application. Returns `false` when the cache
    /// proved the device already holds exactly these parameters.
    pub fn apply(
        &mut self,
        dispatcher: &Dispatcher,
        tex: TextureId,
        params: TexParams,
    ) -> Result<bool, DispatchError> {
        let path = match self {
            Self::DirectCached { cache } => {
                if cache.get(&tex) == Some(&params) {
                    return Ok(false);
                }
                cache.insert(tex, params);
                ParamPath::Direct
            }
            Self::Bind => ParamPath::Bound,
        };
        dispatcher.submit(Command::SetTexParams { tex, params, path })?;
        Ok(true)
    }

    pub fn forget(&mut self, deleted: TextureId) {
        if let Self::DirectCached { cache } = self {
            cache.remove(&deleted);
        }
    }
}

/// Which color-buffer readback technique applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackKind {
    /// Persistent-mapped transfer slots.
    Persistent,
    /// Explicit map/unmap double buffer.
    Mapped,
}

impl ReadbackKind {
    pub fn select(caps: &DeviceCaps) -> Self {
        if caps.buffer_storage {
            Self::Persistent
        } else {
            Self::Mapped
        }
    }
}

/// The full set of selected techniques, chosen once from one capability
/// snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySet {
    pub create: TextureCreate,
    pub storage: TextureStorage,
    pub update: TextureUpdate,
    pub params: TexParamStrategy,
    pub readback: ReadbackKind,
}

impl StrategySet {
    pub fn select(caps: &DeviceCaps) -> Self {
        let set = Self {
            create: TextureCreate::select(caps),
            storage: TextureStorage::select(caps),
            update: TextureUpdate::select(caps),
            params: TexParamStrategy::select(caps),
            readback: ReadbackKind::select(caps),
        };
        tracing::debug!(
            create = ?set.create,
            update = ?set.update,
            readback = ?set.readback,
            "selected device techniques"
        );
        set
    }

    /// Purge all per-handle cached state for a deleted texture.
    pub fn forget(&mut self, deleted: TextureId) {
        self.storage.forget(deleted);
        self.params.forget(deleted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PixelFormat;
    use crate::mock::MockDevice;

    #[test]
    fn test_modern_caps_select_the_direct_paths() {
        let set = StrategySet::select(&DeviceCaps::modern());
        assert_eq!(set.create, TextureCreate::Direct);
        assert_eq!(set.storage, TextureStorage::ImmutableDirect { last: None });
        assert_eq!(set.update, TextureUpdate::BufferedDirect);
        assert!(matches!(set.params, TexParamStrategy::DirectCached { .. }));
        assert_eq!(set.readback, ReadbackKind::Persistent);
    }

    #[test]
    fn test_legacy_caps_select_the_bind_and_client_paths() {
        let set = StrategySet::select(&DeviceCaps::legacy());
        assert_eq!(set.create, TextureCreate::GenerateBind);
        assert_eq!(set.storage, TextureStorage::MutableImage);
        assert_eq!(set.update, TextureUpdate::Unbuffered);
        assert_eq!(set.params, TexParamStrategy::Bind);
        assert_eq!(set.readback, ReadbackKind::Mapped);
    }

    #[test]
    fn test_storage_without_dsa_selects_the_bind_variants() {
        let caps = DeviceCaps {
            direct_state_access: false,
            ..DeviceCaps::modern()
        };
        let set = StrategySet::select(&caps);
        assert_eq!(set.create, TextureCreate::GenerateBind);
        assert_eq!(set.storage, TextureStorage::ImmutableBind { last: None });
        assert_eq!(set.update, TextureUpdate::BufferedBind);
        assert_eq!(set.params, TexParamStrategy::Bind);
    }

    #[test]
    fn test_param_cache_skips_identical_reapplication() {
        let (device, state) = MockDevice::new(DeviceCaps::modern(), 4, 4);
        let dispatcher = Dispatcher::direct(Box::new(device));
        let mut strategy = TexParamStrategy::select(&DeviceCaps::modern());

        let tex = TextureId(1);
        let params = TexParams::default();
        assert!(strategy.apply(&dispatcher, tex, params).unwrap());
        assert!(!strategy.apply(&dispatcher, tex, params).unwrap());

        let changed = TexParams {
            max_level: Some(3),
            ..params
        };
        assert!(strategy.apply(&dispatcher, tex, changed).unwrap());

        let applied = state
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == "set_texture_params")
            .count();
        assert_eq!(applied, 2);
    }

    #[test]
    fn test_immutable_storage_skips_repeat_init_of_same_handle() {
        let (device, state) = MockDevice::new(DeviceCaps::modern(), 4, 4);
        let dispatcher = Dispatcher::direct(Box::new(device));
        let mut storage = TextureStorage::select(&DeviceCaps::modern());

        let alloc = TextureAllocation {
            width: 8,
            height: 8,
            levels: 1,
            format: PixelFormat::Rgba8,
        };
        let tex = TextureId(1);
        assert!(storage.init(&dispatcher, tex, alloc).unwrap());
        assert!(!storage.init(&dispatcher, tex, alloc).unwrap());

        // A different handle is not suppressed.
        assert!(storage.init(&dispatcher, TextureId(2), alloc).unwrap());

        // Deletion clears the cache, so a recycled handle re-initializes.
        storage.forget(TextureId(2));
        assert!(storage.init(&dispatcher, TextureId(2), alloc).unwrap());

        let inits = state
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == "alloc_texture_storage")
            .count();
        assert_eq!(inits, 3);
    }
}
