//! Command records and completion tokens.
//!
//! A [`Command`] captures one deferred device operation by value. Heap
//! payloads (pixel data) move into the record at enqueue time as
//! [`PixelData`], so the producer cannot touch them afterwards — ownership
//! transfer across threads is enforced by the type system rather than by
//! convention.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::device::{DrawBatch, ReadRegion, TexParams, TexRegion, TextureAllocation, TextureId};
use crate::queue::DispatchError;
use crate::transfer::TransferSlot;

/// Owned pixel payload, moved into the queue at enqueue time and freed by
/// the consumer after the upload executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelData(Box<[u8]>);

impl PixelData {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PixelData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

/// Waitable handle for one blocking command.
///
/// Created at enqueue time for blocking submissions only; signaled by the
/// consumer after that exact command has executed, carrying any output
/// value (a generated handle, a unit fence).
pub struct CompletionToken<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> CompletionToken<T> {
    /// Block the calling thread until the consumer signals completion.
    ///
    /// Returns [`DispatchError::Canceled`] if the command was dropped
    /// without producing an output (queue torn down, or the device call
    /// failed before a value existed).
    pub fn wait(self) -> Result<T, DispatchError> {
        self.rx.blocking_recv().map_err(|_| DispatchError::Canceled)
    }
}

/// Create the two halves of a completion token. The sender side goes into
/// the command record; the token side stays with the producer.
pub fn completion<T>() -> (oneshot::Sender<T>, CompletionToken<T>) {
    let (tx, rx) = oneshot::channel();
    (tx, CompletionToken { rx })
}

/// Which storage-allocation call sequence the executor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePath {
    /// Immutable storage by handle.
    Direct,
    /// Bind, then immutable storage on the bound target.
    Bound,
    /// Bind, then legacy mutable image allocation.
    Legacy,
}

/// Which sub-image upload call sequence the executor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    /// Stage through the pixel buffer, update by handle.
    BufferedDirect,
    /// Stage through the pixel buffer, update the bound texture.
    BufferedBind,
    /// Client-memory upload to the bound texture.
    Unbuffered,
}

/// Which parameter-set call the executor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamPath {
    Direct,
    Bound,
}

/// One captured, ordered unit of deferred work.
///
/// Once enqueued, a record's captured data is immutable until executed.
pub enum Command {
    CreateTexture {
        /// Direct-create when true, generate-then-bind otherwise.
        direct: bool,
        reply: oneshot::Sender<TextureId>,
    },
    DeleteTexture {
        tex: TextureId,
    },
    InitTextureStorage {
        tex: TextureId,
        alloc: TextureAllocation,
        path: StoragePath,
    },
    UploadSubImage {
        tex: TextureId,
        region: TexRegion,
        data: PixelData,
        path: UploadPath,
    },
    SetTexParams {
        tex: TextureId,
        params: TexParams,
        path: ParamPath,
    },
    Draw {
        batch: DrawBatch,
    },
    /// Copy a color-buffer region into a transfer slot. `done`, when
    /// present, is signaled after the copy attempt (even a failed one —
    /// readback degrades to stale data rather than deadlocking).
    ReadPixels {
        slot: Arc<TransferSlot>,
        region: ReadRegion,
        done: Option<oneshot::Sender<()>>,
    },
    /// Full pipeline sync; always blocking.
    Finish {
        done: oneshot::Sender<()>,
    },
    /// Shutdown sentinel. Everything enqueued before it executes; nothing
    /// after.
    Stop,
}

impl Command {
    /// Stable tag for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::CreateTexture { .. } => "create_texture",
            Command::DeleteTexture { .. } => "delete_texture",
            Command::InitTextureStorage { .. } => "init_texture_storage",
            Command::UploadSubImage { .. } => "upload_sub_image",
            Command::SetTexParams { .. } => "set_tex_params",
            Command::Draw { .. } => "draw",
            Command::ReadPixels { .. } => "read_pixels",
            Command::Finish { .. } => "finish",
            Command::Stop => "stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_data_takes_ownership() {
        let bytes = vec![1u8, 2, 3, 4];
        let data = PixelData::from(bytes);
        assert_eq!(data.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(data.len(), 4);
        assert!(!data.is_empty());
    }

    #[test]
    fn test_completion_token_receives_output() {
        let (tx, token) = completion::<u32>();
        tx.send(7).expect("receiver alive");
        assert_eq!(token.wait().expect("value sent"), 7);
    }

    #[test]
    fn test_completion_token_canceled_when_sender_dropped() {
        let (tx, token) = completion::<u32>();
        drop(tx);
        assert!(matches!(token.wait(), Err(DispatchError::Canceled)));
    }
}
