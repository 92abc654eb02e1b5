//! Consumer loop and command executor.
//!
//! The executor is the single piece of code that turns a command record
//! into device calls. The threaded consumer loop and the direct (queue-less)
//! dispatch mode both run commands through it, which is what makes the two
//! modes behaviorally identical.

use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::command::{Command, ParamPath, StoragePath, UploadPath};
use crate::device::{BufferId, DeviceError, GfxDevice, TextureId};

/// Executes command records against the device. Owns the device for the
/// lifetime of the context — no other code path touches it.
pub(crate) struct Executor {
    device: Box<dyn GfxDevice>,
    /// Lazily created pixel-unpack staging buffer for buffered uploads.
    unpack_buffer: Option<BufferId>,
}

impl Executor {
    pub(crate) fn new(device: Box<dyn GfxDevice>) -> Self {
        Self {
            device,
            unpack_buffer: None,
        }
    }

    /// Run one command. Device failures are logged and swallowed so the
    /// stream keeps making forward progress.
    pub(crate) fn execute(&mut self, cmd: Command) {
        let tag = cmd.tag();
        if let Err(err) = self.try_execute(cmd) {
            tracing::warn!(command = tag, %err, "device call failed, continuing");
        }
    }

    fn unpack_buffer(&mut self) -> Result<BufferId, DeviceError> {
        if let Some(buf) = self.unpack_buffer {
            return Ok(buf);
        }
        let buf = self.device.create_buffer()?;
        self.unpack_buffer = Some(buf);
        Ok(buf)
    }

    fn create_texture(&mut self, direct: bool) -> Result<TextureId, DeviceError> {
        if direct {
            self.device.create_texture()
        } else {
            let tex = self.device.gen_texture()?;
            self.device.bind_texture(tex)?;
            Ok(tex)
        }
    }

    fn try_execute(&mut self, cmd: Command) -> Result<(), DeviceError> {
        match cmd {
            Command::CreateTexture { direct, reply } => {
                let tex = self.create_texture(direct)?;
                // Producer may have stopped waiting; that is its business.
                let _ = reply.send(tex);
                Ok(())
            }
            Command::DeleteTexture { tex } => self.device.delete_texture(tex),
            Command::InitTextureStorage { tex, alloc, path } => match path {
                StoragePath::Direct => self.device.alloc_texture_storage(tex, &alloc),
                StoragePath::Bound => {
                    self.device.bind_texture(tex)?;
                    self.device.alloc_texture_storage_bound(&alloc)
                }
                StoragePath::Legacy => {
                    self.device.bind_texture(tex)?;
                    self.device.alloc_texture_image_bound(&alloc)
                }
            },
            Command::UploadSubImage {
                tex,
                region,
                data,
                path,
            } => match path {
                UploadPath::BufferedDirect => {
                    let buf = self.unpack_buffer()?;
                    self.device.bind_pixel_buffer(Some(buf))?;
                    self.device.pixel_buffer_data(data.as_bytes())?;
                    self.device.texture_sub_image_buffered(tex, &region)?;
                    self.device.bind_pixel_buffer(None)
                }
                UploadPath::BufferedBind => {
                    let buf = self.unpack_buffer()?;
                    self.device.bind_texture(tex)?;
                    self.device.bind_pixel_buffer(Some(buf))?;
                    self.device.pixel_buffer_data(data.as_bytes())?;
                    self.device.texture_sub_image_buffered_bound(&region)?;
                    self.device.bind_pixel_buffer(None)
                }
                UploadPath::Unbuffered => {
                    self.device.bind_texture(tex)?;
                    self.device
                        .texture_sub_image_unbuffered(&region, data.as_bytes())
                }
            },
            Command::SetTexParams { tex, params, path } => match path {
                ParamPath::Direct => self.device.set_texture_params(tex, &params),
                ParamPath::Bound => {
                    self.device.bind_texture(tex)?;
                    self.device.set_texture_params_bound(&params)
                }
            },
            Command::Draw { batch } => self.device.draw(&batch),
            Command::ReadPixels { slot, region, done } => {
                let result = slot.fill(&mut *self.device, &region);
                // Signal even after a failed copy: the reader degrades to
                // stale pixels instead of deadlocking its producer.
                if let Some(done) = done {
                    let _ = done.send(());
                }
                result
            }
            Command::Finish { done } => {
                let result = self.device.finish();
                let _ = done.send(());
                result
            }
            Command::Stop => Ok(()),
        }
    }
}

/// Spawn the dedicated consumer thread. It owns the device until the stop
/// sentinel arrives or every sender is gone.
pub(crate) fn spawn(device: Box<dyn GfxDevice>, rx: mpsc::Receiver<Command>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("drawbridge-consumer".into())
        .spawn(move || run(device, rx))
        .expect("failed to spawn consumer thread")
}

fn run(device: Box<dyn GfxDevice>, mut rx: mpsc::Receiver<Command>) {
    tracing::debug!("consumer loop started");
    let mut executor = Executor::new(device);
    while let Some(cmd) = rx.blocking_recv() {
        if matches!(cmd, Command::Stop) {
            break;
        }
        executor.execute(cmd);
    }
    tracing::debug!("consumer loop stopped");
}
