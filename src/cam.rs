//! The main session type tying a transport to the high-level camera API.
//!
//! A [`CameraSession`] wraps either the serial or the USB protocol and adds
//! the state both share: the current camera directory, the last decoded
//! listing and the timezone adjustment for the camera clock. Operations the
//! other transport or camera model cannot perform return
//! [`CamError::Unsupported`].

use chrono::{DateTime, Local, Utc};
use tokio_serial::SerialStream;

use crate::dirlist::{self, DirEntry, DirListing};
use crate::serial::{SerialProtocol, SerialSpeed};
use crate::transfer::{ProgressFn, ProgressReporter, TransferKind};
use crate::usb::{CameraModel, UsbProtocol};
use crate::{custom, params, CamError, CamResult};

use std::fmt;

/// Model, firmware and owner strings reported by the camera. The serial
/// protocol has no owner query, so `owner` is `None` there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraId {
    pub model: String,
    pub firmware: String,
    pub owner: Option<String>,
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (firmware {})", self.model, self.firmware)?;
        if let Some(owner) = &self.owner {
            write!(f, ", owner {owner}")?;
        }
        Ok(())
    }
}

/// Flash card capacity and free space, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInfo {
    pub capacity: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStatus {
    /// Battery level is acceptable.
    pub good: bool,
    /// Running from the AC adapter.
    pub ac: bool,
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "power {} ({})",
            if self.good { "good" } else { "low" },
            if self.ac { "AC adapter" } else { "battery" }
        )
    }
}

enum CameraLink {
    Serial(SerialProtocol<SerialStream>),
    Usb(UsbProtocol),
}

pub struct CameraSession {
    link: CameraLink,
    cwd: String,
    /// Last successfully decoded listing; kept when a later fetch fails.
    listing: Option<DirListing>,
    /// Seconds added to the camera's clock values to get UTC. The camera
    /// stores local wall-clock time.
    gmt_offset: i64,
    progress: ProgressReporter,
    closed: bool,
}

impl CameraSession {
    fn new(link: CameraLink) -> Self {
        let gmt_offset = -i64::from(Local::now().offset().local_minus_utc());
        Self {
            link,
            cwd: String::new(),
            listing: None,
            gmt_offset,
            progress: ProgressReporter::default(),
            closed: false,
        }
    }

    /// Finds the first camera on the USB bus, syncs with it and positions
    /// the session at the root of its flash card.
    pub async fn open_usb() -> CamResult<Self> {
        let mut usb = UsbProtocol::open()?;
        usb.initial_sync().await?;
        let mut session = Self::new(CameraLink::Usb(usb));
        session.enter_disk_root().await?;
        Ok(session)
    }

    /// Opens a serial camera on `device` and negotiates `speed`.
    /// `byte_at_a_time` enables the slow write mode the A50 and Pro70 need.
    pub async fn open_serial(
        device: &str,
        speed: SerialSpeed,
        byte_at_a_time: bool,
    ) -> CamResult<Self> {
        let mut serial = SerialProtocol::open(device, byte_at_a_time)?;
        serial.establish(speed).await?;
        let mut session = Self::new(CameraLink::Serial(serial));
        session.enter_disk_root().await?;
        Ok(session)
    }

    async fn enter_disk_root(&mut self) -> CamResult<()> {
        let mut disk = match &mut self.link {
            CameraLink::Serial(serial) => serial.get_disk().await?,
            CameraLink::Usb(usb) => usb.get_disk().await?,
        };
        if !disk.ends_with('\\') {
            disk.push('\\');
        }
        log::debug!("camera disk is {disk}");
        self.cwd = disk;
        Ok(())
    }

    /// The directory subsequent relative paths resolve against.
    pub fn current_dir(&self) -> &str {
        &self.cwd
    }

    pub fn cached_listing(&self) -> Option<&DirListing> {
        self.listing.as_ref()
    }

    /// Installs (or clears) a callback invoked with `(done, total)` after
    /// every transferred chunk.
    pub fn set_progress(&mut self, callback: Option<ProgressFn>) {
        self.progress.set(callback);
    }

    pub async fn identify(&mut self) -> CamResult<CameraId> {
        match &mut self.link {
            CameraLink::Serial(serial) => serial.identify().await,
            CameraLink::Usb(usb) => usb.identify().await,
        }
    }

    /// Writes the owner string stored in the camera. USB only.
    pub async fn set_owner(&mut self, name: &str) -> CamResult<()> {
        match &mut self.link {
            CameraLink::Usb(usb) => usb.set_owner(name).await,
            CameraLink::Serial(_) => Err(CamError::Unsupported),
        }
    }

    /// The EOS body serial number. USB only.
    pub async fn body_id(&mut self) -> CamResult<u32> {
        match &mut self.link {
            CameraLink::Usb(usb) => usb.body_id().await,
            CameraLink::Serial(_) => Err(CamError::Unsupported),
        }
    }

    pub async fn disk_info(&mut self) -> CamResult<DiskInfo> {
        let drive = self.cwd.chars().next().unwrap_or('D');
        match &mut self.link {
            CameraLink::Serial(serial) => serial.disk_info(drive).await,
            CameraLink::Usb(usb) => usb.disk_info(drive).await,
        }
    }

    pub async fn power_status(&mut self) -> CamResult<PowerStatus> {
        match &mut self.link {
            CameraLink::Serial(serial) => serial.power_status().await,
            CameraLink::Usb(usb) => usb.power_status().await,
        }
    }

    /// The camera clock, converted to UTC.
    pub async fn clock(&mut self) -> CamResult<DateTime<Utc>> {
        let raw = match &mut self.link {
            CameraLink::Serial(serial) => serial.get_date().await?,
            CameraLink::Usb(usb) => usb.get_date().await?,
        };
        DateTime::from_timestamp(raw + self.gmt_offset, 0).ok_or(CamError::InvalidFormat)
    }

    /// Sets the camera clock, converting from UTC to the camera's local
    /// time. USB only.
    pub async fn set_clock(&mut self, to: DateTime<Utc>) -> CamResult<()> {
        let raw = to.timestamp() - self.gmt_offset;
        match &mut self.link {
            CameraLink::Usb(usb) => usb.set_date(raw).await,
            CameraLink::Serial(_) => Err(CamError::Unsupported),
        }
    }

    /// Lists `arg` (resolved against the current directory; empty means the
    /// current directory itself) and caches the decoded listing.
    pub async fn list_dir(&mut self, arg: &str) -> CamResult<Vec<DirEntry>> {
        let path = if arg.is_empty() {
            self.cwd.clone()
        } else {
            dirlist::resolve(&self.cwd, arg)
        };
        let (blob, skip) = match &mut self.link {
            CameraLink::Serial(serial) => (serial.list(&path).await?, dirlist::SERIAL_HEADER_SKIP),
            CameraLink::Usb(usb) => (usb.list(&path).await?, dirlist::USB_HEADER_SKIP),
        };
        // A decode failure leaves the previous cached listing in place.
        let listing = dirlist::decode(&blob, skip, self.gmt_offset)?;
        let entries = listing.entries.clone();
        self.listing = Some(listing);
        Ok(entries)
    }

    /// Changes the current directory, verifying the target exists by
    /// listing it.
    pub async fn change_dir(&mut self, arg: &str) -> CamResult<&str> {
        let path = dirlist::resolve(&self.cwd, arg);
        self.list_dir(arg).await?;
        self.cwd = path;
        Ok(&self.cwd)
    }

    /// Downloads a file or its thumbnail, resolving `name` against the
    /// current directory.
    pub async fn download(&mut self, name: &str, kind: TransferKind) -> CamResult<Vec<u8>> {
        let path = dirlist::resolve(&self.cwd, name);
        match &mut self.link {
            CameraLink::Serial(serial) => serial.download(&path, kind, &mut self.progress).await,
            CameraLink::Usb(usb) => usb.download(&path, kind, &mut self.progress).await,
        }
    }

    /// Uploads `content` to `name` on the camera.
    pub async fn upload(&mut self, name: &str, content: &[u8]) -> CamResult<()> {
        let path = dirlist::resolve(&self.cwd, name);
        match &mut self.link {
            CameraLink::Serial(serial) => serial.upload(&path, content, &mut self.progress).await,
            CameraLink::Usb(usb) => usb.upload(&path, content, &mut self.progress).await,
        }
    }

    pub async fn delete(&mut self, name: &str) -> CamResult<()> {
        let path = dirlist::resolve(&self.cwd, name);
        match &mut self.link {
            CameraLink::Serial(serial) => serial.delete(&path).await,
            CameraLink::Usb(usb) => usb.delete(&path).await,
        }
    }

    /// Rewrites the attribute byte of a file, e.g. to clear the protection
    /// bit before deletion.
    pub async fn set_attributes(&mut self, name: &str, attributes: u8) -> CamResult<()> {
        let path = dirlist::resolve(&self.cwd, name);
        match &mut self.link {
            CameraLink::Serial(serial) => serial.set_attributes(&path, attributes).await,
            CameraLink::Usb(usb) => usb.set_attributes(&path, attributes).await,
        }
    }

    pub async fn mkdir(&mut self, name: &str) -> CamResult<()> {
        let path = dirlist::resolve(&self.cwd, name);
        match &mut self.link {
            CameraLink::Serial(serial) => serial.mkdir(&path).await,
            CameraLink::Usb(usb) => usb.mkdir(&path).await,
        }
    }

    pub async fn rmdir(&mut self, name: &str) -> CamResult<()> {
        let path = dirlist::resolve(&self.cwd, name);
        match &mut self.link {
            CameraLink::Serial(serial) => serial.rmdir(&path).await,
            CameraLink::Usb(usb) => usb.rmdir(&path).await,
        }
    }

    /// Checks the serial link is still alive. Serial only.
    pub async fn ping(&mut self) -> CamResult<()> {
        match &mut self.link {
            CameraLink::Serial(serial) => serial.ping().await,
            CameraLink::Usb(_) => Err(CamError::Unsupported),
        }
    }

    /// Powers the camera down and ends the session. Serial only.
    pub async fn switch_off(&mut self) -> CamResult<()> {
        match &mut self.link {
            CameraLink::Serial(serial) => {
                serial.switch_off().await?;
                self.closed = true;
                Ok(())
            }
            CameraLink::Usb(_) => Err(CamError::Unsupported),
        }
    }

    fn usb_eos(&mut self) -> CamResult<&mut UsbProtocol> {
        match &mut self.link {
            CameraLink::Usb(usb)
                if usb.model().is_eos() || usb.model() == CameraModel::Unknown =>
            {
                Ok(usb)
            }
            _ => Err(CamError::Unsupported),
        }
    }

    /// Releases the shutter. The image lands on the flash card; list the
    /// DCIM directory afterwards to find it. USB EOS bodies only.
    pub async fn remote_capture(&mut self) -> CamResult<()> {
        self.usb_eos()?.remote_capture().await
    }

    /// Starts (`true`) or stops (`false`) driving the autofocus without
    /// releasing the shutter. USB EOS bodies only.
    pub async fn focus(&mut self, active: bool) -> CamResult<()> {
        self.usb_eos()?.focus(active).await
    }

    /// Shots remaining on the flash card at the current quality setting.
    /// USB EOS bodies only.
    pub async fn shots(&mut self) -> CamResult<u32> {
        self.usb_eos()?.shots().await
    }

    /// Reads a shooting parameter by name, e.g. `ISO`. USB EOS bodies only.
    pub async fn get_param(&mut self, name: &str) -> CamResult<&'static str> {
        let usb = self.usb_eos()?;
        let model = usb.model();
        let block = usb.get_release_params().await?;
        Ok(params::get(model, name, &block)?)
    }

    /// Sets a shooting parameter by name and value, e.g. `ISO` to `400`.
    /// USB EOS bodies only.
    pub async fn set_param(&mut self, name: &str, value: &str) -> CamResult<()> {
        let usb = self.usb_eos()?;
        let model = usb.model();
        let mut block = usb.get_release_params().await?;
        params::set(model, name, value, &mut block)?;
        usb.set_release_params(&block).await
    }

    /// Reads a custom function by name, e.g. `MLU`. USB EOS bodies only.
    pub async fn get_custom(&mut self, name: &str) -> CamResult<&'static str> {
        let usb = self.usb_eos()?;
        let model = usb.model();
        let index = custom::function_index(model, name)?;
        let raw = usb.get_custom_byte(index).await?;
        Ok(custom::decode(model, name, raw)?)
    }

    /// Sets a custom function by name and value. USB EOS bodies only.
    pub async fn set_custom(&mut self, name: &str, value: &str) -> CamResult<()> {
        let usb = self.usb_eos()?;
        let model = usb.model();
        let (index, raw) = custom::encode(model, name, value)?;
        usb.set_custom_byte(index, raw).await
    }

    /// Ends the session: serial cameras are powered down, USB cameras are
    /// left on (the interface is released when the session is dropped).
    /// Calling it twice is fine.
    pub async fn close(&mut self) -> CamResult<()> {
        if self.closed {
            return Ok(());
        }
        if let CameraLink::Serial(serial) = &mut self.link {
            serial.switch_off().await?;
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("camera session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn id_and_power_formatting() {
        let id = CameraId {
            model: "Canon PowerShot S10".into(),
            firmware: "1.0.2.0".into(),
            owner: Some("nobody".into()),
        };
        assert_eq!(
            id.to_string(),
            "Canon PowerShot S10 (firmware 1.0.2.0), owner nobody"
        );

        let anonymous = CameraId {
            owner: None,
            ..id
        };
        assert_eq!(
            anonymous.to_string(),
            "Canon PowerShot S10 (firmware 1.0.2.0)"
        );

        let status = PowerStatus {
            good: true,
            ac: false,
        };
        assert_eq!(status.to_string(), "power good (battery)");
    }
}
