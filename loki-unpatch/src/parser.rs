use crate::constants::{BOOT_MAGIC, LOKI_HEADER_OFFSET, LOKI_MAGIC};
use crate::error::{Error, Result};
use crate::layouts::{RawBootHeader, RawBootHeaderMut, RawLokiHeader};
use crate::utils::trim_end;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageClass {
    Boot,
    Recovery,
}

impl Display for ImageClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ImageClass::Boot => "boot",
            ImageClass::Recovery => "recovery",
        })
    }
}

impl FromStr for ImageClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "boot" => Ok(ImageClass::Boot),
            "recovery" => Ok(ImageClass::Recovery),
            _ => Err(format!("First argument must be \"boot\" or \"recovery\", got {s:?}")),
        }
    }
}

/// Image class recorded by loki_patch in the marker header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MarkerClass {
    Boot,
    Recovery,
    Unknown(u32),
}

impl MarkerClass {
    pub fn matches(&self, declared: ImageClass) -> bool {
        matches!(
            (self, declared),
            (MarkerClass::Boot, ImageClass::Boot) | (MarkerClass::Recovery, ImageClass::Recovery)
        )
    }
}

#[derive(Copy, Clone)]
pub struct LokiHeader<'a> {
    raw: RawLokiHeader<'a>,
}

impl<'a> LokiHeader<'a> {
    /// Looks for the loki marker at its fixed offset. Anything short of an
    /// exact magic match is [`Error::NotPatchedImage`].
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let raw = data
            .get(LOKI_HEADER_OFFSET..)
            .and_then(RawLokiHeader::new)
            .ok_or(Error::NotPatchedImage)?;
        if raw.get_magic() != LOKI_MAGIC {
            return Err(Error::NotPatchedImage);
        }
        Ok(Self { raw })
    }

    pub fn image_class(&self) -> MarkerClass {
        match self.raw.get_recovery_raw() {
            0 => MarkerClass::Boot,
            1 => MarkerClass::Recovery,
            n => MarkerClass::Unknown(n),
        }
    }

    pub fn build(&self) -> &'a [u8] {
        trim_end(self.raw.get_build())
    }
}

/// Semantic view of the primary header. The two slots loki_patch reuses are
/// exposed under their real meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootHeader {
    pub magic: [u8; 8],
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub recovered_kernel_size: u32,
    pub recovered_ramdisk_size: u32,
    pub name: [u8; 16],
    pub cmdline: [u8; 512],
    pub id: [u8; 32],
}

impl BootHeader {
    pub const SIZE: usize = RawBootHeader::SIZE;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw = RawBootHeader::new(data).ok_or(Error::TruncatedHeader(data.len()))?;
        Ok(Self::from_raw(&raw))
    }

    fn from_raw(raw: &RawBootHeader<'_>) -> Self {
        let mut header = Self {
            magic: [0; 8],
            kernel_size: raw.get_kernel_size(),
            kernel_addr: raw.get_kernel_addr(),
            ramdisk_size: raw.get_ramdisk_size(),
            ramdisk_addr: raw.get_ramdisk_addr(),
            second_size: raw.get_second_size(),
            second_addr: raw.get_second_addr(),
            tags_addr: raw.get_tags_addr(),
            page_size: raw.get_page_size(),
            // loki_patch stores the original sizes here
            recovered_kernel_size: raw.get_dt_size(),
            recovered_ramdisk_size: raw.get_unused(),
            name: [0; 16],
            cmdline: [0; 512],
            id: [0; 32],
        };
        header.magic.copy_from_slice(raw.get_magic());
        header.name.copy_from_slice(raw.get_name());
        header.cmdline.copy_from_slice(raw.get_cmdline());
        header.id.copy_from_slice(raw.get_id());
        header
    }

    /// Writes the header at the start of `page`, leaving the rest of the
    /// page untouched. The dt_size and unused slots are written as zero.
    pub fn encode_into(&self, page: &mut [u8]) -> Result<()> {
        let len = page.len();
        let mut raw = RawBootHeaderMut::new(page).ok_or(Error::TruncatedHeader(len))?;
        raw.set_magic(&self.magic);
        raw.set_kernel_size(self.kernel_size);
        raw.set_kernel_addr(self.kernel_addr);
        raw.set_ramdisk_size(self.ramdisk_size);
        raw.set_ramdisk_addr(self.ramdisk_addr);
        raw.set_second_size(self.second_size);
        raw.set_second_addr(self.second_addr);
        raw.set_tags_addr(self.tags_addr);
        raw.set_page_size(self.page_size);
        raw.set_dt_size(0);
        raw.set_unused(0);
        raw.set_name(&self.name);
        raw.set_cmdline(&self.cmdline);
        raw.set_id(&self.id);
        Ok(())
    }

    pub fn has_boot_magic(&self) -> bool {
        self.magic == BOOT_MAGIC
    }

    pub fn get_name(&self) -> &[u8] {
        trim_end(&self.name)
    }

    pub fn get_cmdline(&self) -> &[u8] {
        trim_end(&self.cmdline)
    }

    pub(crate) fn log_fields(&self) {
        debug!("Original kernel address: {:08x}", self.kernel_addr);
        debug!("Original kernel size: {:08x}", self.kernel_size);
        debug!("Original ramdisk address: {:08x}", self.ramdisk_addr);
        debug!("Original ramdisk size: {:08x}", self.ramdisk_size);
        debug!("Original second addr: {:08x}", self.second_addr);
        debug!("Original second size: {:08x}", self.second_size);
        debug!("Original tags addr: {:08x}", self.tags_addr);
        debug!("Original page size: {:08x}", self.page_size);
        debug!("Original name: {}", String::from_utf8_lossy(self.get_name()));
        debug!("Original cmdline: {}", String::from_utf8_lossy(self.get_cmdline()));
    }
}
